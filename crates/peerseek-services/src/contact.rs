//! Reaching a peer over any of its addresses.
//!
//! Addresses are tried in record order. For each, TLS is tried first if the
//! peer advertises it, then plain HTTP. A peer that only answers in plain
//! loses its `ssl_available` flag. An address that does not answer at all is
//! reported to the registry, which disconnects the peer once no address is
//! left.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use peerseek_core::PeerRecord;

use crate::registry::PeerRegistry;
use crate::transport::{Endpoint, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct Contacted {
    pub body: Bytes,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    #[error("peer has no address")]
    NoAddress,
    #[error("{addr} timed out")]
    Timeout { addr: SocketAddr },
    #[error("{addr} unreachable: {error}")]
    Unreachable { addr: SocketAddr, error: TransportError },
    #[error("{endpoint} rejected request: {error}")]
    Rejected { endpoint: Endpoint, error: TransportError },
}

impl ContactError {
    /// Address of the last attempt, if any was made.
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            Self::NoAddress => None,
            Self::Timeout { addr } | Self::Unreachable { addr, .. } => Some(*addr),
            Self::Rejected { endpoint, .. } => Some(endpoint.addr),
        }
    }
}

/// POST to a peer, falling back across addresses and from TLS to plain.
///
/// Each attempt is bounded by `timeout` here as well as in the transport,
/// so a misbehaving transport cannot stall the caller.
pub async fn post_to_peer(
    transport: &dyn Transport,
    registry: &PeerRegistry,
    peer: &PeerRecord,
    path: &str,
    form: &[(&'static str, String)],
    timeout: Duration,
) -> Result<Contacted, ContactError> {
    let addrs = peer.addresses();
    let mut last_error = ContactError::NoAddress;

    for ip in addrs {
        let addr = SocketAddr::new(ip, peer.port);
        let mut attempts = Vec::with_capacity(2);
        if peer.flags.ssl_available {
            attempts.push(Endpoint::new(addr, true));
        }
        attempts.push(Endpoint::plain(addr));

        let mut secure_failed = false;
        for endpoint in attempts {
            let result = match tokio::time::timeout(timeout, transport.post(endpoint, path, form, timeout)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout),
            };
            match result {
                Ok(body) => {
                    if secure_failed {
                        tracing::debug!(peer = %peer.id, %addr, "tls failed, plain worked; clearing ssl flag");
                        registry.set_ssl_available(&peer.id, false);
                    }
                    return Ok(Contacted { body, endpoint });
                }
                Err(error) if !error.is_unreachable() => {
                    // the address answered; another address would not help
                    return Err(ContactError::Rejected { endpoint, error });
                }
                Err(error) => {
                    if endpoint.secure {
                        secure_failed = true;
                    }
                    last_error = match error {
                        TransportError::Timeout => ContactError::Timeout { addr },
                        error => ContactError::Unreachable { addr, error },
                    };
                }
            }
        }
        drop_address(registry, peer, ip);
    }
    Err(last_error)
}

fn drop_address(registry: &PeerRegistry, peer: &PeerRecord, ip: IpAddr) {
    let outcome = registry.interface_departure(&peer.id, &ip, Utc::now());
    tracing::debug!(peer = %peer.id, addr = %ip, ?outcome, "address unreachable");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Behaviour, MemoryTransport};
    use crate::registry::PeerState;
    use peerseek_core::record::Contact;
    use peerseek_core::{Hash, NetworkMode, PeerType};

    fn peer(ips: &[&str], ssl: bool) -> PeerRecord {
        let mut r = PeerRecord::new(Hash::parse("peerAAAAAAAA").unwrap(), "p", PeerType::Senior, Utc::now());
        for ip in ips {
            r.add_address(ip.parse().unwrap());
        }
        r.port = 8090;
        r.flags.ssl_available = ssl;
        r
    }

    fn ep(s: &str, secure: bool) -> Endpoint {
        Endpoint::new(s.parse().unwrap(), secure)
    }

    #[tokio::test]
    async fn falls_back_to_plain_and_clears_ssl() {
        let reg = PeerRegistry::new(NetworkMode::Global);
        let p = peer(&["1.2.3.4"], true);
        reg.connect_peer(p.clone(), Contact::Direct, Utc::now()).unwrap();

        let t = MemoryTransport::new();
        t.route_fixed(ep("1.2.3.4:8090", true), Behaviour::Fail(TransportError::Tls("handshake".into())));
        t.route_fixed(ep("1.2.3.4:8090", false), Behaviour::Reply(Bytes::from_static(b"hi")));

        let c = post_to_peer(&t, &reg, &p, "/x", &[], Duration::from_secs(1)).await.unwrap();
        assert!(!c.endpoint.secure);
        assert!(!reg.get(&p.id).unwrap().flags.ssl_available);
        assert_eq!(reg.state_of(&p.id), Some(PeerState::Connected));
    }

    #[tokio::test]
    async fn second_address_answers_after_first_fails() {
        let reg = PeerRegistry::new(NetworkMode::Global);
        let p = peer(&["1.2.3.4", "2001:db8::4"], false);
        reg.connect_peer(p.clone(), Contact::Direct, Utc::now()).unwrap();

        let t = MemoryTransport::new();
        t.route_fixed(ep("[2001:db8::4]:8090", false), Behaviour::Reply(Bytes::from_static(b"hi")));

        let c = post_to_peer(&t, &reg, &p, "/x", &[], Duration::from_secs(1)).await.unwrap();
        assert_eq!(c.endpoint.addr.ip(), "2001:db8::4".parse::<IpAddr>().unwrap());
        let stored = reg.get(&p.id).unwrap();
        assert_eq!(stored.addresses().len(), 1);
        assert_eq!(reg.state_of(&p.id), Some(PeerState::Connected));
    }

    #[tokio::test]
    async fn bad_status_keeps_address() {
        let reg = PeerRegistry::new(NetworkMode::Global);
        let p = peer(&["1.2.3.4"], false);
        reg.connect_peer(p.clone(), Contact::Direct, Utc::now()).unwrap();

        let t = MemoryTransport::new();
        t.route_fixed(ep("1.2.3.4:8090", false), Behaviour::Fail(TransportError::Status(500)));

        let err = post_to_peer(&t, &reg, &p, "/x", &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ContactError::Rejected { .. }));
        assert_eq!(reg.get(&p.id).unwrap().addresses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_addresses_disconnect() {
        let reg = PeerRegistry::new(NetworkMode::Global);
        let p = peer(&["1.2.3.4"], false);
        reg.connect_peer(p.clone(), Contact::Direct, Utc::now()).unwrap();

        let t = MemoryTransport::new();
        t.route_fixed(ep("1.2.3.4:8090", false), Behaviour::Hang);

        let err = post_to_peer(&t, &reg, &p, "/x", &[], Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err, ContactError::Timeout { addr: "1.2.3.4:8090".parse().unwrap() });
        assert_eq!(reg.state_of(&p.id), Some(PeerState::Disconnected));
    }
}
