//! Seed gossip — how peers learn about each other.
//!
//! A hello carries our seed to another peer; its reply carries that peer's
//! own seed (a direct contact) plus a sample of the peers it knows (gossip).

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;

use peerseek_core::record::Contact;
use peerseek_core::{seed, PeerId, PeerRecord, SeedCodecError};

use crate::contact::{post_to_peer, ContactError};
use crate::protocol::{self, HelloReply, ProtocolError, PATH_HELLO, PROTOCOL_VERSION};
use crate::registry::{PeerRegistry, PeerState};
use crate::transport::{Endpoint, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("own seed not initialised")]
    NoIdentity,
    #[error(transparent)]
    Contact(#[from] ContactError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("bad seed: {0}")]
    Seed(#[from] SeedCodecError),
}

#[derive(Clone)]
pub struct Gossip {
    registry: PeerRegistry,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    seeds_per_hello: usize,
}

impl Gossip {
    pub fn new(registry: PeerRegistry, transport: Arc<dyn Transport>, timeout: Duration, seeds_per_hello: usize) -> Self {
        Self {
            registry,
            transport,
            timeout,
            seeds_per_hello,
        }
    }

    fn hello_form(&self) -> Result<Vec<(&'static str, String)>, GossipError> {
        let me = self.registry.my_seed().ok_or(GossipError::NoIdentity)?;
        Ok(protocol::hello_request(&me, self.seeds_per_hello))
    }

    /// Greet a known peer. Returns the number of gossiped peers accepted.
    pub async fn hello_peer(&self, peer: &PeerRecord) -> Result<usize, GossipError> {
        let form = self.hello_form()?;
        let contacted = post_to_peer(
            self.transport.as_ref(),
            &self.registry,
            peer,
            PATH_HELLO,
            &form,
            self.timeout,
        )
        .await?;
        let reply = protocol::parse_hello_reply(&contacted.body)?;
        self.absorb_reply(reply, contacted.endpoint.addr)
    }

    /// Greet an address we have no record for, e.g. a bootstrap peer.
    pub async fn hello_endpoint(&self, addr: SocketAddr) -> Result<usize, GossipError> {
        let form = self.hello_form()?;
        let body = self
            .transport
            .post(Endpoint::plain(addr), PATH_HELLO, &form, self.timeout)
            .await?;
        let reply = protocol::parse_hello_reply(&body)?;
        self.absorb_reply(reply, addr)
    }

    fn absorb_reply(&self, reply: HelloReply, from: SocketAddr) -> Result<usize, GossipError> {
        let now = Utc::now();
        let mut responder = seed::decode(&reply.seed)?;
        patch_address(&mut responder, from.ip(), self.registry.mode());
        if responder.port == 0 {
            responder.port = from.port();
        }
        if let Err(e) = self.registry.peer_ping(responder, now) {
            tracing::debug!(%from, reason = %e, "hello responder not admitted");
        }

        if let Some(ip) = reply.your_ip.as_deref().and_then(|s| s.parse::<IpAddr>().ok()) {
            let mode = self.registry.mode();
            self.registry.update_my_seed(|me| {
                if mode.accepts(&ip) && !me.has_address(&ip) && me.addresses().is_empty() {
                    tracing::info!(addr = %ip, "learned own address from peer");
                    me.add_address(ip);
                }
            });
        }
        Ok(ingest_gossip(&self.registry, &reply.seeds, now))
    }

    /// Hello a random sample of connected and potential peers. Returns how
    /// many answered.
    pub async fn ping_round<R: Rng + ?Sized>(&self, fanout: usize, rng: &mut R) -> usize {
        let none = HashSet::new();
        let mut targets = self.registry.sample(PeerState::Connected, fanout, &none, rng);
        targets.extend(self.registry.sample(PeerState::Potential, fanout.div_ceil(2), &none, rng));
        if targets.is_empty() {
            return 0;
        }

        let results = join_all(targets.iter().map(|p| self.hello_peer(p))).await;
        let mut answered = 0;
        for (peer, result) in targets.iter().zip(results) {
            match result {
                Ok(learned) => {
                    answered += 1;
                    tracing::debug!(peer = %peer.id, learned, "hello answered");
                }
                Err(e) => tracing::debug!(peer = %peer.id, error = %e, "hello failed"),
            }
        }
        answered
    }
}

/// Use the address we saw a peer at when it announced none we can use.
fn patch_address(record: &mut PeerRecord, observed: IpAddr, mode: peerseek_core::NetworkMode) {
    let addrs = record.addresses();
    if addrs.is_empty() || !addrs.iter().any(|a| mode.accepts(a)) {
        record.set_addresses([observed]);
    }
}

/// Register a peer that called us with its seed. The address it called
/// from replaces an unusable announced one. Registry rejections are logged,
/// not returned; only an unreadable seed is an error.
pub fn admit_caller(
    registry: &PeerRegistry,
    caller_seed: &str,
    observed: Option<IpAddr>,
    now: DateTime<Utc>,
) -> Result<PeerId, GossipError> {
    let mut caller = seed::decode(caller_seed)?;
    if let Some(ip) = observed {
        patch_address(&mut caller, ip, registry.mode());
    }
    let caller_id = caller.id;
    match registry.peer_ping(caller, now) {
        Ok(outcome) => tracing::debug!(peer = %caller_id, ?outcome, "contact from peer"),
        Err(e) => tracing::debug!(peer = %caller_id, reason = %e, "caller not admitted"),
    }
    Ok(caller_id)
}

/// Serve a `/peer/hello`: admit the caller and answer with our seed and a
/// sample of connected peers.
pub fn answer_hello<R: Rng + ?Sized>(
    registry: &PeerRegistry,
    caller_seed: &str,
    observed: Option<IpAddr>,
    count: usize,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<HelloReply, GossipError> {
    let me = registry.my_seed().ok_or(GossipError::NoIdentity)?;
    let caller_id = admit_caller(registry, caller_seed, observed, now)?;
    let exclude: HashSet<_> = [caller_id].into_iter().collect();
    let seeds = registry
        .sample(PeerState::Connected, count, &exclude, rng)
        .iter()
        .map(seed::encode)
        .collect();
    Ok(HelloReply {
        version: PROTOCOL_VERSION,
        seed: seed::encode(&me),
        seeds,
        your_ip: observed.map(|ip| ip.to_string()),
    })
}

/// Merge gossiped seeds. Qualified peers go through the connection rules;
/// unknown juniors are kept as potential peers. Returns the number of
/// records that reached the connected partition.
pub fn ingest_gossip(registry: &PeerRegistry, seeds: &[String], now: DateTime<Utc>) -> usize {
    let mut accepted = 0;
    for s in seeds {
        let record = match seed::decode(s) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable gossip seed");
                continue;
            }
        };
        if registry.my_id() == Some(record.id) {
            continue;
        }
        if record.peer_type.is_qualified() {
            if registry.connect_peer(record, Contact::Gossip, now).is_ok() {
                accepted += 1;
            }
        } else if !registry.is_known(&record.id) && record.validate(false, registry.mode()).is_ok() {
            registry.add_potential(record);
        }
    }
    accepted
}
