//! Registry scenarios driven through the contact and gossip paths.

use std::time::Duration;

use chrono::Utc;

use peerseek_core::record::Contact;
use peerseek_core::{Hash, NetworkMode, PeerType};
use peerseek_services::contact::{post_to_peer, ContactError};
use peerseek_services::gossip::{answer_hello, ingest_gossip};
use peerseek_services::memory::{Behaviour, MemoryTransport};
use peerseek_services::protocol::PATH_HELLO;
use peerseek_services::{Arrival, ConnectRejection, Endpoint, PeerState, PingOutcome, TransportError};

use crate::*;

/// A peer that stops answering drops out, then comes back on a new address.
#[tokio::test(start_paused = true)]
async fn test_timeout_then_reconnect_on_new_address() {
    let reg = registry_for("meAAAAAAAAAA", "9.9.9.9", NetworkMode::Global);
    let t = Utc::now();
    let a = record("peerAAAAAAAA", &["1.2.3.4"], PeerType::Senior, t);
    reg.add_connected(a.clone());

    let transport = MemoryTransport::new();
    transport.route_fixed(Endpoint::plain("1.2.3.4:8090".parse().unwrap()), Behaviour::Hang);

    let err = post_to_peer(&transport, &reg, &a, PATH_HELLO, &[], Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ContactError::Timeout { .. }), "{err:?}");
    assert_eq!(reg.state_of(&a.id), Some(PeerState::Disconnected));
    assert!(reg.get(&a.id).unwrap().addresses().is_empty());

    let mut fresh = record("peerAAAAAAAA", &["5.6.7.8"], PeerType::Senior, t);
    fresh.last_seen = t + chrono::Duration::seconds(10);
    let outcome = reg.peer_ping(fresh, Utc::now()).unwrap();
    assert_eq!(outcome, PingOutcome::Connected(Arrival::Reconnected));
    assert_eq!(reg.state_of(&a.id), Some(PeerState::Connected));
    assert_eq!(reg.get(&a.id).unwrap().addresses(), vec!["5.6.7.8".parse::<std::net::IpAddr>().unwrap()]);
}

/// Losing one of two addresses keeps the peer connected on the other.
#[tokio::test]
async fn test_partial_address_failure() {
    let reg = registry_for("meAAAAAAAAAA", "9.9.9.9", NetworkMode::Global);
    let a = record("peerAAAAAAAA", &["1.2.3.4", "2001:db8::1"], PeerType::Senior, Utc::now());
    reg.add_connected(a.clone());

    let transport = MemoryTransport::new();
    transport.route_fixed(
        Endpoint::plain("[2001:db8::1]:8090".parse().unwrap()),
        Behaviour::Reply(bytes::Bytes::from_static(b"{}")),
    );
    transport.route_fixed(
        Endpoint::plain("1.2.3.4:8090".parse().unwrap()),
        Behaviour::Fail(TransportError::Connect("refused".into())),
    );

    let contacted = post_to_peer(&transport, &reg, &a, PATH_HELLO, &[], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(contacted.endpoint.addr, "[2001:db8::1]:8090".parse().unwrap());
    assert_eq!(reg.state_of(&a.id), Some(PeerState::Connected));
    assert_eq!(
        reg.get(&a.id).unwrap().addresses(),
        vec!["2001:db8::1".parse::<std::net::IpAddr>().unwrap()]
    );
}

/// A second id claiming a connected peer's address and port is refused.
#[test]
fn test_address_fraud_rejected() {
    let reg = registry_for("meAAAAAAAAAA", "9.9.9.9", NetworkMode::Global);
    let now = Utc::now();
    reg.connect_peer(record("peerAAAAAAAA", &["1.2.3.4"], PeerType::Senior, now), Contact::Direct, now)
        .unwrap();

    let impostor = record("fakeAAAAAAAA", &["1.2.3.4"], PeerType::Senior, now);
    let err = reg.connect_peer(impostor, Contact::Gossip, now).unwrap_err();
    assert_eq!(
        err,
        ConnectRejection::Fraud {
            claimed_by: Hash::parse("peerAAAAAAAA").unwrap()
        }
    );
    assert!(!reg.is_known(&Hash::parse("fakeAAAAAAAA").unwrap()));
}

/// One registry answers a hello; the other learns its sample.
#[test]
fn test_gossip_between_registries() {
    let now = Utc::now();
    let alice = registry_for("aliceAAAAAAA", "7.7.7.7", NetworkMode::Global);
    let bob = registry_for("bobAAAAAAAAA", "8.8.8.8", NetworkMode::Global);
    for (i, id) in ["p1AAAAAAAAAA", "p2AAAAAAAAAA", "p3AAAAAAAAAA"].iter().enumerate() {
        alice.add_connected(record(id, &[format!("4.4.4.{}", i + 1).as_str()], PeerType::Senior, now));
    }
    alice.add_potential(record("juniorAAAAAA", &["5.5.5.5"], PeerType::Junior, now));

    let bob_seed = peerseek_core::seed::encode(&bob.my_seed().unwrap());
    let mut rng = rand::thread_rng();
    let reply = answer_hello(&alice, &bob_seed, Some("8.8.8.8".parse().unwrap()), 10, now, &mut rng).unwrap();

    // alice now knows bob directly, and only hands out connected peers
    assert_eq!(alice.state_of(&Hash::parse("bobAAAAAAAAA").unwrap()), Some(PeerState::Connected));
    assert_eq!(reply.seeds.len(), 3);

    let learned = ingest_gossip(&bob, &reply.seeds, now);
    assert_eq!(learned, 3);
    assert_eq!(bob.counts(), (3, 0, 0));

    // alice's own seed arrives through the direct path
    let alice_record = peerseek_core::seed::decode(&reply.seed).unwrap();
    assert_eq!(
        bob.peer_ping(alice_record, now).unwrap(),
        PingOutcome::Connected(Arrival::New)
    );
    assert_eq!(bob.counts(), (4, 0, 0));
}
