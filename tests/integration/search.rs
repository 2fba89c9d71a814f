//! Scatter-gather search against a mock network.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use peerseek_core::{Hash, NetworkMode, PeerId, PeerRecord, PeerType};
use peerseek_services::memory::{Behaviour, MemoryTransport};
use peerseek_services::protocol::{url_hash, ResultItem, SearchReply, PROTOCOL_VERSION};
use peerseek_services::search::{PeerReport, SearchPlan, TaskOutcome};
use peerseek_services::{
    DomainFilter, Endpoint, HealthSignals, PeerRegistry, PeerState, RemoteSearch, SearchQuery, SearchSettings,
    TransportError,
};

use crate::*;

struct MockPeer {
    id: PeerId,
    endpoint: Endpoint,
}

/// `n` month-old senior peers on 10.1.0.x, all unrouted to start with.
fn mock_network(n: u8) -> (PeerRegistry, MemoryTransport, Vec<MockPeer>) {
    let registry = registry_for("meAAAAAAAAAA", "10.0.0.1", NetworkMode::All);
    let transport = MemoryTransport::new();
    let mut rng = StdRng::seed_from_u64(5);
    let mut peers = Vec::new();
    for i in 0..n {
        let id = Hash::random(&mut rng);
        let mut r = PeerRecord::new(id, &format!("p{i}"), PeerType::Senior, Utc::now() - chrono::Duration::days(30));
        r.add_address(format!("10.1.0.{}", i + 1).parse().unwrap());
        r.port = 8090;
        r.last_seen = Utc::now();
        registry.add_connected(r);
        let addr: SocketAddr = format!("10.1.0.{}:8090", i + 1).parse().unwrap();
        peers.push(MockPeer {
            id,
            endpoint: Endpoint::plain(addr),
        });
    }
    (registry, transport, peers)
}

fn item(url: &str, title: &str) -> ResultItem {
    ResultItem {
        url_hash: url_hash(url).to_string(),
        url: url.to_string(),
        title: title.to_string(),
        snippet: String::new(),
    }
}

fn reply(from: &PeerId, items: Vec<ResultItem>) -> Behaviour {
    let mut topics = BTreeMap::new();
    topics.insert("ring".to_string(), 1);
    json_reply(&SearchReply {
        version: PROTOCOL_VERSION,
        responder: from.to_string(),
        items,
        topics,
        seeds: Vec::new(),
    })
}

/// Every peer as an index target, nothing else.
fn plan_all(search: &RemoteSearch, query: &SearchQuery, peers: &[MockPeer]) -> SearchPlan {
    let mut rng = StdRng::seed_from_u64(9);
    let mut plan = search.plan(query, &HealthSignals::default(), &mut rng);
    plan.index_targets = peers.iter().map(|p| p.id).collect();
    plan.fulltext_targets.clear();
    plan
}

fn outcome_of(reports: &[PeerReport], id: &PeerId) -> TaskOutcome {
    reports.iter().find(|r| r.peer == *id).unwrap().outcome.clone()
}

/// One dead peer costs its own results and nothing else.
#[tokio::test(start_paused = true)]
async fn test_partial_failure_keeps_other_results() {
    let (registry, transport, peers) = mock_network(3);
    transport.route_fixed(peers[0].endpoint, reply(&peers[0].id, vec![item("http://a.org/1", "rust a")]));
    transport.route_fixed(peers[1].endpoint, reply(&peers[1].id, vec![item("http://b.org/1", "rust b")]));
    transport.route_fixed(
        peers[2].endpoint,
        Behaviour::Fail(TransportError::Connect("refused".into())),
    );

    let search = RemoteSearch::new(registry.clone(), Arc::new(transport), test_settings());
    let query = SearchQuery::new("rust", 10);
    let plan = plan_all(&search, &query, &peers);
    let outcome = search.execute(query, plan).await;

    assert!(!outcome.timed_out);
    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.topics.get("ring"), Some(&2));
    assert!(matches!(
        outcome_of(&outcome.reports, &peers[2].id),
        TaskOutcome::TransportFailure { .. }
    ));
    // the dead peer lost its only address
    assert_eq!(registry.state_of(&peers[2].id), Some(PeerState::Disconnected));
    assert_eq!(registry.state_of(&peers[0].id), Some(PeerState::Connected));
}

/// Slow peers are cut off at the deadline; fast answers are kept.
#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_slow_peers() {
    let (registry, transport, peers) = mock_network(3);
    transport.route_fixed(peers[0].endpoint, reply(&peers[0].id, vec![item("http://a.org/1", "rust")]));
    for p in &peers[1..] {
        transport.route_fixed(p.endpoint, Behaviour::Hang);
    }

    let settings = SearchSettings {
        request_timeout: Duration::from_secs(5),
        deadline: Duration::from_millis(300),
        ..test_settings()
    };
    let search = RemoteSearch::new(registry, Arc::new(transport), settings);
    let query = SearchQuery::new("rust", 10);
    let plan = plan_all(&search, &query, &peers);
    let outcome = search.execute(query, plan).await;

    assert!(outcome.timed_out);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.reports.len(), 3);
    for p in &peers[1..] {
        assert_eq!(outcome_of(&outcome.reports, &p.id), TaskOutcome::Interrupted);
    }
}

/// Blacklisted hosts and forged url hashes never reach the results.
#[tokio::test(start_paused = true)]
async fn test_spam_and_forged_items_rejected() {
    let (registry, transport, peers) = mock_network(2);
    let mut forged = item("http://honest.org/", "rust");
    forged.url_hash = url_hash("http://other.org/").to_string();
    transport.route_fixed(
        peers[0].endpoint,
        reply(
            &peers[0].id,
            vec![
                item("http://good.org/", "rust"),
                item("http://www.spam.example/buy", "rust"),
                forged,
            ],
        ),
    );
    // claims to be someone else
    transport.route_fixed(peers[1].endpoint, reply(&peers[0].id, vec![item("http://x.org/", "rust")]));

    let search = RemoteSearch::new(registry, Arc::new(transport), test_settings())
        .with_filter(Arc::new(DomainFilter::new(["spam.example"], Vec::<String>::new())));
    let query = SearchQuery::new("rust", 10);
    let plan = plan_all(&search, &query, &peers);
    let outcome = search.execute(query, plan).await;

    let urls: Vec<&str> = outcome.items.iter().map(|i| i.item.url.as_str()).collect();
    assert_eq!(urls, vec!["http://good.org/"]);
    assert_eq!(
        outcome_of(&outcome.reports, &peers[0].id),
        TaskOutcome::Success { accepted: 1, rejected: 2 }
    );
    assert!(matches!(
        outcome_of(&outcome.reports, &peers[1].id),
        TaskOutcome::ProtocolMismatch { .. }
    ));
}
