//! peerseek integration test harness.
//!
//! Everything runs in-process. Scenarios that need peers either route
//! requests through a [`MemoryTransport`] or start real nodes on loopback
//! ports chosen by the OS.

mod config;
mod nodes;
mod scenarios;
mod search;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;

use peerseek_api::{ApiState, HttpTransport};
use peerseek_core::{Hash, NetworkMode, PeerRecord, PeerType};
use peerseek_services::memory::Behaviour;
use peerseek_services::{Gossip, MemoryIndex, PeerEventLog, PeerRegistry, RemoteSearch, SearchSettings};

// ── Records ───────────────────────────────────────────────────────────────────

pub fn record(id: &str, ips: &[&str], peer_type: PeerType, now: DateTime<Utc>) -> PeerRecord {
    let mut r = PeerRecord::new(Hash::parse(id).unwrap(), id, peer_type, now);
    for ip in ips {
        r.add_address(ip.parse().unwrap());
    }
    r.port = 8090;
    r
}

/// A registry in `mode` that already knows who it is.
pub fn registry_for(me_id: &str, me_ip: &str, mode: NetworkMode) -> PeerRegistry {
    let registry = PeerRegistry::new(mode);
    registry.set_my_seed(record(me_id, &[me_ip], PeerType::Senior, Utc::now()));
    registry
}

pub fn json_reply<T: serde::Serialize>(value: &T) -> Behaviour {
    Behaviour::Reply(Bytes::from(serde_json::to_vec(value).unwrap()))
}

pub fn test_settings() -> SearchSettings {
    SearchSettings {
        redundancy: 3,
        partition_exponent: 0,
        min_age_days: 0,
        request_timeout: Duration::from_millis(500),
        deadline: Duration::from_secs(2),
        max_results_per_peer: 10,
        max_concurrency: 8,
        store_remote_results: false,
    }
}

// ── Live nodes ────────────────────────────────────────────────────────────────

/// A node serving the peer protocol and the control API on loopback.
pub struct Node {
    pub state: ApiState,
    pub peer_addr: SocketAddr,
    pub api_base: String,
}

impl Node {
    pub fn id(&self) -> Hash {
        self.state.registry.my_id().unwrap()
    }
}

pub async fn spawn_node(name: &str, seed: u64) -> Result<Node> {
    let peer_listener = TcpListener::bind("127.0.0.1:0").await?;
    let api_listener = TcpListener::bind("127.0.0.1:0").await?;
    let peer_addr = peer_listener.local_addr()?;
    let api_addr = api_listener.local_addr()?;

    let registry = PeerRegistry::new(NetworkMode::All);
    let events = PeerEventLog::new(32);
    registry.add_listener(Arc::new(events.clone()));

    let mut rng = StdRng::seed_from_u64(seed);
    let now = Utc::now();
    let mut me = PeerRecord::new(Hash::random(&mut rng), name, PeerType::Senior, now - chrono::Duration::days(30));
    me.last_seen = now;
    me.add_address(peer_addr.ip());
    me.port = peer_addr.port();
    registry.set_my_seed(me);

    let transport = Arc::new(HttpTransport::new()?);
    let settings = test_settings();
    let gossip = Gossip::new(registry.clone(), transport.clone(), settings.request_timeout, 8);
    let index = MemoryIndex::new();
    let search = RemoteSearch::new(registry.clone(), transport, settings);
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let state = ApiState {
        registry,
        search,
        gossip,
        index,
        events,
        seeds_per_hello: 8,
        shutdown_tx,
    };
    tokio::spawn(peerseek_api::serve_peer_on(state.clone(), peer_listener));
    tokio::spawn(peerseek_api::serve_on(state.clone(), api_listener));

    Ok(Node {
        state,
        peer_addr,
        api_base: format!("http://{}/api", api_addr),
    })
}
