//! HTTP handlers. Control API handlers answer with JSON; peer protocol
//! handlers take url-encoded forms.

pub mod peer;
pub mod search;
pub mod status;

use axum::http::StatusCode;

use peerseek_services::{Gossip, MemoryIndex, PeerEventLog, PeerRegistry, RemoteSearch};

#[derive(Clone)]
pub struct ApiState {
    pub registry: PeerRegistry,
    pub search: RemoteSearch,
    pub gossip: Gossip,
    /// Documents this node serves to `/peer/search`.
    pub index: MemoryIndex,
    pub events: PeerEventLog,
    /// Upper bound on seeds handed out per hello.
    pub seeds_per_hello: usize,
    /// Shutdown broadcast sender — signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

// Re-export handler functions for use in router setup.
pub use peer::{handle_peer_hello, handle_peer_search};
pub use search::{handle_index, handle_ping, handle_search};
pub use status::{handle_events, handle_peers, handle_shutdown, handle_status};
