//! /status, /peers, /events, /daemon/shutdown handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use peerseek_core::PeerRecord;
use peerseek_services::registry::ConnectStats;
use peerseek_services::{PeerEvent, PeerState};

use super::{bad_request, ApiState};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub me: Option<PeerInfo>,
    pub connected: usize,
    pub disconnected: usize,
    pub potential: usize,
    pub stats: ConnectStats,
    pub indexed_documents: u64,
    pub indexed_words: u64,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    pub peer_type: String,
    pub addresses: Vec<String>,
    pub port: u16,
    pub last_seen: i64,
    pub age_days: i64,
    pub ssl: bool,
    pub word_count: u64,
    pub link_count: u64,
    pub tags: Vec<String>,
}

impl PeerInfo {
    fn from_record(r: &PeerRecord) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: r.id.to_string(),
            name: r.name().to_string(),
            peer_type: r.peer_type.to_string(),
            addresses: r.addresses().iter().map(|a| a.to_string()).collect(),
            port: r.port,
            last_seen: r.last_seen.timestamp(),
            age_days: r.age_days(now),
            ssl: r.flags.ssl_available,
            word_count: r.word_count,
            link_count: r.link_count,
            tags: r.tags.iter().cloned().collect(),
        }
    }
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let (connected, disconnected, potential) = state.registry.counts();
    Json(StatusResponse {
        me: state.registry.my_seed().as_ref().map(PeerInfo::from_record),
        connected,
        disconnected,
        potential,
        stats: state.registry.stats(),
        indexed_documents: state.index.link_count(),
        indexed_words: state.index.word_count(),
    })
}

// ── /peers ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PeersQuery {
    pub state: Option<String>,
}

#[derive(Serialize)]
pub struct PeersResponse {
    pub state: PeerState,
    pub peers: Vec<PeerInfo>,
}

pub async fn handle_peers(
    State(state): State<ApiState>,
    Query(q): Query<PeersQuery>,
) -> Result<Json<PeersResponse>, (StatusCode, String)> {
    let which = match q.state.as_deref().unwrap_or("connected") {
        "connected" => PeerState::Connected,
        "disconnected" => PeerState::Disconnected,
        "potential" => PeerState::Potential,
        other => return Err(bad_request(format!("unknown peer state '{}'", other))),
    };
    let mut records = state.registry.records_in(which);
    records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    Ok(Json(PeersResponse {
        state: which,
        peers: records.iter().map(PeerInfo::from_record).collect(),
    }))
}

// ── /events ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<PeerEvent>,
}

pub async fn handle_events(State(state): State<ApiState>) -> Json<EventsResponse> {
    Json(EventsResponse {
        events: state.events.recent(),
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<serde_json::Value> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(serde_json::json!({ "message": "peerseekd shutting down" }))
}
