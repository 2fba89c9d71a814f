//! Peer protocol handlers: /peer/hello and /peer/search.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::{Form, Json};

use peerseek_core::{seed, Counters};
use peerseek_services::gossip::{admit_caller, answer_hello};
use peerseek_services::protocol::{HelloForm, HelloReply, SearchForm, SearchKind, SearchReply, PROTOCOL_VERSION};
use peerseek_services::PeerState;

use super::{bad_request, ApiState};

/// Most items served for one request.
const MAX_SERVED_ITEMS: usize = 100;

fn check_version(version: u32) -> Result<(), (StatusCode, String)> {
    if version != PROTOCOL_VERSION {
        return Err(bad_request(format!("protocol version {} not supported", version)));
    }
    Ok(())
}

// ── /peer/hello ──────────────────────────────────────────────────────────────

pub async fn handle_peer_hello(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Form(form): Form<HelloForm>,
) -> Result<Json<HelloReply>, (StatusCode, String)> {
    check_version(form.version)?;
    let count = form.count.min(state.seeds_per_hello);
    let reply = answer_hello(
        &state.registry,
        &form.seed,
        Some(remote.ip()),
        count,
        chrono::Utc::now(),
        &mut rand::thread_rng(),
    )
    .map_err(|e| bad_request(e.to_string()))?;
    tracing::debug!(%remote, seeds = reply.seeds.len(), "answered hello");
    Ok(Json(reply))
}

// ── /peer/search ─────────────────────────────────────────────────────────────

pub async fn handle_peer_search(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Form(mut form): Form<SearchForm>,
) -> Result<Json<SearchReply>, (StatusCode, String)> {
    check_version(form.version)?;
    let me = state
        .registry
        .my_id()
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "node has no identity yet".to_string()))?;
    let now = chrono::Utc::now();

    let caller = match form.seed.as_deref() {
        Some(s) => match admit_caller(&state.registry, s, Some(remote.ip()), now) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!(%remote, error = %e, "ignoring unreadable caller seed");
                None
            }
        },
        None => None,
    };

    form.count = form.count.min(MAX_SERVED_ITEMS);
    let mut reply = state.index.answer(&me, &form);

    let exclude: HashSet<_> = caller.into_iter().collect();
    reply.seeds = state
        .registry
        .sample(PeerState::Connected, state.seeds_per_hello, &exclude, &mut rand::thread_rng())
        .iter()
        .map(seed::encode)
        .collect();

    // counters are kept from each record owner's point of view
    let served = reply.items.len() as u64;
    let index_refs = if form.kind == SearchKind::Index { served } else { 0 };
    if let Some(id) = caller {
        state.registry.record_traffic(
            &id,
            Counters {
                url_received: served,
                index_received: index_refs,
                ..Counters::default()
            },
        );
    }
    state.registry.update_my_seed(|me| {
        me.add_traffic(Counters {
            url_sent: served,
            index_sent: index_refs,
            ..Counters::default()
        })
    });
    tracing::debug!(%remote, kind = form.kind.as_str(), served, "answered search");
    Ok(Json(reply))
}
