//! /search, /peers/ping, /index handlers.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use peerseek_services::{SearchOutcome, SearchQuery};

use super::{bad_request, ApiState};

const DEFAULT_COUNT: usize = 20;

// ── /search ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub count: Option<usize>,
}

pub async fn handle_search(
    State(state): State<ApiState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>, (StatusCode, String)> {
    let query = SearchQuery::new(&req.query, req.count.unwrap_or(DEFAULT_COUNT));
    if query.words.is_empty() {
        return Err(bad_request("query has no words"));
    }
    tracing::info!(query = %query.text(), "remote search requested via API");
    Ok(Json(state.search.search(query).await))
}

// ── /peers/ping ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PingRequest {
    /// `host:port` of the peer to greet.
    pub addr: String,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub addr: String,
    /// Gossiped peers that reached the connected partition.
    pub learned: usize,
}

pub async fn handle_ping(
    State(state): State<ApiState>,
    Json(req): Json<PingRequest>,
) -> Result<Json<PingResponse>, (StatusCode, String)> {
    let addr: SocketAddr = req
        .addr
        .parse()
        .map_err(|_| bad_request(format!("invalid address '{}'", req.addr)))?;
    let learned = state
        .gossip
        .hello_endpoint(addr)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    Ok(Json(PingResponse {
        addr: addr.to_string(),
        learned,
    }))
}

// ── /index ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct IndexRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize)]
pub struct IndexResponse {
    pub url_hash: String,
    pub documents: u64,
    pub words: u64,
}

pub async fn handle_index(
    State(state): State<ApiState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, (StatusCode, String)> {
    if req.url.trim().is_empty() {
        return Err(bad_request("url is required"));
    }
    let id = state.index.add_document(&req.url, &req.title, &req.text);
    let documents = state.index.link_count();
    let words = state.index.word_count();
    state.registry.update_my_seed(|me| {
        me.link_count = documents;
        me.word_count = words;
    });
    Ok(Json(IndexResponse {
        url_hash: id.to_string(),
        documents,
        words,
    }))
}
