//! HTTP surfaces of a peerseek node.
//!
//! `/api/*` is the local control API, bound to loopback. `/peer/*` is the
//! peer protocol other nodes talk to. [`HttpTransport`] is the client side
//! of the peer protocol.

pub mod client;
pub mod handlers;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use client::HttpTransport;
pub use handlers::ApiState;

use peerseek_services::protocol::{PATH_HELLO, PATH_SEARCH};

/// Control API routes, nested under `/api`.
pub fn api_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/peers", get(handlers::handle_peers))
        .route("/peers/ping", post(handlers::handle_ping))
        .route("/events", get(handlers::handle_events))
        .route("/search", post(handlers::handle_search))
        .route("/index", post(handlers::handle_index))
        .route("/daemon/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Peer protocol routes.
pub fn peer_router(state: ApiState) -> Router {
    Router::new()
        .route(PATH_HELLO, post(handlers::handle_peer_hello))
        .route(PATH_SEARCH, post(handlers::handle_peer_search))
        .with_state(state)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    serve_on(state, listener).await
}

/// Serve the control API on an already bound listener.
pub async fn serve_on(state: ApiState, listener: TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, api_router(state)).await?;
    Ok(())
}

pub async fn serve_peer(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_peer_on(state, listener).await
}

/// Serve the peer protocol on an already bound listener.
pub async fn serve_peer_on(state: ApiState, listener: TcpListener) -> anyhow::Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "peer protocol listening");
    let app = peer_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}
