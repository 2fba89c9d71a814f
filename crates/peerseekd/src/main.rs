//! peerseekd — peerseek search node daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use peerseek_api::{ApiState, HttpTransport};
use peerseek_core::config::PeerseekConfig;
use peerseek_services::identity::load_or_create_my_seed;
use peerseek_services::{
    DomainFilter, Gossip, MemoryIndex, PeerEventLog, PeerRegistry, RemoteSearch, SearchSettings, Transport,
};

mod maintenance;
mod pinger;

use maintenance::RegistryMaintainer;
use pinger::Pinger;

/// Peer events kept for the control API.
const EVENT_LOG_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PeerseekConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PeerseekConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PeerseekConfig::default()
    });
    tracing::info!(mode = ?config.network.mode, "peerseekd starting");

    // Registry
    let registry = PeerRegistry::with_persistence(config.network.mode, config.registry.snapshot_path.clone());
    let events = PeerEventLog::new(EVENT_LOG_CAPACITY);
    registry.add_listener(Arc::new(events.clone()));

    // Identity
    let me = load_or_create_my_seed(
        &config.identity,
        &config.network,
        &registry,
        chrono::Utc::now(),
        &mut StdRng::from_entropy(),
    )?;
    tracing::info!(peer = %me.id, name = me.name(), peer_type = %me.peer_type, "identity ready");

    // Network plumbing
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
    let settings = SearchSettings::from(&config.search);
    let gossip = Gossip::new(
        registry.clone(),
        transport.clone(),
        settings.request_timeout,
        config.registry.seeds_per_hello,
    );
    let index = MemoryIndex::new();
    let search = RemoteSearch::new(registry.clone(), transport, settings)
        .with_filter(Arc::new(DomainFilter::from_config(&config.filter)))
        .with_sink(Arc::new(index.clone()));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Servers ──────────────────────────────────────────────────────────────

    let state = ApiState {
        registry: registry.clone(),
        search,
        gossip: gossip.clone(),
        index,
        events,
        seeds_per_hello: config.registry.seeds_per_hello,
        shutdown_tx: shutdown_tx.clone(),
    };

    let api_task = {
        let state = state.clone();
        let port = config.network.api_port;
        tokio::spawn(async move { peerseek_api::serve(state, port).await })
    };

    let peer_task = {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.network.peer_port));
        tokio::spawn(async move { peerseek_api::serve_peer(state, addr).await })
    };

    // ── Bootstrap ────────────────────────────────────────────────────────────

    {
        let gossip = gossip.clone();
        let bootstrap = config.network.bootstrap.clone();
        tokio::spawn(async move { bootstrap_hellos(gossip, bootstrap).await });
    }

    // ── Workers ──────────────────────────────────────────────────────────────

    let pinger_task = tokio::spawn(
        Pinger::new(
            gossip,
            registry.clone(),
            Duration::from_secs(config.registry.ping_interval_secs.max(1)),
            config.registry.ping_fanout,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let maintainer_task = tokio::spawn(
        RegistryMaintainer::new(registry.clone(), &config.registry, shutdown_tx.subscribe()).run(),
    );

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = api_task            => tracing::error!("API server exited: {:?}", r),
        r = peer_task           => tracing::error!("peer server exited: {:?}", r),
        r = pinger_task         => tracing::error!("pinger exited: {:?}", r),
        r = maintainer_task     => tracing::error!("registry maintainer exited: {:?}", r),
    }

    let written = registry.flush();
    tracing::info!(written, "peer registry saved");
    Ok(())
}

/// Greet each configured bootstrap peer once. Entries are `host:port`.
async fn bootstrap_hellos(gossip: Gossip, entries: Vec<String>) {
    for entry in entries {
        let addrs = match tokio::net::lookup_host(entry.as_str()).await {
            Ok(a) => a.collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(error = %e, peer = %entry, "cannot resolve bootstrap peer");
                continue;
            }
        };
        let Some(addr) = addrs.into_iter().next() else {
            continue;
        };
        match gossip.hello_endpoint(addr).await {
            Ok(learned) => tracing::info!(peer = %entry, learned, "bootstrap hello answered"),
            Err(e) => tracing::warn!(error = %e, peer = %entry, "bootstrap hello failed"),
        }
    }
}
