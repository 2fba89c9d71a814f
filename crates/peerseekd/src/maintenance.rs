//! Registry housekeeping: ageing, eviction and snapshots.

use std::time::Duration;

use tokio::sync::broadcast;

use peerseek_core::config::RegistryConfig;
use peerseek_services::PeerRegistry;

pub struct RegistryMaintainer {
    registry: PeerRegistry,
    period: Duration,
    max_age: chrono::Duration,
    max_disconnected: usize,
    shutdown: broadcast::Receiver<()>,
}

impl RegistryMaintainer {
    pub fn new(registry: PeerRegistry, cfg: &RegistryConfig, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            registry,
            period: Duration::from_secs(cfg.flush_interval_secs.max(1)),
            max_age: chrono::Duration::seconds(cfg.max_age_secs as i64),
            max_disconnected: cfg.max_disconnected,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.period);
        // the first tick fires immediately; nothing to tidy yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let written = self.registry.flush();
                    tracing::info!(written, "registry maintainer shutting down");
                    return Ok(());
                }

                _ = interval.tick() => self.tick(),
            }
        }
    }

    fn tick(&self) {
        let aged = self.registry.age_out(self.max_age, chrono::Utc::now());
        let evicted = self.registry.evict_disconnected(self.max_disconnected);
        let written = self.registry.flush();
        tracing::debug!(aged, evicted, written, "registry maintenance");
    }
}
