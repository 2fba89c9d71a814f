//! Periodic hello rounds that keep the connected partition fresh.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use peerseek_services::{Gossip, PeerRegistry};

pub struct Pinger {
    gossip: Gossip,
    registry: PeerRegistry,
    period: Duration,
    fanout: usize,
    rng: StdRng,
    shutdown: broadcast::Receiver<()>,
}

impl Pinger {
    pub fn new(
        gossip: Gossip,
        registry: PeerRegistry,
        period: Duration,
        fanout: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            gossip,
            registry,
            period,
            fanout,
            rng: StdRng::from_entropy(),
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("pinger shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    let now = chrono::Utc::now();
                    self.registry.update_my_seed(|me| me.last_seen = now);
                    let answered = self.gossip.ping_round(self.fanout, &mut self.rng).await;
                    let (connected, disconnected, potential) = self.registry.counts();
                    tracing::debug!(answered, connected, disconnected, potential, "ping round done");
                }
            }
        }
    }
}
