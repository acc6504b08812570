use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SyncEngine;

impl SyncEngine {
    /// Run resyncs in the background until `shutdown` is cancelled
    ///
    /// A pass runs every `resync_interval` while reachable, and once more
    /// each time the network goes from unreachable to reachable, after the
    /// stabilization delay. Passes never overlap: a trigger that lands
    /// while one is running is dropped.
    pub fn spawn_background(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        // Subscribe before spawning so no transition is missed
        let network = self.network().subscribe();
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_background(network, shutdown).await })
    }

    async fn run_background(
        &self,
        mut network: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) {
        let period = self.settings.resync_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut was_reachable = *network.borrow_and_update();
        info!("Background sync started (every {:?})", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.network().is_reachable() {
                        self.resync_logged("periodic").await;
                    }
                }
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let reachable = *network.borrow_and_update();
                    let came_online = reachable && !was_reachable;
                    was_reachable = reachable;
                    if !came_online {
                        continue;
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = time::sleep(self.settings.stabilize_delay()) => {}
                    }
                    if self.network().is_reachable() {
                        self.resync_logged("reconnect").await;
                    }
                }
            }
        }

        info!("Background sync stopped");
    }

    async fn resync_logged(&self, trigger: &str) {
        match self.full_resync().await {
            Ok(report) => debug!("Resync ({}) finished: {:?}", trigger, report),
            Err(e) => warn!("Resync ({}) failed: {}", trigger, e),
        }
    }
}
