//! Periodic reconnection of failed backends.
//!
//! # Responsibilities
//! - Wake every `sweep_interval`
//! - Move due Failed targets to Reconnecting and dial them
//! - Leave Connecting targets to the task that added them

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::load_balancer::pool::BackendPool;

pub struct ReconnectSweep {
    pool: Arc<BackendPool>,
    interval: Duration,
}

impl ReconnectSweep {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        let interval = pool.config().sweep_interval();
        Self { pool, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Reconnect sweep starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have failed yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reconnect sweep received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one pass. Returns how many targets became Healthy.
    pub async fn sweep(&self) -> usize {
        let due = self.pool.start_due_reconnects(Instant::now());
        if due.is_empty() {
            return 0;
        }
        tracing::debug!(count = due.len(), "Reconnecting failed backends");

        let results = join_all(due.into_iter().map(|pending| self.pool.complete_connect(pending))).await;
        let recovered = results.into_iter().filter(|ok| *ok).count();
        if recovered > 0 {
            tracing::info!(recovered, healthy = self.pool.healthy_count(), "Backends reconnected");
        }
        recovered
    }
}
