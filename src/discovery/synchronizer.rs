//! Membership synchronization.
//!
//! # Responsibilities
//! - Keep a one-shot children watch armed on the servers root
//! - Publish each listing as a [`MembershipEvent`]
//! - Reconcile the pool against every event and dial added backends
//!
//! # Design Decisions
//! - Watcher and reconciler are separate tasks joined by an mpsc channel
//! - A failed re-arm is retried with backoff; the last applied snapshot
//!   stays in force until the service answers again

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::coordination::{CoordinationError, Coordinator, WatchEvent};
use crate::discovery::membership::MembershipSnapshot;
use crate::load_balancer::pool::{BackendPool, MembershipDiff};
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;

/// One listing of the servers root.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    /// Increments with every listing this watcher publishes.
    pub generation: u64,
    pub snapshot: MembershipSnapshot,
}

/// Coordination-facing half: lists the servers root and re-arms the watch.
pub struct MembershipWatcher {
    coordinator: Arc<dyn Coordinator>,
    servers_path: String,
    retry: RetryPolicy,
    events: mpsc::Sender<MembershipEvent>,
}

enum WatchOutcome {
    Changed,
    Failed(CoordinationError),
    Stop,
}

impl MembershipWatcher {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        servers_path: impl Into<String>,
        retry: RetryPolicy,
        events: mpsc::Sender<MembershipEvent>,
    ) -> Self {
        Self {
            coordinator,
            servers_path: servers_path.into(),
            retry,
            events,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(path = %self.servers_path, "Membership watcher starting");

        let mut root_ready = false;
        let mut failures: u32 = 0;
        let mut generation: u64 = 0;

        loop {
            let outcome = if !root_ready {
                match self.coordinator.ensure_path(&self.servers_path).await {
                    Ok(()) => {
                        root_ready = true;
                        continue;
                    }
                    Err(e) => WatchOutcome::Failed(e),
                }
            } else {
                match self.coordinator.children_with_watch(&self.servers_path).await {
                    Ok((children, watch)) => {
                        if failures > 0 {
                            tracing::info!(failures, "Membership watch re-armed");
                        }
                        failures = 0;
                        generation += 1;
                        let event = MembershipEvent {
                            generation,
                            snapshot: MembershipSnapshot::from_children(&children),
                        };
                        if self.events.send(event).await.is_err() {
                            tracing::debug!("Membership consumer gone, watcher exiting");
                            return;
                        }

                        tokio::select! {
                            fired = watch => match fired {
                                Ok(WatchEvent::ChildrenChanged { .. }) => WatchOutcome::Changed,
                                Ok(WatchEvent::SessionExpired) => {
                                    WatchOutcome::Failed(CoordinationError::SessionExpired)
                                }
                                Err(_) => WatchOutcome::Failed(CoordinationError::Closed),
                            },
                            _ = shutdown.recv() => WatchOutcome::Stop,
                        }
                    }
                    Err(e) => WatchOutcome::Failed(e),
                }
            };

            match outcome {
                WatchOutcome::Changed => {
                    tracing::debug!(path = %self.servers_path, "Backend membership changed");
                }
                WatchOutcome::Stop => break,
                WatchOutcome::Failed(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.delay(failures);
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        retry_in = ?delay,
                        "Membership watch failed, keeping last snapshot"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        tracing::info!("Membership watcher received shutdown signal, exiting loop");
    }
}

/// Result of applying one membership event.
#[derive(Debug)]
pub struct AppliedMembership {
    pub diff: MembershipDiff,
    /// One task per added backend; each yields whether the backend became healthy.
    pub connects: Vec<JoinHandle<bool>>,
}

/// Pool-facing half: applies snapshots to the [`BackendPool`].
pub struct MembershipSynchronizer {
    pool: Arc<BackendPool>,
    current: ArcSwap<MembershipSnapshot>,
}

impl MembershipSynchronizer {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self {
            pool,
            current: ArcSwap::from_pointee(MembershipSnapshot::default()),
        }
    }

    /// The last snapshot applied to the pool.
    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.current.load_full()
    }

    /// Reconcile the pool to `snapshot` and start dialing added backends.
    pub fn on_membership_event(&self, snapshot: MembershipSnapshot) -> AppliedMembership {
        let diff = self.pool.reconcile(&snapshot.members);

        let connects = diff
            .added
            .iter()
            .cloned()
            .map(|pending| {
                let pool = Arc::clone(&self.pool);
                tokio::spawn(async move { pool.complete_connect(pending).await })
            })
            .collect();

        if !diff.is_empty() {
            tracing::info!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                members = snapshot.len(),
                "Membership applied"
            );
        }
        metrics::record_membership_size(snapshot.len());
        self.current.store(Arc::new(snapshot));

        AppliedMembership { diff, connects }
    }

    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<MembershipEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        tracing::debug!(generation = event.generation, "Membership event received");
                        self.on_membership_event(event.snapshot);
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Membership synchronizer exiting");
    }
}
