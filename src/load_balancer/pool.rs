//! Backend pool management.
//!
//! # Responsibilities
//! - Own the registry, the dispatch cursor and the retry queue behind one lock
//! - Select healthy targets round-robin
//! - Open connections for new targets and reconnect failed ones
//! - Apply membership changes and failure reports
//!
//! The lock is a `parking_lot::Mutex` held only for state transitions. Dials
//! and payload I/O happen after it is released: callers get a [`TargetLease`]
//! or a [`PendingConnect`] and come back to the pool with the outcome.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::health::state::HealthState;
use crate::load_balancer::backend::{BackendConnection, BackendId};
use crate::load_balancer::error::{ForwardError, PoolError};
use crate::load_balancer::registry::Registry;
use crate::load_balancer::round_robin::RoundRobin;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// A failed identity waiting for the reconnection sweep.
#[derive(Debug)]
struct RetryTicket {
    backend: BackendId,
    not_before: Instant,
}

#[derive(Debug, Default)]
struct PoolState {
    registry: Registry,
    retry_queue: VecDeque<RetryTicket>,
}

/// A healthy target's connection, lent out for one forward operation.
#[derive(Debug, Clone)]
pub struct TargetLease {
    backend: BackendId,
    connection: Arc<BackendConnection>,
}

impl TargetLease {
    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    pub fn connection(&self) -> &BackendConnection {
        &self.connection
    }
}

/// A target that has entered Connecting/Reconnecting and needs a dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConnect {
    backend: BackendId,
    epoch: u64,
}

impl PendingConnect {
    pub fn backend(&self) -> &BackendId {
        &self.backend
    }
}

/// Result of reconciling the registry against a membership snapshot.
#[derive(Debug, Default)]
pub struct MembershipDiff {
    pub added: Vec<PendingConnect>,
    pub removed: Vec<BackendId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Point-in-time view of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub backend: BackendId,
    pub position: usize,
    pub state: HealthState,
    pub attempts: u32,
}

/// Manages the backend pool and load balancing.
#[derive(Debug)]
pub struct BackendPool {
    state: Mutex<PoolState>,
    cursor: RoundRobin,
    config: PoolConfig,
}

impl BackendPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            cursor: RoundRobin::new(),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pick the next healthy target.
    pub fn select(&self) -> Result<TargetLease, PoolError> {
        let state = self.state.lock();
        let position = self.cursor.next_healthy(&state.registry)?;
        let target = state.registry.get(position);
        match target.and_then(|t| t.connection().map(|c| (t.id(), c))) {
            Some((backend, connection)) => Ok(TargetLease {
                backend: backend.clone(),
                connection: Arc::clone(connection),
            }),
            None => Err(PoolError::NoHealthyTarget {
                probes: state.registry.len(),
            }),
        }
    }

    /// Report that a forward over `lease` failed.
    ///
    /// The target becomes Failed, its connection is closed and it is queued
    /// for the next sweep. Reports about a connection the target no longer
    /// owns are ignored. Returns true if the report changed the target.
    pub fn mark_failed(&self, lease: &TargetLease, error: &ForwardError) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let PoolState { registry, retry_queue } = &mut *state;

        let Some(target) = registry.lookup_mut(&lease.backend) else {
            tracing::debug!(backend = %lease.backend, "Failure reported for removed backend");
            return false;
        };
        if !target.forward_failed(lease.connection.id(), now) {
            return false;
        }

        retry_queue.push_back(RetryTicket {
            backend: lease.backend.clone(),
            not_before: now,
        });
        tracing::warn!(
            backend = %lease.backend,
            error = %error,
            timeout = error.is_timeout(),
            "Backend marked failed"
        );
        metrics::record_backend_health(&lease.backend.to_string(), false);
        true
    }

    /// Apply a membership snapshot: remove vanished identities (closing their
    /// connections) and add new ones in Connecting state. Identities present
    /// on both sides are left alone.
    pub fn reconcile(&self, desired: &BTreeSet<BackendId>) -> MembershipDiff {
        let mut state = self.state.lock();
        let PoolState { registry, retry_queue } = &mut *state;

        let current = registry.identities();
        let removed: Vec<BackendId> = current.difference(desired).cloned().collect();
        let to_add: Vec<BackendId> = desired.difference(&current).cloned().collect();

        for backend in &removed {
            registry.remove(backend);
            metrics::record_backend_health(&backend.to_string(), false);
            tracing::info!(backend = %backend, "Backend removed");
        }
        retry_queue.retain(|ticket| !removed.contains(&ticket.backend));

        let mut added = Vec::with_capacity(to_add.len());
        for backend in to_add {
            let target = registry.upsert(backend.clone());
            target.begin_attempt();
            tracing::info!(backend = %backend, "Backend added");
            added.push(PendingConnect {
                epoch: target.epoch(),
                backend,
            });
        }

        MembershipDiff { added, removed }
    }

    /// Move every Failed target whose cool-down has passed to Reconnecting,
    /// in queue order. Tickets that are not yet due keep their place.
    pub fn start_due_reconnects(&self, now: Instant) -> Vec<PendingConnect> {
        let mut state = self.state.lock();
        let PoolState { registry, retry_queue } = &mut *state;

        let mut due = Vec::new();
        let mut waiting = VecDeque::with_capacity(retry_queue.len());
        while let Some(ticket) = retry_queue.pop_front() {
            if ticket.not_before > now {
                waiting.push_back(ticket);
                continue;
            }
            // Tickets for removed, re-added or already recovered targets are dropped here.
            if let Some(target) = registry.lookup_mut(&ticket.backend) {
                if target.begin_attempt() {
                    due.push(PendingConnect {
                        epoch: target.epoch(),
                        backend: ticket.backend,
                    });
                }
            }
        }
        *retry_queue = waiting;
        due
    }

    /// Dial a pending target and record the outcome. Returns true if the
    /// target became Healthy.
    pub async fn complete_connect(&self, pending: PendingConnect) -> bool {
        let result = BackendConnection::open(&pending.backend, self.config.connect_timeout()).await;
        let now = Instant::now();

        let mut state = self.state.lock();
        let PoolState { registry, retry_queue } = &mut *state;

        let target = match registry.lookup_mut(&pending.backend) {
            Some(target) if target.epoch() == pending.epoch => target,
            _ => {
                tracing::debug!(backend = %pending.backend, "Backend removed while connecting");
                return false;
            }
        };

        match result {
            Ok(connection) => {
                let connection = Arc::new(connection);
                let id = connection.id();
                match target.connected(connection) {
                    Ok(()) => {
                        tracing::info!(backend = %pending.backend, connection = %id, "Backend connected");
                        metrics::record_reconnect_attempt(true);
                        metrics::record_backend_health(&pending.backend.to_string(), true);
                        true
                    }
                    Err(connection) => {
                        connection.retire();
                        false
                    }
                }
            }
            Err(e) => {
                let reconnecting = target.state() == HealthState::Reconnecting;
                if !target.connect_failed(now) {
                    return false;
                }
                let delay = if reconnecting {
                    calculate_backoff(
                        target.failed_reconnects(),
                        self.config.cooldown_ms,
                        self.config.max_cooldown_ms,
                    )
                } else {
                    Duration::ZERO
                };
                tracing::warn!(
                    backend = %pending.backend,
                    attempts = target.attempts(),
                    retry_in = ?delay,
                    error = %e,
                    "Backend connect failed"
                );
                metrics::record_reconnect_attempt(false);
                retry_queue.push_back(RetryTicket {
                    backend: pending.backend,
                    not_before: now + delay,
                });
                false
            }
        }
    }

    /// Close every backend connection and forget all targets.
    pub fn close_all(&self) {
        let mut state = self.state.lock();
        let PoolState { registry, retry_queue } = &mut *state;
        for backend in registry.identities() {
            registry.remove(&backend);
        }
        retry_queue.clear();
        tracing::info!("All backend connections closed");
    }

    pub fn state_of(&self, backend: &BackendId) -> Option<HealthState> {
        self.state.lock().registry.lookup(backend).map(|t| t.state())
    }

    pub fn healthy_count(&self) -> usize {
        self.state.lock().registry.healthy_count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().registry.is_empty()
    }

    pub fn pending_retries(&self) -> usize {
        self.state.lock().retry_queue.len()
    }

    /// Targets in round-robin order.
    pub fn status(&self) -> Vec<TargetStatus> {
        let state = self.state.lock();
        state
            .registry
            .iter()
            .enumerate()
            .map(|(position, t)| TargetStatus {
                backend: t.id().clone(),
                position,
                state: t.state(),
                attempts: t.attempts(),
            })
            .collect()
    }
}
