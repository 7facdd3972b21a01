//! Startup orchestration.
//!
//! # Responsibilities
//! - Verify the coordination service is reachable
//! - Start membership synchronization and the reconnect sweep
//! - Bind the client listener and register this balancer
//! - Begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: an unreachable coordination service, an unbindable port or a
//!   failed registration is fatal
//! - Subsystems start in order, not concurrently
//! - The accept loop starts last (traffic only when registered)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BalancerConfig;
use crate::coordination::{CoordinationError, Coordinator};
use crate::discovery::registration::{advertise_address, SelfRegistration};
use crate::discovery::synchronizer::{MembershipSynchronizer, MembershipWatcher};
use crate::dispatch::{DispatchServer, Dispatcher};
use crate::health::reconnect::ReconnectSweep;
use crate::lifecycle::Shutdown;
use crate::load_balancer::pool::BackendPool;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::resilience::retries::RetryPolicy;

/// Capacity of the membership event channel.
const MEMBERSHIP_EVENT_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("coordination service unavailable: {0}")]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Handle to a started balancer.
pub struct RunningBalancer {
    local_addr: SocketAddr,
    advertised: String,
    pool: Arc<BackendPool>,
    synchronizer: Arc<MembershipSynchronizer>,
    tracker: ConnectionTracker,
    coordinator: Arc<dyn Coordinator>,
    server: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

/// Start every subsystem. Tasks stop when `shutdown` is triggered; call
/// [`RunningBalancer::wait`] afterwards to finish the teardown.
pub async fn launch(
    config: BalancerConfig,
    coordinator: Arc<dyn Coordinator>,
    shutdown: &Shutdown,
) -> Result<RunningBalancer, StartupError> {
    let coordination = &config.coordination;
    let retry = RetryPolicy::new(coordination.retry_base_ms, coordination.retry_max_ms);

    // 1. Coordination session must answer before anything else starts.
    retry
        .with_max_attempts(coordination.startup_attempts)
        .run("coordination connect", CoordinationError::is_transient, || {
            let coordinator = Arc::clone(&coordinator);
            let path = coordination.servers_path.clone();
            async move { coordinator.ensure_path(&path).await }
        })
        .await?;

    // 2. Pool, membership and reconnection.
    let pool = Arc::new(BackendPool::new(config.pool.clone()));
    let synchronizer = Arc::new(MembershipSynchronizer::new(Arc::clone(&pool)));
    let (events_tx, events_rx) = mpsc::channel(MEMBERSHIP_EVENT_BUFFER);

    let mut background = Vec::new();
    background.push(tokio::spawn(
        Arc::clone(&synchronizer).run(events_rx, shutdown.subscribe()),
    ));
    background.push(tokio::spawn(
        MembershipWatcher::new(
            Arc::clone(&coordinator),
            coordination.servers_path.clone(),
            retry,
            events_tx,
        )
        .run(shutdown.subscribe()),
    ));
    background.push(tokio::spawn(
        ReconnectSweep::new(Arc::clone(&pool)).run(shutdown.subscribe()),
    ));

    // 3. Listener, then self-registration.
    let listener = match Listener::bind(&config.listener).await {
        Ok(listener) => listener,
        Err(e) => {
            abort_all(&background);
            return Err(e.into());
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            abort_all(&background);
            return Err(StartupError::LocalAddr(e));
        }
    };

    let advertised = advertise_address(coordination.advertise_address.as_deref(), local_addr).await;
    if let Err(e) = SelfRegistration::new(Arc::clone(&coordinator), coordination)
        .register(&advertised)
        .await
    {
        abort_all(&background);
        pool.close_all();
        return Err(e.into());
    }

    // 4. Traffic.
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pool), config.dispatch.clone()));
    let server = DispatchServer::new(listener, dispatcher, config.shutdown.drain_timeout());
    let tracker = server.tracker();
    let server = tokio::spawn(server.run(shutdown.subscribe()));

    tracing::info!(
        address = %local_addr,
        advertised = %advertised,
        servers_path = %coordination.servers_path,
        "Balancer started"
    );

    Ok(RunningBalancer {
        local_addr,
        advertised,
        pool,
        synchronizer,
        tracker,
        coordinator,
        server,
        background,
    })
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

impl RunningBalancer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The `host:port` published under the balancers root.
    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn synchronizer(&self) -> &Arc<MembershipSynchronizer> {
        &self.synchronizer
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for the tasks to observe shutdown, then close backend connections
    /// and the coordination session.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "Dispatch server task failed");
        }
        for task in self.background {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }
        self.pool.close_all();
        self.coordinator.close().await;
        tracing::info!("Balancer stopped");
    }
}
