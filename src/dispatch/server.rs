//! Client accept loop.
//!
//! # Responsibilities
//! - Accept client connections within the listener's connection limit
//! - Spawn one task per client running the dispatcher
//! - On shutdown: stop accepting, then drain in-flight clients

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::Instrument;

use crate::dispatch::dispatcher::Dispatcher;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{AcceptedClient, Listener, ListenerError};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

pub struct DispatchServer {
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl DispatchServer {
    pub fn new(listener: Listener, dispatcher: Arc<Dispatcher>, drain_timeout: Duration) -> Self {
        Self {
            listener,
            dispatcher,
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until shutdown, then wait (bounded) for in-flight clients.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            max_connections = self.listener.max_connections(),
            "Dispatch server accepting"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(AcceptedClient { stream, peer, slot }) => {
                        let guard = self.tracker.track();
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let span = tracing::info_span!("client", peer = %peer, connection = %guard.id());
                        tokio::spawn(
                            async move {
                                let _slot = slot;
                                let _guard = guard;
                                dispatcher.handle_connection(stream, peer).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Dispatch server received shutdown signal, no longer accepting");
                    break;
                }
            }
        }

        // Close the listening socket before draining.
        drop(self.listener);
        let in_flight = self.tracker.active_count();
        if in_flight > 0 {
            tracing::info!(in_flight, timeout = ?self.drain_timeout, "Draining client connections");
        }
        if tokio::time::timeout(self.drain_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed with clients still in flight"
            );
        }
    }
}
