//! Per-client request forwarding.
//!
//! # Responsibilities
//! - Read one request with a single bounded receive
//! - Select a healthy backend and exchange the payload over its connection
//! - Relay the response, then close the client
//! - Report backend failures to the pool
//!
//! Bytes are forwarded as received; the balancer does not frame or inspect
//! the protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::DispatchConfig;
use crate::load_balancer::backend::BackendId;
use crate::load_balancer::error::ForwardError;
use crate::load_balancer::pool::BackendPool;
use crate::observability::metrics;
use crate::resilience::timeouts::io_deadline;

/// How one client cycle ended.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The backend's response was relayed to the client.
    Forwarded {
        backend: BackendId,
        request_bytes: usize,
        response_bytes: usize,
    },
    /// The client closed before sending anything.
    ClientClosed,
    /// Reading from or writing to the client failed.
    ClientError(std::io::Error),
    /// No backend was healthy; the client is closed without a response.
    Unavailable,
    /// The exchange with the selected backend failed.
    BackendFailed {
        backend: BackendId,
        error: ForwardError,
    },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Forwarded { .. } => "forwarded",
            DispatchOutcome::ClientClosed => "client_closed",
            DispatchOutcome::ClientError(_) => "client_error",
            DispatchOutcome::Unavailable => "unavailable",
            DispatchOutcome::BackendFailed { .. } => "backend_failed",
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, DispatchOutcome::Forwarded { .. })
    }
}

pub struct Dispatcher {
    pool: Arc<BackendPool>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(pool: Arc<BackendPool>, config: DispatchConfig) -> Self {
        Self { pool, config }
    }

    /// Serve one request/response cycle. The client connection is always
    /// closed before this returns.
    pub async fn handle_connection(&self, mut client: TcpStream, peer: SocketAddr) -> DispatchOutcome {
        let start = Instant::now();
        let outcome = self.forward_once(&mut client).await;

        if let Err(e) = io_deadline(self.config.client_timeout(), client.shutdown()).await {
            tracing::debug!(peer = %peer, error = %e, "Client shutdown failed");
        }
        drop(client);

        match &outcome {
            DispatchOutcome::Forwarded {
                backend,
                request_bytes,
                response_bytes,
            } => {
                tracing::debug!(
                    peer = %peer,
                    backend = %backend,
                    request_bytes,
                    response_bytes,
                    elapsed = ?start.elapsed(),
                    "Request forwarded"
                );
            }
            DispatchOutcome::ClientClosed => {
                tracing::debug!(peer = %peer, "Client closed without sending");
            }
            DispatchOutcome::ClientError(e) => {
                tracing::debug!(peer = %peer, error = %e, "Client I/O failed");
            }
            DispatchOutcome::Unavailable => {
                tracing::warn!(peer = %peer, "No healthy backend, closing client");
            }
            DispatchOutcome::BackendFailed { backend, error } => {
                tracing::warn!(peer = %peer, backend = %backend, error = %error, "Forward failed");
            }
        }
        metrics::record_dispatch(outcome.as_str(), start);
        outcome
    }

    async fn forward_once(&self, client: &mut TcpStream) -> DispatchOutcome {
        let client_timeout = self.config.client_timeout();

        let mut request = vec![0u8; self.config.max_payload_bytes];
        let n = match io_deadline(client_timeout, client.read(&mut request)).await {
            Ok(0) => return DispatchOutcome::ClientClosed,
            Ok(n) => n,
            Err(e) => return DispatchOutcome::ClientError(e),
        };
        request.truncate(n);

        let lease = match self.pool.select() {
            Ok(lease) => lease,
            Err(e) => {
                tracing::debug!(error = %e, "Target selection failed");
                return DispatchOutcome::Unavailable;
            }
        };

        let exchange = lease
            .connection()
            .exchange(&request, self.config.max_payload_bytes, self.config.backend_timeout())
            .await;

        match exchange {
            Ok(response) => {
                if response.truncated {
                    // Report before relaying so the sweep replaces the
                    // connection even if the client write fails.
                    let error = ForwardError::ResponseOverflow {
                        limit: self.config.max_payload_bytes,
                    };
                    self.pool.mark_failed(&lease, &error);
                }
                if let Err(e) = io_deadline(client_timeout, client.write_all(&response.bytes)).await {
                    return DispatchOutcome::ClientError(e);
                }
                DispatchOutcome::Forwarded {
                    backend: lease.backend().clone(),
                    request_bytes: n,
                    response_bytes: response.bytes.len(),
                }
            }
            Err(error) => {
                if error.is_backend_fault() {
                    self.pool.mark_failed(&lease, &error);
                }
                DispatchOutcome::BackendFailed {
                    backend: lease.backend().clone(),
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::health::state::HealthState;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// A dispatcher in front of one backend, plus the backend's side of the
    /// pooled connection.
    async fn single_backend() -> (Dispatcher, Arc<BackendPool>, BackendId, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let id = BackendId::new("127.0.0.1", listener.local_addr().unwrap().port());
        let pool = Arc::new(BackendPool::new(PoolConfig::default()));
        for pending in pool.reconcile(&[id.clone()].into_iter().collect()).added {
            assert!(pool.complete_connect(pending).await);
        }
        let (backend_side, _) = listener.accept().await.unwrap();
        let dispatcher = Dispatcher::new(
            pool.clone(),
            DispatchConfig {
                backend_timeout_ms: 200,
                ..DispatchConfig::default()
            },
        );
        (dispatcher, pool, id, backend_side)
    }

    /// Connected (client, server-side) pair standing in for an accepted client.
    async fn client_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_side, peer) = accepted.unwrap();
        (client.unwrap(), server_side, peer)
    }

    #[tokio::test]
    async fn relays_request_and_response() {
        let (dispatcher, _pool, id, mut backend) = single_backend().await;
        let (mut client, accepted, peer) = client_pair().await;

        client.write_all(b"ping").await.unwrap();
        let echo = async {
            let mut buf = [0u8; 64];
            let n = backend.read(&mut buf).await.unwrap();
            backend.write_all(&buf[..n]).await.unwrap();
        };
        let (outcome, ()) = tokio::join!(dispatcher.handle_connection(accepted, peer), echo);

        match outcome {
            DispatchOutcome::Forwarded { backend, request_bytes, response_bytes } => {
                assert_eq!(backend, id);
                assert_eq!((request_bytes, response_bytes), (4, 4));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn empty_client_is_not_an_error() {
        let (dispatcher, pool, id, _backend) = single_backend().await;
        let (client, accepted, peer) = client_pair().await;
        drop(client);

        let outcome = dispatcher.handle_connection(accepted, peer).await;
        assert!(matches!(outcome, DispatchOutcome::ClientClosed));
        assert_eq!(pool.state_of(&id), Some(HealthState::Healthy));
    }

    #[tokio::test]
    async fn no_healthy_backend_closes_client_without_response() {
        let pool = Arc::new(BackendPool::new(PoolConfig::default()));
        let dispatcher = Dispatcher::new(pool, DispatchConfig::default());
        let (mut client, accepted, peer) = client_pair().await;
        client.write_all(b"ping").await.unwrap();

        let outcome = dispatcher.handle_connection(accepted, peer).await;
        assert!(matches!(outcome, DispatchOutcome::Unavailable));
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn backend_close_marks_target_failed() {
        let (dispatcher, pool, id, backend) = single_backend().await;
        drop(backend);
        let (mut client, accepted, peer) = client_pair().await;
        client.write_all(b"ping").await.unwrap();

        let outcome = dispatcher.handle_connection(accepted, peer).await;
        assert!(matches!(outcome, DispatchOutcome::BackendFailed { .. }));
        assert_eq!(pool.state_of(&id), Some(HealthState::Failed));
        assert_eq!(pool.pending_retries(), 1);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn silent_backend_times_out_and_fails() {
        let (dispatcher, pool, id, _backend) = single_backend().await;
        let (mut client, accepted, peer) = client_pair().await;
        client.write_all(b"ping").await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.handle_connection(accepted, peer),
        )
        .await
        .unwrap();
        match outcome {
            DispatchOutcome::BackendFailed { error, .. } => assert!(error.is_timeout()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(pool.state_of(&id), Some(HealthState::Failed));
    }

    #[tokio::test]
    async fn oversized_response_is_relayed_and_connection_replaced() {
        let (dispatcher, pool, id, mut backend) = single_backend().await;
        let (mut client, accepted, peer) = client_pair().await;
        client.write_all(b"secret").await.unwrap();

        let reply = async {
            let mut buf = [0u8; 64];
            backend.read(&mut buf).await.unwrap();
            backend.write_all(&[b'S'; 1500]).await.unwrap();
        };
        let (outcome, ()) = tokio::join!(dispatcher.handle_connection(accepted, peer), reply);
        match outcome {
            DispatchOutcome::Forwarded { response_bytes, .. } => assert_eq!(response_bytes, 1024),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![b'S'; 1024]);

        // The rest of the reply stays behind on a connection nobody selects.
        assert_eq!(pool.state_of(&id), Some(HealthState::Failed));
        assert_eq!(pool.pending_retries(), 1);
        assert!(pool.select().is_err());
    }

    #[tokio::test]
    async fn oversized_request_is_forwarded_in_one_bounded_chunk() {
        let (dispatcher, _pool, _id, mut backend) = single_backend().await;
        let (mut client, accepted, peer) = client_pair().await;
        client.write_all(&vec![b'x'; 4096]).await.unwrap();

        let echo = async {
            let mut buf = vec![0u8; 8192];
            let n = backend.read(&mut buf).await.unwrap();
            backend.write_all(&buf[..n]).await.unwrap();
            n
        };
        let (outcome, seen) = tokio::join!(dispatcher.handle_connection(accepted, peer), echo);
        assert!(seen <= 1024);
        match outcome {
            DispatchOutcome::Forwarded { request_bytes, .. } => assert_eq!(request_bytes, seen),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
