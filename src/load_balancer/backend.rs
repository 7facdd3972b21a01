//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server by its `host:port` identity
//! - Own the persistent connection to it
//! - Track health state, last failure and connect attempts
//!
//! A [`BackendTarget`] is only ever touched while the pool lock is held. The
//! connection inside it is reference counted so a dispatcher can keep using
//! it for one exchange after the lock is released; the socket closes when the
//! last holder lets go.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::health::state::{HealthEvent, HealthState};
use crate::load_balancer::error::{ConnectError, ForwardError};
use crate::net::connection::ConnectionId;
use crate::resilience::timeouts::io_deadline;

/// Identity of a backend: host and port, unique within the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId {
    host: String,
    port: u16,
}

impl BackendId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A persistent TCP connection to one backend.
#[derive(Debug)]
pub struct BackendConnection {
    id: ConnectionId,
    backend: BackendId,
    stream: AsyncMutex<TcpStream>,
    retired: AtomicBool,
}

impl BackendConnection {
    /// Dial the backend, bounded by `timeout`.
    pub async fn open(backend: &BackendId, timeout: Duration) -> Result<Self, ConnectError> {
        let dial = TcpStream::connect((backend.host(), backend.port()));
        let stream = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ConnectError::Io {
                    backend: backend.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    backend: backend.clone(),
                    after: timeout,
                })
            }
        };
        // Request/response payloads are small; do not batch them.
        let _ = stream.set_nodelay(true);
        Ok(Self::from_stream(backend.clone(), stream))
    }

    pub fn from_stream(backend: BackendId, stream: TcpStream) -> Self {
        Self {
            id: ConnectionId::new(),
            backend,
            stream: AsyncMutex::new(stream),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// Mark the connection unusable. Idempotent.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Write one request and read one response of at most `max_response` bytes.
    ///
    /// Exchanges on the same connection run one at a time so responses are
    /// never handed to the wrong client. Waiting for the connection counts
    /// against `io_timeout` too. A read that fills the whole buffer may have
    /// left part of the reply on the socket, so the connection is retired
    /// before the next exchange can pick it up.
    pub async fn exchange(
        &self,
        request: &[u8],
        max_response: usize,
        io_timeout: Duration,
    ) -> Result<Response, ForwardError> {
        let mut stream = tokio::time::timeout(io_timeout, self.stream.lock())
            .await
            .map_err(|_| ForwardError::Busy { waited: io_timeout })?;
        if self.is_retired() {
            return Err(ForwardError::Retired);
        }

        io_deadline(io_timeout, stream.write_all(request))
            .await
            .map_err(ForwardError::Write)?;

        let mut bytes = vec![0u8; max_response];
        let n = io_deadline(io_timeout, stream.read(&mut bytes))
            .await
            .map_err(ForwardError::Read)?;
        if n == 0 {
            return Err(ForwardError::BackendClosed);
        }
        bytes.truncate(n);

        let truncated = n == max_response;
        if truncated {
            self.retire();
            tracing::debug!(backend = %self.backend, connection = %self.id, limit = max_response, "Response filled the buffer, connection retired");
        }
        Ok(Response { bytes, truncated })
    }
}

/// Bytes read back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub bytes: Vec<u8>,
    /// The reply reached the size limit. The connection that carried it has
    /// been retired and must be reported to the pool.
    pub truncated: bool,
}

/// One backend tracked by the registry.
#[derive(Debug)]
pub struct BackendTarget {
    id: BackendId,
    /// Distinguishes a re-added identity from the one that was removed.
    epoch: u64,
    state: HealthState,
    connection: Option<Arc<BackendConnection>>,
    last_failure: Option<Instant>,
    attempts: u32,
    failed_reconnects: u32,
}

impl BackendTarget {
    pub(crate) fn new(id: BackendId, epoch: u64) -> Self {
        Self {
            id,
            epoch,
            state: HealthState::Unconnected,
            connection: None,
            last_failure: None,
            attempts: 0,
            failed_reconnects: 0,
        }
    }

    pub fn id(&self) -> &BackendId {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_dispatchable()
    }

    /// Consecutive failed connect attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Failed attempts made from Reconnecting since the last success. The
    /// first dial of a new identity does not count.
    pub fn failed_reconnects(&self) -> u32 {
        self.failed_reconnects
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn connection(&self) -> Option<&Arc<BackendConnection>> {
        self.connection.as_ref()
    }

    fn apply(&mut self, event: HealthEvent) -> bool {
        match self.state.on(event) {
            Some(next) => {
                tracing::debug!(backend = %self.id, from = %self.state, to = %next, "Backend state change");
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// Enter Connecting/Reconnecting. False if an attempt is not allowed now.
    pub(crate) fn begin_attempt(&mut self) -> bool {
        self.apply(HealthEvent::Attempt)
    }

    /// Install a fresh connection. Returns the connection back if the target
    /// was not waiting for one.
    pub(crate) fn connected(
        &mut self,
        connection: Arc<BackendConnection>,
    ) -> Result<(), Arc<BackendConnection>> {
        if !self.apply(HealthEvent::Connected) {
            return Err(connection);
        }
        self.connection = Some(connection);
        self.attempts = 0;
        self.failed_reconnects = 0;
        Ok(())
    }

    pub(crate) fn connect_failed(&mut self, at: Instant) -> bool {
        let reconnecting = self.state == HealthState::Reconnecting;
        if !self.apply(HealthEvent::ConnectFailed) {
            return false;
        }
        self.attempts = self.attempts.saturating_add(1);
        if reconnecting {
            self.failed_reconnects = self.failed_reconnects.saturating_add(1);
        }
        self.last_failure = Some(at);
        true
    }

    /// Fail the target if `connection` is still the one it owns.
    pub(crate) fn forward_failed(&mut self, connection: ConnectionId, at: Instant) -> bool {
        let owns = self.connection.as_ref().map(|c| c.id()) == Some(connection);
        if !owns || !self.apply(HealthEvent::ForwardFailed) {
            return false;
        }
        self.last_failure = Some(at);
        self.close();
        true
    }

    /// Drop the owned connection, if any. Safe to call repeatedly.
    pub(crate) fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.retire();
            tracing::debug!(backend = %self.id, connection = %connection.id(), "Backend connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (BackendConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let id = BackendId::new("127.0.0.1", addr.port());
        let (conn, accepted) = tokio::join!(
            BackendConnection::open(&id, Duration::from_secs(1)),
            listener.accept()
        );
        (conn.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn identity_display() {
        assert_eq!(BackendId::new("10.0.0.1", 5000).to_string(), "10.0.0.1:5000");
        assert_eq!(BackendId::new("::1", 5000).to_string(), "[::1]:5000");
    }

    #[tokio::test]
    async fn healthy_target_owns_exactly_one_connection() {
        let (conn, _peer) = connected_pair().await;
        let conn = Arc::new(conn);
        let mut target = BackendTarget::new(BackendId::new("127.0.0.1", 1), 1);

        assert!(target.connected(conn.clone()).is_err(), "must attempt before connecting");
        assert!(target.begin_attempt());
        target.connected(conn.clone()).unwrap();
        assert!(target.is_healthy());
        assert_eq!(target.connection().map(|c| c.id()), Some(conn.id()));
    }

    #[tokio::test]
    async fn stale_failure_reports_are_ignored() {
        let (conn, _peer) = connected_pair().await;
        let conn = Arc::new(conn);
        let mut target = BackendTarget::new(BackendId::new("127.0.0.1", 1), 1);
        target.begin_attempt();
        target.connected(conn.clone()).unwrap();

        assert!(!target.forward_failed(ConnectionId::new(), Instant::now()));
        assert!(target.is_healthy());

        assert!(target.forward_failed(conn.id(), Instant::now()));
        assert_eq!(target.state(), HealthState::Failed);
        assert!(target.connection().is_none());
        assert!(conn.is_retired());

        // Second report for the same connection changes nothing.
        assert!(!target.forward_failed(conn.id(), Instant::now()));
        target.close();
    }

    #[test]
    fn connect_failures_count_attempts() {
        let mut target = BackendTarget::new(BackendId::new("127.0.0.1", 1), 1);
        target.begin_attempt();
        assert!(target.connect_failed(Instant::now()));
        target.begin_attempt();
        assert_eq!(target.state(), HealthState::Reconnecting);
        assert!(target.connect_failed(Instant::now()));
        assert_eq!(target.attempts(), 2);
        assert_eq!(target.failed_reconnects(), 1, "first dial is not a reconnect");
        assert!(target.last_failure().is_some());
    }

    #[tokio::test]
    async fn exchange_round_trips_one_chunk() {
        let (conn, mut peer) = connected_pair().await;
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            let mut reply = b"re:".to_vec();
            reply.extend_from_slice(&buf[..n]);
            peer.write_all(&reply).await.unwrap();
            peer
        });

        let response = conn.exchange(b"ping", 64, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.bytes, b"re:ping");
        assert!(!response.truncated);
        assert!(!conn.is_retired());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn reply_filling_the_buffer_retires_connection() {
        let (conn, mut peer) = connected_pair().await;
        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            peer.read(&mut buf).await.unwrap();
            peer.write_all(&[b'S'; 40]).await.unwrap();
            peer
        });

        let response = conn.exchange(b"secret", 16, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.bytes, vec![b'S'; 16]);
        assert!(response.truncated);
        assert!(conn.is_retired());

        // The 24 unread bytes are never handed to the next request.
        let err = conn.exchange(b"public", 16, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Retired));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn waiting_for_a_busy_connection_is_bounded() {
        let (conn, _peer) = connected_pair().await;
        let held = conn.stream.lock().await;

        let err = conn.exchange(b"ping", 64, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Busy { .. }));
        assert!(!err.is_backend_fault());
        assert!(!conn.is_retired());
        drop(held);
    }

    #[tokio::test]
    async fn exchange_reports_backend_close() {
        let (conn, peer) = connected_pair().await;
        drop(peer);
        let err = conn.exchange(b"ping", 64, Duration::from_secs(1)).await.unwrap_err();
        assert!(
            matches!(err, ForwardError::BackendClosed | ForwardError::Read(_) | ForwardError::Write(_)),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn exchange_times_out_on_silent_backend() {
        let (conn, _peer) = connected_pair().await;
        let err = conn.exchange(b"ping", 64, Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn retired_connection_is_never_reused() {
        let (conn, _peer) = connected_pair().await;
        conn.retire();
        conn.retire();
        let err = conn.exchange(b"ping", 64, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Retired));
    }

    #[tokio::test]
    async fn unreachable_backend_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = BackendConnection::open(&BackendId::new("127.0.0.1", port), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
    }
}
