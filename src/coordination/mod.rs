//! Coordination service contract.
//!
//! # Data Flow
//! ```text
//! Membership synchronizer → children_with_watch(servers root)
//!     → one-shot ChildWatch fires on add/remove → re-arm
//!
//! Self-registration → ensure_path(balancers root)
//!     → create_ephemeral(root/host:port)
//!     → record lives as long as the session
//! ```
//!
//! # Design Decisions
//! - ZooKeeper semantics: persistent and ephemeral nodes, one-shot watches
//! - Sessions own their ephemeral nodes; closing or expiring a session
//!   removes them
//! - `zookeeper.rs` talks to a real ensemble; `memory.rs` provides an
//!   in-process one for tests and standalone runs

pub mod memory;
pub mod zookeeper;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

pub use memory::{MemoryEnsemble, MemorySession};
pub use zookeeper::ZooKeeperSession;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("node {0} does not exist")]
    NoNode(String),

    #[error("node {0} already exists")]
    NodeExists(String),

    #[error("connection to coordination service lost")]
    ConnectionLoss,

    #[error("coordination session expired")]
    SessionExpired,

    #[error("coordination session closed")]
    Closed,

    /// Any other refusal from the service (auth, bad arguments, ...).
    #[error("coordination request rejected: {0}")]
    Rejected(String),
}

impl CoordinationError {
    /// Whether a later attempt with the same session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::ConnectionLoss | CoordinationError::NodeExists(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
}

/// Delivered at most once per armed watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    ChildrenChanged { path: String },
    SessionExpired,
}

/// Receiver side of a one-shot children watch. Resolves with an error if the
/// session is closed before the watch fires.
pub type ChildWatch = oneshot::Receiver<WatchEvent>;

/// One session with a ZooKeeper-compatible coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), CoordinationError>;

    /// List the children of `path` and arm a one-shot watch on them.
    async fn children_with_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError>;

    /// End the session. Ephemeral nodes it owns are removed.
    async fn close(&self);

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.create(path, data, CreateMode::Ephemeral).await
    }

    /// Create `path` and any missing ancestors as persistent nodes.
    async fn ensure_path(&self, path: &str) -> Result<(), CoordinationError> {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            match self.create(&prefix, &[], CreateMode::Persistent).await {
                Ok(()) | Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Path of child `name` under `parent`.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}
