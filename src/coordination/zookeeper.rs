//! Coordinator backed by a ZooKeeper ensemble.
//!
//! Thin adapter over `zookeeper-client`: node creation maps onto its create
//! modes with open ACLs, and its one-shot children watcher is forwarded into
//! a [`ChildWatch`]. Reconnects inside the session timeout are handled by the
//! client; callers only see the errors it gives up on.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use zookeeper_client as zk;

use crate::coordination::{ChildWatch, CoordinationError, Coordinator, CreateMode, WatchEvent};

/// One ZooKeeper session. Ephemeral nodes live until [`Coordinator::close`]
/// or session expiry.
pub struct ZooKeeperSession {
    servers: String,
    client: Mutex<Option<zk::Client>>,
}

impl ZooKeeperSession {
    /// Establish a session with the ensemble listed in `servers`.
    pub async fn connect(servers: &str, session_timeout: Duration) -> Result<Self, CoordinationError> {
        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connect(servers)
            .await
            .map_err(|e| map_error(servers, e))?;
        tracing::info!(servers, session_timeout = ?session_timeout, "ZooKeeper session established");
        Ok(Self {
            servers: servers.to_string(),
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> Result<zk::Client, CoordinationError> {
        self.client.lock().clone().ok_or(CoordinationError::Closed)
    }
}

fn create_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
    }
}

fn map_error(path: &str, error: zk::Error) -> CoordinationError {
    match error {
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss => CoordinationError::ConnectionLoss,
        zk::Error::SessionExpired => CoordinationError::SessionExpired,
        zk::Error::ClientClosed => CoordinationError::Closed,
        other => CoordinationError::Rejected(other.to_string()),
    }
}

/// Translate a fired watcher. `None` means the session ended without an
/// expiry, which the receiver sees as a closed channel.
fn watch_event(path: &str, event: &zk::WatchedEvent) -> Option<WatchEvent> {
    match event.event_type {
        zk::EventType::Session => match event.session_state {
            zk::SessionState::Expired => Some(WatchEvent::SessionExpired),
            _ => None,
        },
        _ => Some(WatchEvent::ChildrenChanged {
            path: path.to_string(),
        }),
    }
}

#[async_trait]
impl Coordinator for ZooKeeperSession {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), CoordinationError> {
        let client = self.client()?;
        let options = create_mode(mode).with_acls(zk::Acls::anyone_all());
        client
            .create(path, data, &options)
            .await
            .map(|_| ())
            .map_err(|e| map_error(path, e))
    }

    async fn children_with_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let client = self.client()?;
        let (children, watcher) = client
            .list_and_watch_children(path)
            .await
            .map_err(|e| map_error(path, e))?;

        let (tx, rx) = oneshot::channel();
        let watched = path.to_string();
        tokio::spawn(async move {
            let event = watcher.changed().await;
            if let Some(event) = watch_event(&watched, &event) {
                let _ = tx.send(event);
            }
        });
        Ok((children, rx))
    }

    async fn close(&self) {
        // The session is closed once the last client handle is dropped.
        if self.client.lock().take().is_some() {
            tracing::info!(servers = %self.servers, "ZooKeeper session closed");
        }
    }
}
