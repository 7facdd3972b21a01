//! In-process coordination ensemble.
//!
//! A small ZooKeeper model: a tree of persistent and ephemeral nodes, sessions
//! that own their ephemerals, one-shot children watches and an availability
//! switch. All sessions handed out by one [`MemoryEnsemble`] share its tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::coordination::{ChildWatch, CoordinationError, Coordinator, CreateMode, WatchEvent};

type SessionId = u64;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Active,
    Expired,
    Closed,
}

#[derive(Debug)]
struct Watch {
    session: SessionId,
    tx: oneshot::Sender<WatchEvent>,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<Watch>>,
    sessions: HashMap<SessionId, SessionStatus>,
    next_session: SessionId,
    available: bool,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    path.rfind('/').map_or(path, |i| &path[i + 1..])
}

fn is_valid_path(path: &str) -> bool {
    path == "/" || (path.starts_with('/') && path[1..].split('/').all(|s| !s.is_empty()))
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                owner: None,
            },
        );
        Self {
            nodes,
            watches: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 0,
            available: true,
        }
    }

    fn check_session(&self, session: SessionId) -> Result<(), CoordinationError> {
        match self.sessions.get(&session) {
            Some(SessionStatus::Expired) => return Err(CoordinationError::SessionExpired),
            Some(SessionStatus::Closed) | None => return Err(CoordinationError::Closed),
            Some(SessionStatus::Active) => {}
        }
        if !self.available {
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(())
    }

    fn create(&mut self, path: &str, data: &[u8], owner: Option<SessionId>) -> Result<(), CoordinationError> {
        if !is_valid_path(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if self.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !self.nodes.contains_key(parent) {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }

        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
        let parent = parent.to_string();
        self.fire_children(&parent);
        Ok(())
    }

    /// Remove `path` and everything below it.
    fn delete(&mut self, path: &str) -> Result<(), CoordinationError> {
        if path == "/" || !self.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        for child in self.children(path)? {
            self.delete(&format!("{path}/{child}"))?;
        }
        self.nodes.remove(path);
        let parent = parent_of(path).to_string();
        self.fire_children(&parent);
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        if !self.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(self
            .nodes
            .keys()
            .filter(|key| key.as_str() != "/" && parent_of(key) == path)
            .map(|key| name_of(key).to_string())
            .collect())
    }

    fn fire_children(&mut self, parent: &str) {
        if let Some(watches) = self.watches.remove(parent) {
            for watch in watches {
                let _ = watch.tx.send(WatchEvent::ChildrenChanged {
                    path: parent.to_string(),
                });
            }
        }
    }

    fn end_session(&mut self, session: SessionId, status: SessionStatus) {
        match self.sessions.get(&session) {
            Some(SessionStatus::Active) => {}
            _ => return,
        }
        self.sessions.insert(session, status);

        // The session's own watches hear about the expiry, not about its ephemerals going away.
        for watches in self.watches.values_mut() {
            let (own, others): (Vec<Watch>, Vec<Watch>) =
                watches.drain(..).partition(|w| w.session == session);
            *watches = others;
            if status == SessionStatus::Expired {
                for watch in own {
                    let _ = watch.tx.send(WatchEvent::SessionExpired);
                }
            }
        }
        self.watches.retain(|_, watches| !watches.is_empty());

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete(&path);
        }
    }
}

/// Shared handle to an in-process ensemble.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Open a new client session.
    pub fn session(&self) -> MemorySession {
        let mut tree = self.tree.lock();
        tree.next_session += 1;
        let id = tree.next_session;
        tree.sessions.insert(id, SessionStatus::Active);
        MemorySession {
            id,
            tree: Arc::clone(&self.tree),
        }
    }

    /// While unavailable every session call fails with `ConnectionLoss`.
    /// Administrative calls on the ensemble itself keep working.
    pub fn set_available(&self, available: bool) {
        self.tree.lock().available = available;
        tracing::debug!(available, "Coordination ensemble availability changed");
    }

    pub fn create_persistent(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.tree.lock().create(path, data, None)
    }

    pub fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        self.tree.lock().delete(path)
    }

    pub fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.tree.lock().children(path)
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.tree.lock().nodes.get(path).map(|node| node.data.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().nodes.contains_key(path)
    }

    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.tree
            .lock()
            .nodes
            .get(path)
            .is_some_and(|node| node.owner.is_some())
    }
}

/// One client session on a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Simulate session expiry: ephemerals are removed and this session's
    /// pending watches receive [`WatchEvent::SessionExpired`].
    pub fn expire(&self) {
        self.tree.lock().end_session(self.id, SessionStatus::Expired);
        tracing::debug!(session = self.id, "Coordination session expired");
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<(), CoordinationError> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.id),
        };
        tree.create(path, data, owner)
    }

    async fn children_with_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let children = tree.children(path)?;
        let (tx, rx) = oneshot::channel();
        tree.watches.entry(path.to_string()).or_default().push(Watch {
            session: self.id,
            tx,
        });
        Ok((children, rx))
    }

    async fn close(&self) {
        self.tree.lock().end_session(self.id, SessionStatus::Closed);
        tracing::debug!(session = self.id, "Coordination session closed");
    }
}
