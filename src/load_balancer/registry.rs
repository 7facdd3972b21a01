//! Backend target registry.
//!
//! An ordered list of targets (the round-robin order) plus an identity index
//! for O(1) lookup during reconciliation. The registry makes no I/O decisions;
//! it is owned by [`BackendPool`](crate::load_balancer::pool::BackendPool),
//! which serializes every access behind its lock.

use std::collections::{BTreeSet, HashMap};

use crate::load_balancer::backend::{BackendId, BackendTarget};

#[derive(Debug, Default)]
pub struct Registry {
    targets: Vec<BackendTarget>,
    index: HashMap<BackendId, usize>,
    next_epoch: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the target for `id`, appending a new Unconnected one if absent.
    pub fn upsert(&mut self, id: BackendId) -> &mut BackendTarget {
        let position = match self.index.get(&id) {
            Some(&position) => position,
            None => {
                self.next_epoch += 1;
                let position = self.targets.len();
                self.index.insert(id.clone(), position);
                self.targets.push(BackendTarget::new(id, self.next_epoch));
                position
            }
        };
        &mut self.targets[position]
    }

    /// Close the target's connection and detach it. Later targets shift down
    /// one position; relative order is preserved.
    pub fn remove(&mut self, id: &BackendId) -> Option<BackendTarget> {
        let position = self.index.remove(id)?;
        let mut target = self.targets.remove(position);
        target.close();
        for moved in &self.targets[position..] {
            if let Some(slot) = self.index.get_mut(moved.id()) {
                *slot -= 1;
            }
        }
        Some(target)
    }

    pub fn healthy_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_healthy()).count()
    }

    pub fn get(&self, position: usize) -> Option<&BackendTarget> {
        self.targets.get(position)
    }

    pub fn lookup(&self, id: &BackendId) -> Option<&BackendTarget> {
        self.index.get(id).map(|&position| &self.targets[position])
    }

    pub fn lookup_mut(&mut self, id: &BackendId) -> Option<&mut BackendTarget> {
        match self.index.get(id) {
            Some(&position) => Some(&mut self.targets[position]),
            None => None,
        }
    }

    pub fn position(&self, id: &BackendId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn identities(&self) -> BTreeSet<BackendId> {
        self.index.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
