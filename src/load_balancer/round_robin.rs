//! Round-robin target selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::error::PoolError;
use crate::load_balancer::registry::Registry;

/// Process-wide dispatch cursor.
///
/// Each probe takes the current value and advances it by one; the probed
/// position is that value modulo the registry size. A selection probes at
/// most `registry.len()` positions, so a fully degraded pool fails fast.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the next healthy target.
    pub fn next_healthy(&self, registry: &Registry) -> Result<usize, PoolError> {
        let len = registry.len();
        for _ in 0..len {
            let position = self.counter.fetch_add(1, Ordering::Relaxed) % len;
            if registry.get(position).is_some_and(|t| t.is_healthy()) {
                return Ok(position);
            }
        }
        Err(PoolError::NoHealthyTarget { probes: len })
    }

    /// Current cursor value.
    pub fn position(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}
