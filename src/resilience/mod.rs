//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Socket I/O (client or backend):
//!     → timeouts.rs (every read/write has a deadline)
//!
//! Failed backend connect:
//!     → backoff.rs (cool-down before the next reconnect attempt)
//!
//! Failed coordination call:
//!     → retries.rs (retry policy, bounded at startup, unbounded afterwards)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Jittered backoff prevents reconnect storms against a recovering backend
//! - Nothing here is fatal; callers decide when to give up

pub mod backoff;
pub mod retries;
pub mod timeouts;
