//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Client payload arrives
//!     → pool.rs (lock, pick next healthy target)
//!         → round_robin.rs (advance cursor, skip non-healthy)
//!         → registry.rs (ordered targets + identity index)
//!     → backend.rs (exchange over the borrowed connection)
//!     → on failure: pool.rs marks the target Failed and queues a retry
//! ```
//!
//! # Design Decisions
//! - One persistent connection per backend, shared by all clients
//! - The pool lock is never held across I/O
//! - Removing a target retires its connection: exchanges already in flight
//!   finish, no new ones start, and the socket closes with the last borrow

pub mod backend;
pub mod error;
pub mod pool;
pub mod registry;
pub mod round_robin;

pub use backend::{BackendConnection, BackendId, BackendTarget};
pub use error::{ConnectError, ForwardError, PoolError};
pub use pool::{BackendPool, MembershipDiff, PendingConnect, TargetLease, TargetStatus};
