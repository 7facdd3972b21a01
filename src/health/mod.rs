//! Backend health subsystem.
//!
//! # Data Flow
//! ```text
//! State machine (state.rs):
//!     Unconnected → Connecting → Healthy
//!     Healthy → Failed (forward failure)
//!     Connecting/Reconnecting → Failed (connect failure)
//!     Failed → Reconnecting (sweep)
//!
//! Reconnect sweep (reconnect.rs):
//!     Periodic timer
//!     → Take due Failed targets from the retry queue
//!     → Dial each, update state.rs
//! ```
//!
//! # Design Decisions
//! - Failure is observed passively, from forward errors; there is no probe traffic
//! - Health state is per-target and lives in the registry

pub mod reconnect;
pub mod state;
