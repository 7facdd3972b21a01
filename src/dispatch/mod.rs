//! Client-facing dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Listener accept (net/listener.rs, bounded by max_connections)
//!     → server.rs spawns one task per client
//!     → dispatcher.rs: read → pool.select() → backend exchange → reply
//!     → client closed; backend connection stays pooled
//! ```

pub mod dispatcher;
pub mod server;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use server::DispatchServer;
