//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! servers root children (coordination)
//!     → synchronizer.rs MembershipWatcher (list + arm watch)
//!     → membership.rs (parse host:port, skip malformed)
//!     → mpsc MembershipEvent
//!     → synchronizer.rs MembershipSynchronizer (reconcile pool, dial added)
//!
//! startup
//!     → registration.rs (ephemeral balancers/host:port)
//! ```

pub mod membership;
pub mod registration;
pub mod synchronizer;

pub use membership::{parse_node_name, MembershipParseError, MembershipSnapshot};
pub use registration::{advertise_address, SelfRegistration};
pub use synchronizer::{MembershipEvent, MembershipSynchronizer, MembershipWatcher};
