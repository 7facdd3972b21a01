//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → sections cloned into the subsystems that own them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BalancerConfig;
pub use schema::ListenerConfig;
pub use schema::PoolConfig;
pub use schema::DispatchConfig;
pub use schema::CoordinationConfig;
pub use schema::ObservabilityConfig;
pub use schema::LogFormat;
pub use schema::ShutdownConfig;
