//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files, and
//! every section falls back to its defaults so an empty file is valid.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Client-facing listener.
    pub listener: ListenerConfig,

    /// Backend connection pool and reconnection sweep.
    pub pool: PoolConfig,

    /// Per-request forwarding limits.
    pub dispatch: DispatchConfig,

    /// Coordination service paths and retry policy.
    pub coordination: CoordinationConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5555").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Backend pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Timeout for a single backend connect attempt in milliseconds.
    pub connect_timeout_ms: u64,

    /// Interval of the reconnection sweep in seconds.
    pub sweep_interval_secs: u64,

    /// Base cool-down before a failed reconnect is retried, in milliseconds.
    pub cooldown_ms: u64,

    /// Upper bound for the exponential cool-down, in milliseconds.
    pub max_cooldown_ms: u64,
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            sweep_interval_secs: 10,
            cooldown_ms: 5_000,
            max_cooldown_ms: 60_000,
        }
    }
}

/// Request forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Size of the single receive used for requests and responses.
    pub max_payload_bytes: usize,

    /// Deadline for reading the request from and writing the response to a client.
    pub client_timeout_ms: u64,

    /// Deadline for each write to and read from a backend.
    pub backend_timeout_ms: u64,
}

impl DispatchConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024,
            client_timeout_ms: 10_000,
            backend_timeout_ms: 5_000,
        }
    }
}

/// Coordination service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// ZooKeeper ensemble, e.g. "zk1:2181,zk2:2181". When unset the binary
    /// hosts an in-process ensemble instead.
    pub connect_string: Option<String>,

    /// Session timeout negotiated with the ensemble, in milliseconds.
    pub session_timeout_ms: u64,

    /// Root whose children are the backend node names.
    pub servers_path: String,

    /// Root under which this balancer registers itself.
    pub balancers_path: String,

    /// Address published for this balancer. Derived from the listener when unset.
    pub advertise_address: Option<String>,

    /// Base delay for coordination retries in milliseconds.
    pub retry_base_ms: u64,

    /// Maximum delay for coordination retries in milliseconds.
    pub retry_max_ms: u64,

    /// Attempts allowed for startup calls before giving up.
    pub startup_attempts: u32,

    /// Backend node names published into the in-process ensemble (standalone mode).
    pub seed_servers: Vec<String>,
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            connect_string: None,
            session_timeout_ms: 30_000,
            servers_path: "/servers".to_string(),
            balancers_path: "/balancers".to_string(),
            advertise_address: None,
            retry_base_ms: 200,
            retry_max_ms: 10_000,
            startup_attempts: 5,
            seed_servers: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after the listener stops.
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 30 }
    }
}
