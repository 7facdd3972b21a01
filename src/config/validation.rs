//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, payload size > 0)
//! - Check addresses and coordination paths are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::BalancerConfig;
use crate::discovery::membership::parse_node_name;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    let pool = &config.pool;
    for (field, value) in [
        ("pool.connect_timeout_ms", pool.connect_timeout_ms),
        ("pool.sweep_interval_secs", pool.sweep_interval_secs),
        ("pool.cooldown_ms", pool.cooldown_ms),
        ("dispatch.client_timeout_ms", config.dispatch.client_timeout_ms),
        ("dispatch.backend_timeout_ms", config.dispatch.backend_timeout_ms),
        ("coordination.retry_base_ms", config.coordination.retry_base_ms),
        ("coordination.session_timeout_ms", config.coordination.session_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if pool.max_cooldown_ms < pool.cooldown_ms {
        errors.push(ValidationError::new(
            "pool.max_cooldown_ms",
            "must not be smaller than pool.cooldown_ms",
        ));
    }

    if config.dispatch.max_payload_bytes == 0 {
        errors.push(ValidationError::new("dispatch.max_payload_bytes", "must be greater than 0"));
    }

    let coordination = &config.coordination;
    for (field, path) in [
        ("coordination.servers_path", &coordination.servers_path),
        ("coordination.balancers_path", &coordination.balancers_path),
    ] {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            errors.push(ValidationError::new(
                field,
                format!("'{}' must be an absolute node path like /servers", path),
            ));
        }
    }
    if coordination.servers_path == coordination.balancers_path {
        errors.push(ValidationError::new(
            "coordination.balancers_path",
            "must differ from coordination.servers_path",
        ));
    }
    if coordination.startup_attempts == 0 {
        errors.push(ValidationError::new("coordination.startup_attempts", "must be at least 1"));
    }
    if let Some(addr) = &coordination.advertise_address {
        if let Err(e) = parse_node_name(addr) {
            errors.push(ValidationError::new("coordination.advertise_address", e.to_string()));
        }
    }
    if let Some(servers) = &coordination.connect_string {
        if servers.split(',').any(|host| host.trim().is_empty()) {
            errors.push(ValidationError::new(
                "coordination.connect_string",
                format!("'{}' must be a comma-separated list of host:port", servers),
            ));
        }
        if !coordination.seed_servers.is_empty() {
            errors.push(ValidationError::new(
                "coordination.seed_servers",
                "only used without coordination.connect_string",
            ));
        }
    }
    for seed in &coordination.seed_servers {
        if let Err(e) = parse_node_name(seed) {
            errors.push(ValidationError::new("coordination.seed_servers", e.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
