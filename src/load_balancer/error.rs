//! Backend pool error types.

use std::time::Duration;
use thiserror::Error;

use crate::load_balancer::backend::BackendId;

/// A backend could not be reached at connect time.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect to {backend} timed out after {after:?}")]
    Timeout { backend: BackendId, after: Duration },

    #[error("failed to connect to {backend}: {source}")]
    Io {
        backend: BackendId,
        #[source]
        source: std::io::Error,
    },
}

/// A request or response could not be moved over an open backend connection.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("write to backend failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read from backend failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("backend closed the connection")]
    BackendClosed,

    #[error("backend connection was retired")]
    Retired,

    #[error("backend connection still busy after {waited:?}")]
    Busy { waited: Duration },

    #[error("response filled the {limit}-byte buffer; connection dropped")]
    ResponseOverflow { limit: usize },
}

impl ForwardError {
    /// True when the failure was a deadline rather than a socket error.
    pub fn is_timeout(&self) -> bool {
        match self {
            ForwardError::Write(e) | ForwardError::Read(e) => {
                e.kind() == std::io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }

    /// Whether the target's connection should be failed for this error.
    /// A retired connection was already handled by whoever retired it, and
    /// a busy one never saw the request.
    pub fn is_backend_fault(&self) -> bool {
        !matches!(self, ForwardError::Retired | ForwardError::Busy { .. })
    }
}

/// Target selection failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no healthy backend after probing {probes} targets")]
    NoHealthyTarget { probes: usize },
}
