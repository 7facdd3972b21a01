//! Backend health state machine.
//!
//! # States
//! - Unconnected: registered, no connection attempted yet
//! - Connecting: first connect attempt in flight
//! - Healthy: connection open, backend receives traffic
//! - Failed: no connection, waiting in the retry queue
//! - Reconnecting: sweep attempt in flight
//!
//! # State Transitions
//! ```text
//! Unconnected  --Attempt-------> Connecting
//! Failed       --Attempt-------> Reconnecting
//! Connecting   --Connected-----> Healthy
//! Reconnecting --Connected-----> Healthy
//! Connecting   --ConnectFailed-> Failed
//! Reconnecting --ConnectFailed-> Failed
//! Healthy      --ForwardFailed-> Failed
//! ```
//!
//! Any other (state, event) pair is rejected and leaves the state unchanged,
//! which makes duplicate or late reports harmless.

use std::fmt;

/// Health of one backend target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Unconnected,
    Connecting,
    Healthy,
    Failed,
    Reconnecting,
}

/// Something that happened to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// A connect attempt is about to start.
    Attempt,
    /// The connect attempt produced an open socket.
    Connected,
    /// The connect attempt failed or timed out.
    ConnectFailed,
    /// A request on the open connection failed.
    ForwardFailed,
}

impl HealthState {
    /// Next state after `event`, or `None` if the event does not apply.
    pub fn on(self, event: HealthEvent) -> Option<HealthState> {
        use HealthEvent::*;
        use HealthState::*;

        match (self, event) {
            (Unconnected, Attempt) => Some(Connecting),
            (Failed, Attempt) => Some(Reconnecting),
            (Connecting | Reconnecting, Connected) => Some(Healthy),
            (Connecting | Reconnecting, ConnectFailed) => Some(Failed),
            (Healthy, ForwardFailed) => Some(Failed),
            _ => None,
        }
    }

    /// Only healthy targets are eligible for dispatch.
    pub fn is_dispatchable(self) -> bool {
        self == HealthState::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unconnected => "unconnected",
            HealthState::Connecting => "connecting",
            HealthState::Healthy => "healthy",
            HealthState::Failed => "failed",
            HealthState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
