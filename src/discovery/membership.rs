//! Backend membership as published under the servers root.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::load_balancer::backend::BackendId;

/// A child of the servers root that is not a usable `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node name {name:?}: {reason}")]
pub struct MembershipParseError {
    pub name: String,
    pub reason: &'static str,
}

fn reject(name: &str, reason: &'static str) -> MembershipParseError {
    MembershipParseError {
        name: name.to_string(),
        reason,
    }
}

/// Parse a node name of the form `host:port` or `[ipv6]:port`.
pub fn parse_node_name(name: &str) -> Result<BackendId, MembershipParseError> {
    let (host, port) = if let Some(rest) = name.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| reject(name, "expected [host]:port"))?;
        (host, port)
    } else {
        let (host, port) = name
            .rsplit_once(':')
            .ok_or_else(|| reject(name, "missing port"))?;
        if host.contains(':') {
            return Err(reject(name, "IPv6 hosts must be bracketed"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(reject(name, "empty host"));
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/' || c == '[' || c == ']') {
        return Err(reject(name, "invalid character in host"));
    }
    let port: u16 = port.parse().map_err(|_| reject(name, "port is not a number in 1-65535"))?;
    if port == 0 {
        return Err(reject(name, "port must be non-zero"));
    }
    Ok(BackendId::new(host, port))
}

/// The set of backends listed under the servers root at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub members: BTreeSet<BackendId>,
    /// Children that could not be parsed and were skipped.
    pub rejected: usize,
}

impl MembershipSnapshot {
    pub fn from_children<S: AsRef<str>>(children: &[S]) -> Self {
        let mut snapshot = Self::default();
        for child in children {
            match parse_node_name(child.as_ref()) {
                Ok(id) => {
                    snapshot.members.insert(id);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed backend node");
                    snapshot.rejected += 1;
                }
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
