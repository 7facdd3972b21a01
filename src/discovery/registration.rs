//! Self-registration of this balancer under the balancers root.
//!
//! The record is ephemeral: it disappears with the coordination session, so
//! there is nothing to deregister on shutdown beyond closing the session.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::config::CoordinationConfig;
use crate::coordination::{join_path, CoordinationError, Coordinator};
use crate::load_balancer::backend::BackendId;
use crate::resilience::retries::RetryPolicy;

/// Address used only to pick the outbound interface; nothing is sent.
const ROUTE_PROBE: &str = "192.0.2.1:9";

pub struct SelfRegistration {
    coordinator: Arc<dyn Coordinator>,
    balancers_path: String,
    retry: RetryPolicy,
}

impl SelfRegistration {
    pub fn new(coordinator: Arc<dyn Coordinator>, config: &CoordinationConfig) -> Self {
        Self {
            coordinator,
            balancers_path: config.balancers_path.clone(),
            retry: RetryPolicy::new(config.retry_base_ms, config.retry_max_ms)
                .with_max_attempts(config.startup_attempts),
        }
    }

    /// Publish `advertised` (a `host:port`) as an ephemeral record and return
    /// the record's path.
    ///
    /// `NodeExists` is retried: it means a previous session of ours has not
    /// expired yet.
    pub async fn register(&self, advertised: &str) -> Result<String, CoordinationError> {
        let path = join_path(&self.balancers_path, advertised);

        self.retry
            .run("self-registration", CoordinationError::is_transient, || {
                let coordinator = Arc::clone(&self.coordinator);
                let root = self.balancers_path.clone();
                let path = path.clone();
                let payload = advertised.as_bytes().to_vec();
                async move {
                    coordinator.ensure_path(&root).await?;
                    coordinator.create_ephemeral(&path, &payload).await
                }
            })
            .await?;

        tracing::info!(path = %path, "Balancer registered");
        Ok(path)
    }
}

/// The `host:port` this balancer publishes.
///
/// A configured address wins. Otherwise the listener's address is used,
/// with an unspecified IP replaced by the primary outbound interface.
pub async fn advertise_address(configured: Option<&str>, bound: SocketAddr) -> String {
    if let Some(address) = configured {
        return address.to_string();
    }
    let ip = if bound.ip().is_unspecified() {
        discover_local_ip().await
    } else {
        bound.ip()
    };
    BackendId::new(ip.to_string(), bound.port()).to_string()
}

/// First non-loopback IPv4 address, or 127.0.0.1 when none can be found.
pub async fn discover_local_ip() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let probe = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(ROUTE_PROBE).await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(addr) if !addr.ip().is_loopback() && !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => fallback,
        Err(e) => {
            tracing::debug!(error = %e, "Local address discovery failed, using loopback");
            fallback
        }
    }
}
