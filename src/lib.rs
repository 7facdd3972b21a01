//! TCP load balancer with coordination-service backed membership.

pub mod config;
pub mod coordination;
pub mod discovery;
pub mod dispatch;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::BalancerConfig;
pub use coordination::{Coordinator, MemoryEnsemble, ZooKeeperSession};
pub use lifecycle::{launch, RunningBalancer, Shutdown};
pub use load_balancer::BackendPool;
