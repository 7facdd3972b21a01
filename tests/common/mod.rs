//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use zk_balancer::config::BalancerConfig;
use zk_balancer::coordination::{join_path, MemoryEnsemble};

/// A mock backend listening on an ephemeral loopback port.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
    /// Connections the peer closed (read returned 0).
    pub closed_by_peer: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Node name as published under the servers root.
    pub fn name(&self) -> String {
        self.addr.to_string()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn closed_by_peer(&self) -> usize {
        self.closed_by_peer.load(Ordering::SeqCst)
    }
}

/// Start a backend that answers every chunk with `<tag>:<chunk>` on a
/// persistent connection.
pub async fn start_echo_backend(tag: &'static str) -> MockBackend {
    start_programmable_backend(move |request| {
        let mut reply = format!("{tag}:").into_bytes();
        reply.extend_from_slice(&request);
        async move { Some(reply) }
    })
    .await
}

/// Start a backend whose reply to each chunk is computed by `f`. Returning
/// `None` drops the connection without answering.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let closed_by_peer = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let (acc, closed) = (accepted.clone(), closed_by_peer.clone());
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            acc.fetch_add(1, Ordering::SeqCst);
            let (f, closed) = (f.clone(), closed.clone());
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => {
                            closed.fetch_add(1, Ordering::SeqCst);
                            break;
                        }
                        Ok(n) => match f(buf[..n].to_vec()).await {
                            Some(reply) => {
                                if socket.write_all(&reply).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        Err(_) => break,
                    }
                }
            });
        }
    });

    MockBackend {
        addr,
        accepted,
        closed_by_peer,
    }
}

/// Config for an in-test balancer: ephemeral port, short retry delays.
pub fn balancer_config() -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.pool.connect_timeout_ms = 500;
    config.pool.sweep_interval_secs = 1;
    config.pool.cooldown_ms = 200;
    config.pool.max_cooldown_ms = 1_000;
    config.dispatch.backend_timeout_ms = 500;
    config.dispatch.client_timeout_ms = 1_000;
    config.coordination.retry_base_ms = 20;
    config.coordination.retry_max_ms = 100;
    config.coordination.advertise_address = Some("127.0.0.1:5555".to_string());
    config.shutdown.drain_timeout_secs = 2;
    config
}

/// Publish a backend under `/servers` as a persistent node.
pub fn publish(ensemble: &MemoryEnsemble, backend: &MockBackend) {
    if !ensemble.exists("/servers") {
        ensemble.create_persistent("/servers", b"").unwrap();
    }
    let name = backend.name();
    ensemble
        .create_persistent(&join_path("/servers", &name), name.as_bytes())
        .unwrap();
}

pub fn unpublish(ensemble: &MemoryEnsemble, backend: &MockBackend) {
    ensemble.delete(&join_path("/servers", &backend.name())).unwrap();
}

/// One client cycle: send `payload`, read until the balancer closes.
pub async fn send_request(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("balancer did not close the client")
        .ok();
    response
}

/// Poll `condition` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
