//! Failure injection: backends that die mid-request and come back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zk_balancer::coordination::MemoryEnsemble;
use zk_balancer::health::state::HealthState;
use zk_balancer::lifecycle::{launch, Shutdown};
use zk_balancer::load_balancer::BackendId;

mod common;

fn id(backend: &common::MockBackend) -> BackendId {
    BackendId::new(backend.addr.ip().to_string(), backend.addr.port())
}

#[tokio::test]
async fn failed_backend_is_skipped_then_restored_by_sweep() {
    let a = common::start_echo_backend("a").await;

    // B drops its connection instead of answering the first request.
    let fail_next = Arc::new(AtomicBool::new(true));
    let flag = fail_next.clone();
    let b = common::start_programmable_backend(move |request| {
        let fail = flag.swap(false, Ordering::SeqCst);
        async move {
            if fail {
                None
            } else {
                let mut reply = b"b:".to_vec();
                reply.extend_from_slice(&request);
                Some(reply)
            }
        }
    })
    .await;

    let ensemble = MemoryEnsemble::new();
    common::publish(&ensemble, &a);
    common::publish(&ensemble, &b);

    let shutdown = Shutdown::new();
    let balancer = launch(common::balancer_config(), Arc::new(ensemble.session()), &shutdown)
        .await
        .unwrap();
    let pool = balancer.pool().clone();
    assert!(common::wait_until(Duration::from_secs(3), || pool.healthy_count() == 2).await);

    // Drive requests until one lands on B and fails.
    let mut saw_failure = false;
    for _ in 0..2 {
        let response = common::send_request(balancer.local_addr(), b"x").await;
        if response.is_empty() {
            saw_failure = true;
        } else {
            assert_eq!(response, b"a:x");
        }
    }
    assert!(saw_failure, "client of the failing backend gets no response");
    assert_eq!(pool.state_of(&id(&b)), Some(HealthState::Failed));

    // No further client sees the failure.
    for _ in 0..3 {
        let response = common::send_request(balancer.local_addr(), b"y").await;
        assert!(response == b"a:y" || response == b"b:y", "unexpected {response:?}");
    }

    // The sweep reconnects B and it takes traffic again.
    assert!(
        common::wait_until(Duration::from_secs(4), || {
            pool.state_of(&id(&b)) == Some(HealthState::Healthy)
        })
        .await
    );
    assert_eq!(b.accepted(), 2);
    let mut hit_b = false;
    for _ in 0..2 {
        if common::send_request(balancer.local_addr(), b"z").await == b"b:z" {
            hit_b = true;
        }
    }
    assert!(hit_b);

    shutdown.trigger();
    balancer.wait().await;
}

#[tokio::test]
async fn slow_backend_times_out_and_is_failed() {
    let slow = common::start_programmable_backend(|_request| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Some(b"late".to_vec())
    })
    .await;
    let ensemble = MemoryEnsemble::new();
    common::publish(&ensemble, &slow);

    let shutdown = Shutdown::new();
    let balancer = launch(common::balancer_config(), Arc::new(ensemble.session()), &shutdown)
        .await
        .unwrap();
    let pool = balancer.pool().clone();
    assert!(common::wait_until(Duration::from_secs(3), || pool.healthy_count() == 1).await);

    let response = common::send_request(balancer.local_addr(), b"x").await;
    assert!(response.is_empty());
    assert_ne!(pool.state_of(&id(&slow)), None);

    // The timed-out connection is never reused: the sweep dials a fresh one.
    assert!(common::wait_until(Duration::from_secs(4), || slow.accepted() == 2).await);

    shutdown.trigger();
    balancer.wait().await;
}

#[tokio::test]
async fn dead_backend_keeps_retrying_while_registered() {
    let a = common::start_echo_backend("a").await;
    let port = a.addr.port();
    let ensemble = MemoryEnsemble::new();
    // Published before anything listens on this port.
    let dead_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead_listener.local_addr().unwrap();
    drop(dead_listener);
    ensemble.create_persistent("/servers", b"").unwrap();
    ensemble
        .create_persistent(&format!("/servers/{dead_addr}"), b"")
        .unwrap();
    common::publish(&ensemble, &a);

    let shutdown = Shutdown::new();
    let balancer = launch(common::balancer_config(), Arc::new(ensemble.session()), &shutdown)
        .await
        .unwrap();
    let pool = balancer.pool().clone();
    let dead = BackendId::new("127.0.0.1", dead_addr.port());
    assert!(common::wait_until(Duration::from_secs(3), || pool.healthy_count() == 1).await);
    assert!(
        common::wait_until(Duration::from_secs(3), || {
            pool.status()
                .iter()
                .any(|s| s.backend == dead && s.attempts >= 2)
        })
        .await,
        "sweep keeps retrying the dead backend"
    );
    assert_eq!(pool.state_of(&BackendId::new("127.0.0.1", port)), Some(HealthState::Healthy));

    for _ in 0..4 {
        assert_eq!(common::send_request(balancer.local_addr(), b"q").await, b"a:q");
    }

    shutdown.trigger();
    balancer.wait().await;
}

#[tokio::test]
async fn oversized_reply_never_reaches_the_next_client() {
    // Every reply is larger than the relay buffer.
    let backend = common::start_programmable_backend(|request| async move {
        let fill = if request == b"secret" { b'S' } else { b'P' };
        Some(vec![fill; 1500])
    })
    .await;
    let ensemble = MemoryEnsemble::new();
    common::publish(&ensemble, &backend);

    let shutdown = Shutdown::new();
    let balancer = launch(common::balancer_config(), Arc::new(ensemble.session()), &shutdown)
        .await
        .unwrap();
    let pool = balancer.pool().clone();
    assert!(common::wait_until(Duration::from_secs(3), || pool.healthy_count() == 1).await);

    let first = common::send_request(balancer.local_addr(), b"secret").await;
    assert_eq!(first, vec![b'S'; 1024]);

    // The connection holding the unread tail is replaced by a fresh dial.
    assert!(
        common::wait_until(Duration::from_secs(4), || {
            backend.accepted() == 2 && pool.healthy_count() == 1
        })
        .await
    );

    let second = common::send_request(balancer.local_addr(), b"public").await;
    assert!(!second.contains(&b'S'), "second client saw the first client's reply");
    assert_eq!(second, vec![b'P'; 1024]);

    shutdown.trigger();
    balancer.wait().await;
}
