// tests/integration/executor_mode_test.rs

use super::test_helpers::{TestServer, wait_until};
use spindle::connection::TagMask;
use spindle::core::executor::ServiceExecutor;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_mode_serves_requests() {
    let server = TestServer::with_fixed_executor(2);
    assert!(!server.registry.is_synchronous());

    let (_id, mut client) = server.connect();
    for body in [&b"one"[..], b"two", b"three"] {
        let request_id = client.send(body).await;
        let reply = client.recv().await.expect("reply");
        assert_eq!(reply.response_to, request_id);
        assert_eq!(&reply.body[..], body);
    }

    drop(client);
    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);

    // One step per request plus the step that observes the close.
    let executor = server.executor.clone().unwrap();
    assert!(
        wait_until(WAIT, || {
            let stats = executor.stats();
            stats.tasks_executed >= 4 && stats.outstanding_tasks == 0
        })
        .await
    );
    let stats = executor.stats();
    assert_eq!(stats.tasks_scheduled, stats.tasks_executed);
    executor.shutdown(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_mode_many_idle_sessions_do_not_block_each_other() {
    // More idle connections than executor workers.
    let server = TestServer::with_fixed_executor(1);

    let mut idle = Vec::new();
    for _ in 0..8 {
        let (_id, client) = server.connect();
        idle.push(client);
    }

    let (_id, mut active) = server.connect();
    let reply = active.round_trip(b"not starved").await;
    assert_eq!(&reply.body[..], b"not starved");

    server.registry.end_all_sessions(TagMask::empty());
    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 9).await);

    server
        .executor
        .as_ref()
        .unwrap()
        .shutdown(WAIT)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_ends_when_executor_is_shut_down() {
    let server = TestServer::with_fixed_executor(2);
    let executor = server.executor.clone().unwrap();
    executor.shutdown(WAIT).await.unwrap();

    // Scheduling the first step fails, so the driver ends in place.
    let (_id, mut client) = server.connect();
    assert_eq!(server.registry.number_of_connections(), 0);
    assert!(client.recv().await.is_none());
    assert!(wait_until(WAIT, || server.transport.ended_count() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropping_registry_in_executor_mode_terminates_sessions() {
    let server = TestServer::with_fixed_executor(2);

    let mut clients = Vec::new();
    for _ in 0..4 {
        let (_id, client) = server.connect();
        clients.push(client);
    }

    let transport = server.transport.clone();
    let executor = server.executor.clone().unwrap();
    drop(server);

    assert!(wait_until(WAIT, || transport.ended_count() == 4).await);
    executor.shutdown(WAIT).await.unwrap();
    drop(clients);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aborted_executor_ends_parked_sessions() {
    let server = TestServer::with_fixed_executor(1);
    let executor = server.executor.clone().unwrap();

    // A silent client keeps its step parked waiting for a request.
    let (_id, mut client) = server.connect();
    assert!(wait_until(WAIT, || executor.stats().outstanding_tasks == 1).await);

    // The parked step never finishes on its own, so the executor aborts it.
    let result = executor.shutdown(Duration::from_millis(100)).await;
    assert!(result.is_err());

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 1).await);
    assert!(client.recv().await.is_none());

    // Nothing is left for a later bulk termination to wait on.
    server.registry.end_all_sessions(TagMask::empty());
    assert!(server.registry.shutdown(Duration::from_millis(100)).await);
    assert_eq!(server.transport.ended_count(), 1);
}
