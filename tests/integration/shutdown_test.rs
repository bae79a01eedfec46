// tests/integration/shutdown_test.rs

use super::test_helpers::{TestServer, wait_until};
use spindle::connection::TagMask;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_idle_sessions() {
    let server = TestServer::dedicated();

    let mut clients = Vec::new();
    for _ in 0..5 {
        let (_id, client) = server.connect();
        clients.push(client);
    }

    assert!(server.registry.shutdown(Duration::from_secs(5)).await);
    assert_eq!(server.registry.number_of_connections(), 0);

    // Each client sees its connection close.
    for client in &mut clients {
        assert!(client.recv().await.is_none());
    }
    assert!(wait_until(Duration::from_secs(5), || server.transport.ended_count() == 5).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_on_empty_registry_returns_immediately() {
    let server = TestServer::dedicated();
    assert!(server.registry.shutdown(Duration::from_millis(50)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminated_sessions_stop_answering() {
    let server = TestServer::dedicated();
    let (_id, mut client) = server.connect();
    client.round_trip(b"before").await;

    server.registry.end_all_sessions(TagMask::empty());

    let registry = server.registry.clone();
    assert!(wait_until(Duration::from_secs(5), || registry.number_of_connections() == 0).await);
    assert!(client.recv().await.is_none());
}
