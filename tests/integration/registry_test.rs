// tests/integration/registry_test.rs

use super::test_helpers::{TestServer, new_session, wait_until};
use spindle::connection::{DedicatedWorkers, TagMask};
use std::collections::HashSet;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_session_round_trip_restores_count() {
    let server = TestServer::dedicated();
    let before = server.registry.number_of_connections();

    let (_id, mut client) = server.connect();
    assert_eq!(server.registry.number_of_connections(), before + 1);

    let reply = client.round_trip(b"ping").await;
    assert_eq!(&reply.body[..], b"ping");

    drop(client);
    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == before).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_count_tracks_sessions_not_yet_ended() {
    let server = TestServer::dedicated();

    let mut clients = Vec::new();
    for _ in 0..6 {
        let (_id, mut client) = server.connect();
        client.round_trip(b"hello").await;
        clients.push(client);
    }
    assert_eq!(server.registry.number_of_connections(), 6);

    // Close every other connection.
    let mut kept = Vec::new();
    for (i, client) in clients.into_iter().enumerate() {
        if i % 2 == 0 {
            kept.push(client);
        }
    }

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 3).await);

    for client in &mut kept {
        client.round_trip(b"still here").await;
    }
    assert_eq!(server.registry.number_of_connections(), 3);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 3).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_concurrent_sessions_leave_registry_empty() {
    let server = TestServer::dedicated();

    let mut tasks = Vec::new();
    let mut ids = HashSet::new();
    for _ in 0..10 {
        let (id, mut client) = server.connect();
        assert!(ids.insert(id), "duplicate session id {id}");
        tasks.push(tokio::spawn(async move {
            client.round_trip(b"concurrent").await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 10).await);

    let ended: HashSet<_> = server.transport.ended_ids().into_iter().collect();
    assert_eq!(ended, ids);
    assert_eq!(server.registry.session_stats().created, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_all_sessions_skips_intersecting_tags() {
    let server = TestServer::dedicated();

    let plain_one = server.connect();
    let plain_two = server.connect();

    let keep_open = new_session(&server.transport);
    keep_open.set_tags(TagMask::KEEP_OPEN);
    let (keep_id, mut keep_client) = server.connect_session(keep_open);

    let internal = new_session(&server.transport);
    internal.set_tags(TagMask::INTERNAL_CLIENT | TagMask::EXTERNAL_CLIENT_KEEP_OPEN);
    let (internal_id, mut internal_client) = server.connect_session(internal);

    assert_eq!(server.registry.number_of_connections(), 4);

    server
        .registry
        .end_all_sessions(TagMask::KEEP_OPEN | TagMask::INTERNAL_CLIENT);

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 2).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 2).await);

    let ended = server.transport.ended_ids();
    assert!(ended.contains(&plain_one.0));
    assert!(ended.contains(&plain_two.0));
    assert!(!ended.contains(&keep_id));
    assert!(!ended.contains(&internal_id));

    // The skipped sessions keep working.
    keep_client.round_trip(b"kept").await;
    internal_client.round_trip(b"kept too").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_all_sessions_with_empty_filter_ends_everything() {
    let server = TestServer::dedicated();

    let tagged = new_session(&server.transport);
    tagged.set_tags(TagMask::all());
    let _tagged = server.connect_session(tagged);
    let _plain = server.connect();

    server.registry.end_all_sessions(TagMask::empty());

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_all_sessions_on_empty_registry_is_noop() {
    let server = TestServer::dedicated();
    server.registry.end_all_sessions(TagMask::empty());
    assert_eq!(server.registry.number_of_connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropping_registry_terminates_open_sessions() {
    let server = TestServer::dedicated();

    // Clients stay connected and silent, so only termination can end the drivers.
    let mut clients = Vec::new();
    for _ in 0..3 {
        let (_id, client) = server.connect();
        clients.push(client);
    }
    assert_eq!(server.registry.number_of_connections(), 3);

    let transport = server.transport.clone();
    drop(server);

    assert!(wait_until(WAIT, || transport.ended_count() == 3).await);
    drop(clients);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_error_ends_session() {
    let server = TestServer::with_handler(
        std::sync::Arc::new(super::test_helpers::FailingHandler),
        None,
    );

    let (_id, mut client) = server.connect();
    client.send(b"boom").await;
    assert!(client.recv().await.is_none());

    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_stats_reports_available_slots() {
    let server = TestServer::dedicated();
    let max_clients = spindle::config::default_max_clients();

    let _a = server.connect();
    let _b = server.connect();

    let stats = server.registry.session_stats();
    assert_eq!(stats.current, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.available, max_clients - 2);
}

#[tokio::test]
#[should_panic(expected = "invariant failure")]
async fn test_start_session_without_resolved_addresses_panics() {
    use spindle::connection::{HostAndPort, Session};

    let server = TestServer::dedicated();
    let session = Session::new(
        HostAndPort::new("pipe", 0),
        HostAndPort::new("pipe", 0),
        None,
    );
    let (stream, _client) = super::test_helpers::duplex_connection();
    server.registry.start_session(session, stream);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversubscribed_dedicated_workers_keep_serving() {
    // Two live workers on one core: every step is followed by a yield.
    let server = TestServer::with_launcher(Box::new(DedicatedWorkers::with_cores(true, 1)));

    let (_a, mut first) = server.connect();
    let (_b, mut second) = server.connect();
    for _ in 0..5 {
        assert_eq!(&first.round_trip(b"first").await.body[..], b"first");
        assert_eq!(&second.round_trip(b"second").await.body[..], b"second");
    }

    drop(first);
    drop(second);
    let registry = server.registry.clone();
    assert!(wait_until(WAIT, || registry.number_of_connections() == 0).await);
    assert!(wait_until(WAIT, || server.transport.ended_count() == 2).await);
}
