// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use spindle::connection::{
    ConnectionRegistry, HostAndPort, ServiceContext, Session, SessionId, SessionLauncher,
    SessionStats, TransportLayer,
};
use spindle::core::SessionError;
use spindle::core::executor::{FixedServiceExecutor, ServiceExecutor};
use spindle::core::handler::{EchoHandler, RequestHandler};
use spindle::core::protocol::{BoxMessageStream, Message, MessageCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A transport layer that records every session it is told has ended.
#[derive(Default)]
pub struct MockTransport {
    ended: Mutex<Vec<SessionId>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ended_count(&self) -> usize {
        self.ended.lock().len()
    }

    pub fn ended_ids(&self) -> Vec<SessionId> {
        self.ended.lock().clone()
    }
}

impl TransportLayer for MockTransport {
    fn end(&self, session: &Session) {
        self.ended.lock().push(session.id());
    }

    fn session_stats(&self) -> SessionStats {
        SessionStats::default()
    }
}

static NEXT_PORT: AtomicU16 = AtomicU16::new(40000);

/// A distinct loopback address for each call.
pub fn remote_addr() -> SocketAddr {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn local_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 27027))
}

/// A session with resolved addresses attached to `transport`.
pub fn new_session(transport: &Arc<MockTransport>) -> Session {
    Session::attached(
        HostAndPort::from(remote_addr()),
        HostAndPort::from(local_addr()),
        transport,
    )
}

/// The client end of an in-memory connection.
pub struct TestClient {
    framed: Framed<DuplexStream, MessageCodec>,
}

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

impl TestClient {
    pub async fn send(&mut self, body: &'static [u8]) -> i32 {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        self.framed
            .send(Message::new(request_id, Bytes::from_static(body)))
            .await
            .expect("client send failed");
        request_id
    }

    pub async fn recv(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a reply")
            .map(|res| res.expect("client decode failed"))
    }

    /// Sends `body` and waits for the echoed reply.
    pub async fn round_trip(&mut self, body: &'static [u8]) -> Message {
        let request_id = self.send(body).await;
        let reply = self.recv().await.expect("connection closed before reply");
        assert_eq!(reply.response_to, request_id);
        reply
    }
}

/// Creates a connected pair: the server-side message stream and a test client.
pub fn duplex_connection() -> (BoxMessageStream, TestClient) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let stream: BoxMessageStream = Box::new(Framed::new(server, MessageCodec::default()));
    let client = TestClient {
        framed: Framed::new(client, MessageCodec::default()),
    };
    (stream, client)
}

/// A registry wired to a mock transport, optionally executing on a fixed executor.
pub struct TestServer {
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<MockTransport>,
    pub executor: Option<Arc<FixedServiceExecutor>>,
}

impl TestServer {
    pub fn dedicated() -> Self {
        Self::with_handler(Arc::new(EchoHandler), None)
    }

    pub fn with_fixed_executor(threads: usize) -> Self {
        let executor = Arc::new(FixedServiceExecutor::new(threads));
        executor.start().expect("executor failed to start");
        Self::with_handler(Arc::new(EchoHandler), Some(executor))
    }

    pub fn with_handler(
        handler: Arc<dyn RequestHandler>,
        executor: Option<Arc<FixedServiceExecutor>>,
    ) -> Self {
        init_tracing();
        let mut context = ServiceContext::new(handler);
        context.quiet = true;
        if let Some(executor) = &executor {
            let executor: Arc<dyn ServiceExecutor> = executor.clone();
            context = context.with_executor(executor);
        }
        Self {
            registry: Arc::new(ConnectionRegistry::new(Arc::new(context))),
            transport: MockTransport::new(),
            executor,
        }
    }

    /// A dedicated-mode registry using `launcher` instead of the default strategy.
    pub fn with_launcher(launcher: Box<dyn SessionLauncher>) -> Self {
        init_tracing();
        let mut context = ServiceContext::new(Arc::new(EchoHandler));
        context.quiet = true;
        Self {
            registry: Arc::new(ConnectionRegistry::with_launcher(
                Arc::new(context),
                launcher,
            )),
            transport: MockTransport::new(),
            executor: None,
        }
    }

    /// Starts a session and returns its id along with the client end.
    pub fn connect(&self) -> (SessionId, TestClient) {
        self.connect_session(new_session(&self.transport))
    }

    pub fn connect_session(&self, session: Session) -> (SessionId, TestClient) {
        let id = session.id();
        let (stream, client) = duplex_connection();
        self.registry.start_session(session, stream);
        (id, client)
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A handler that fails every request.
pub struct FailingHandler;

#[async_trait::async_trait]
impl RequestHandler for FailingHandler {
    async fn handle_request(
        &self,
        _session: &Session,
        _request: Message,
    ) -> Result<Option<Message>, SessionError> {
        Err(SessionError::Handler("request rejected".to_string()))
    }
}
