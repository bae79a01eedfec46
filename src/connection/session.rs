// src/connection/session.rs

//! Defines `Session`, the identified and addressed endpoint of one accepted connection.

use super::restriction::RestrictionEnvironment;
use super::transport::TransportLayer;
use bitflags::bitflags;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// The process-wide id of a session. Never zero.
pub type SessionId = u64;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_session_id() -> SessionId {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

bitflags! {
    /// Tags attached to a session. A bulk shutdown skips sessions whose tags
    /// intersect the caller's filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TagMask: u32 {
        const KEEP_OPEN                                = 1 << 0;
        const INTERNAL_CLIENT                          = 1 << 1;
        const LATEST_VERSION_INTERNAL_CLIENT_KEEP_OPEN = 1 << 2;
        const EXTERNAL_CLIENT_KEEP_OPEN                = 1 << 3;
    }
}

/// A host/port pair, optionally backed by a resolved socket address.
///
/// Transports without socket addresses (in-process pipes, for instance) only
/// carry a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    host: String,
    port: u16,
    sock_addr: Option<SocketAddr>,
}

impl HostAndPort {
    /// Creates an unresolved address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sock_addr: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The resolved socket address, if the transport provided one.
    pub fn sock_addr(&self) -> Option<SocketAddr> {
        self.sock_addr
    }
}

impl From<SocketAddr> for HostAndPort {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            sock_addr: Some(addr),
        }
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sock_addr {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// One accepted network connection as seen by the database side.
///
/// A `Session` is owned by exactly one connection driver. When it is dropped
/// while still attached to its transport layer, the transport is told that the
/// connection has ended. Moving a `Session` moves that obligation with it, so
/// the notification fires once per physical connection.
pub struct Session {
    id: SessionId,
    remote: HostAndPort,
    local: HostAndPort,
    tags: AtomicU32,
    restriction: OnceLock<Arc<RestrictionEnvironment>>,
    transport: Option<Weak<dyn TransportLayer>>,
}

impl Session {
    /// Creates a session with a fresh id. Never fails.
    pub fn new(
        remote: HostAndPort,
        local: HostAndPort,
        transport: Option<Weak<dyn TransportLayer>>,
    ) -> Self {
        Self {
            id: next_session_id(),
            remote,
            local,
            tags: AtomicU32::new(TagMask::empty().bits()),
            restriction: OnceLock::new(),
            transport,
        }
    }

    /// Creates a session attached to `transport`.
    pub fn attached<T: TransportLayer + 'static>(
        remote: HostAndPort,
        local: HostAndPort,
        transport: &Arc<T>,
    ) -> Self {
        let transport: Weak<T> = Arc::downgrade(transport);
        let transport: Weak<dyn TransportLayer> = transport;
        Self::new(remote, local, Some(transport))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote(&self) -> &HostAndPort {
        &self.remote
    }

    pub fn local(&self) -> &HostAndPort {
        &self.local
    }

    pub fn tags(&self) -> TagMask {
        TagMask::from_bits_retain(self.tags.load(Ordering::Acquire))
    }

    pub fn set_tags(&self, tags: TagMask) {
        self.tags.store(tags.bits(), Ordering::Release);
    }

    /// Atomically replaces the tags with `f(current)` and returns the new value.
    pub fn mutate_tags(&self, f: impl Fn(TagMask) -> TagMask) -> TagMask {
        let mut current = self.tags.load(Ordering::Acquire);
        loop {
            let next = f(TagMask::from_bits_retain(current)).bits();
            match self
                .tags
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return TagMask::from_bits_retain(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Attaches the restriction environment. Returns false if one was already set.
    pub fn set_restriction_environment(&self, env: Arc<RestrictionEnvironment>) -> bool {
        self.restriction.set(env).is_ok()
    }

    pub fn restriction_environment(&self) -> Option<&Arc<RestrictionEnvironment>> {
        self.restriction.get()
    }

    /// The owning transport layer, if still attached and alive.
    pub fn transport(&self) -> Option<Arc<dyn TransportLayer>> {
        self.transport.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_attached(&self) -> bool {
        self.transport.is_some()
    }

    /// Releases this session from its transport layer. Dropping a detached
    /// session sends no notification; the returned reference lets a new owner
    /// take over the obligation.
    pub fn detach(&mut self) -> Option<Weak<dyn TransportLayer>> {
        self.transport.take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .field("tags", &self.tags())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take().and_then(|weak| weak.upgrade()) {
            transport.end(self);
        }
    }
}
