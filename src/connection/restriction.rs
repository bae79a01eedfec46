// src/connection/restriction.rs

use std::net::SocketAddr;

/// The addresses a connection was made between, recorded when the session starts
/// so that authorization can later check client-source and server-address
/// restrictions. Evaluating those restrictions happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictionEnvironment {
    client_source: SocketAddr,
    server_address: SocketAddr,
}

impl RestrictionEnvironment {
    pub fn new(client_source: SocketAddr, server_address: SocketAddr) -> Self {
        Self {
            client_source,
            server_address,
        }
    }

    pub fn client_source(&self) -> SocketAddr {
        self.client_source
    }

    pub fn server_address(&self) -> SocketAddr {
        self.server_address
    }
}
