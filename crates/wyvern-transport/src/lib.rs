//! Transport abstraction layer for Wyvern.
//!
//! The protocol assumes a reliable, ordered byte stream per connection and
//! nothing else. A [`Transport`] hands out [`Connection`]s; a connection is
//! just something that can be read from and written to asynchronously.
//! Framing happens one layer up.
//!
//! Two implementations ship here:
//!
//! - [`TcpTransport`] for real deployments
//! - [`MemoryTransport`] for tests, built on `tokio::io::duplex`

mod error;
mod memory;
mod tcp;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryTransport};
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// The accept future is `Send` so the server loop can run inside
/// `tokio::spawn`.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Stops handing out connections. Later `accept` calls fail with
    /// [`TransportError::Shutdown`].
    fn shutdown(&mut self);
}

/// A single reliable, ordered, bidirectional byte stream.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}
