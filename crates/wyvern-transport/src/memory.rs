//! In-process transport over `tokio::io::duplex` pipes.
//!
//! No sockets, no ports, fully deterministic. The server side holds a
//! [`MemoryTransport`]; tests hold any number of cloned
//! [`MemoryConnector`]s and call [`connect`](MemoryConnector::connect) to
//! get the client half of a fresh pipe.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Server half of an in-memory transport.
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
    next_id: u64,
}

/// Dials a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::UnboundedSender<DuplexStream>,
    buffer_size: usize,
}

impl MemoryTransport {
    /// Creates a transport whose pipes buffer up to `buffer_size` bytes in
    /// each direction.
    pub fn new(buffer_size: usize) -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: rx,
                next_id: 1,
            },
            MemoryConnector {
                outgoing: tx,
                buffer_size,
            },
        )
    }
}

impl MemoryConnector {
    /// Opens a new connection and returns the client's end of it.
    pub fn connect(&self) -> Result<DuplexStream, TransportError> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        self.outgoing
            .send(server)
            .map_err(|_| TransportError::ConnectionClosed("memory transport is gone".into()))?;
        Ok(client)
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let stream = self.incoming.recv().await.ok_or(TransportError::Shutdown)?;
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        tracing::debug!(%id, "accepted in-memory connection");
        Ok(MemoryConnection { id, stream })
    }

    fn shutdown(&mut self) {
        self.incoming.close();
    }
}

/// Server end of one in-memory pipe.
pub struct MemoryConnection {
    id: ConnectionId,
    stream: DuplexStream,
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl AsyncRead for MemoryConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
