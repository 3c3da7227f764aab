//! Integration tests for the TCP and in-memory transports.
//!
//! Both should behave like a plain byte pipe: whatever one side writes,
//! the other side reads, in order, and EOF shows up as a zero-length read.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wyvern_transport::{Connection, MemoryTransport, TcpTransport, Transport, TransportError};

#[tokio::test]
async fn test_tcp_accept_and_exchange_bytes() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
    let addr = transport.local_addr().expect("should have local addr");

    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let mut client = tokio::net::TcpStream::connect(addr).await.expect("should connect");
    let mut conn = server.await.expect("task should complete");

    assert!(conn.id().into_inner() > 0);
    assert!(conn.peer_addr().is_some());

    conn.write_all(b"hello from server").await.unwrap();
    let mut buf = [0u8; 17];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello from server");

    client.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hi");

    drop(client);
    let mut rest = Vec::new();
    assert_eq!(conn.read_to_end(&mut rest).await.unwrap(), 0);
}

#[tokio::test]
async fn test_tcp_connection_ids_are_unique() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();

    let _a = tokio::net::TcpStream::connect(addr).await.unwrap();
    let _b = tokio::net::TcpStream::connect(addr).await.unwrap();
    let first = transport.accept().await.unwrap();
    let second = transport.accept().await.unwrap();
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_tcp_accept_after_shutdown_fails() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    transport.shutdown();
    assert!(matches!(
        transport.accept().await,
        Err(TransportError::Shutdown)
    ));
}

#[tokio::test]
async fn test_memory_transport_roundtrip() {
    let (mut transport, connector) = MemoryTransport::new(1024);
    let mut client = connector.connect().unwrap();
    let mut conn = transport.accept().await.unwrap();

    assert!(conn.peer_addr().is_none());

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    conn.write_all(b"pong").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_memory_transport_shutdown_refuses_new_connections() {
    let (mut transport, connector) = MemoryTransport::new(64);
    transport.shutdown();
    assert!(matches!(
        transport.accept().await,
        Err(TransportError::Shutdown)
    ));
    assert!(matches!(
        connector.connect(),
        Err(TransportError::ConnectionClosed(_))
    ));
}

#[tokio::test]
async fn test_memory_transport_dropped_connectors_end_accept() {
    let (mut transport, connector) = MemoryTransport::new(64);
    drop(connector);
    assert!(matches!(
        transport.accept().await,
        Err(TransportError::Shutdown)
    ));
}
