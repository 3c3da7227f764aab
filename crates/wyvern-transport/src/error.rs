/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listener (or reading back its address) failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The other end went away before the connection was handed over.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
