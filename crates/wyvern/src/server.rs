//! `WyvernServer` builder and accept loop.
//!
//! This is the entry point for running a Wyvern server. It ties the
//! layers together: transport → protocol → session → dispatcher.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use wyvern_crypto::{CryptoProvider, ServerKeyPair};
use wyvern_protocol::FrameCodec;
use wyvern_session::{AccountStore, SessionConfig};
use wyvern_transport::{TcpTransport, Transport, TransportError};

use crate::WyvernError;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, reject_full};
use crate::dispatcher::Dispatcher;
use crate::manager::ConnectionManager;

/// Pause after a failed accept (e.g. out of file descriptors) before
/// trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared server state passed to each connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. Only the
/// [`ConnectionManager`] is mutable, and it locks internally.
pub(crate) struct ServerState<A: AccountStore> {
    pub(crate) session_config: SessionConfig,
    pub(crate) codec: FrameCodec,
    pub(crate) crypto: Arc<CryptoProvider>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) accounts: A,
    pub(crate) manager: ConnectionManager,
    pub(crate) drain_timeout: Duration,
}

/// Builder for configuring and starting a Wyvern server.
///
/// # Example
///
/// ```rust,ignore
/// use wyvern::prelude::*;
///
/// let dispatcher = Dispatcher::new().with(ECHO, |_: &SessionContext, body: Bytes| -> HandlerResult {
///     Ok(Some(body))
/// })?;
/// let server = WyvernServer::builder()
///     .bind("0.0.0.0:7777")
///     .dispatcher(dispatcher)
///     .build(accounts)
///     .await?;
/// server.run().await
/// ```
pub struct WyvernServerBuilder {
    config: ServerConfig,
    dispatcher: Dispatcher,
    keypair: Option<ServerKeyPair>,
}

impl WyvernServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: Dispatcher::new(),
            keypair: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the handlers for application opcodes.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Uses a persisted keypair instead of generating one at build time.
    /// Clients that pin the server's public key need this.
    pub fn keypair(mut self, keypair: ServerKeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Validates the config, binds TCP and returns a server ready to run.
    pub async fn build<A: AccountStore>(
        self,
        accounts: A,
    ) -> Result<WyvernServer<TcpTransport, A>, WyvernError> {
        self.config.validate()?;
        let transport = TcpTransport::bind(&self.config.bind_addr).await?;
        self.build_with_transport(transport, accounts)
    }

    /// Like [`build`](Self::build) but over any [`Transport`], e.g. the
    /// in-memory one in tests.
    pub fn build_with_transport<T: Transport, A: AccountStore>(
        self,
        transport: T,
        accounts: A,
    ) -> Result<WyvernServer<T, A>, WyvernError> {
        let config = self.config;
        config.validate()?;

        let keypair = self.keypair.unwrap_or_else(ServerKeyPair::generate);
        let crypto = CryptoProvider::new(keypair, config.cipher_suite);
        let manager = ConnectionManager::new(
            config.max_sessions,
            Duration::from_millis(config.session_id_quarantine_ms),
            config.outbound_queue_depth,
            config.max_body_len(),
        );

        let state = Arc::new(ServerState {
            session_config: config.session_config(),
            codec: config.frame_codec(),
            crypto: Arc::new(crypto),
            dispatcher: self.dispatcher,
            accounts,
            manager,
            drain_timeout: config.drain_timeout(),
        });

        Ok(WyvernServer { transport, state })
    }
}

impl Default for WyvernServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Wyvern server, built and bound.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct WyvernServer<T: Transport, A: AccountStore> {
    transport: T,
    state: Arc<ServerState<A>>,
}

impl WyvernServer<TcpTransport, crate::MemoryAccountStore> {
    /// Creates a new builder.
    pub fn builder() -> WyvernServerBuilder {
        WyvernServerBuilder::new()
    }
}

impl<A: AccountStore> WyvernServer<TcpTransport, A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, WyvernError> {
        Ok(self.transport.local_addr()?)
    }
}

impl<T: Transport, A: AccountStore> WyvernServer<T, A> {
    /// Handle for broadcasting, kicking, stats and lifecycle events. Stays
    /// valid while the server runs.
    pub fn manager(&self) -> ConnectionManager {
        self.state.manager.clone()
    }

    /// The X25519 public key clients seal their proposals to.
    pub fn public_key(&self) -> [u8; 32] {
        self.state.crypto.public_key()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), WyvernError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` resolves, then shuts down
    /// gracefully.
    ///
    /// Each accepted connection gets its own task. At capacity the
    /// connection is told `ServerFull` and dropped. On shutdown the
    /// listener closes, every session is sent `ServerShutdown`, and
    /// sessions get `drain_timeout` to finish before they are aborted.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<(), WyvernError> {
        tokio::pin!(signal);
        let mut tasks = JoinSet::new();
        tracing::info!(
            max_sessions = self.state.manager.max_sessions(),
            suite = %self.state.crypto.cipher_suite(),
            "wyvern server running"
        );

        loop {
            tokio::select! {
                () = &mut signal => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            tracing::error!(error = %e, "session task panicked");
                        }
                    }
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        match state.manager.try_acquire() {
                            Some(permit) => {
                                tasks.spawn(handle_connection(conn, state, permit));
                            }
                            None => {
                                tasks.spawn(reject_full(conn, state.codec.clone(), state.drain_timeout));
                            }
                        }
                    }
                    Err(TransportError::Shutdown) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        tokio::select! {
                            () = &mut signal => {
                                tracing::info!("shutdown requested");
                                break;
                            }
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        self.transport.shutdown();
        self.state.manager.shutdown();

        let drained = tokio::time::timeout(self.state.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "drain timed out, aborting sessions");
            tasks.shutdown().await;
        }

        tracing::info!("wyvern server stopped");
        Ok(())
    }
}
