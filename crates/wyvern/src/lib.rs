//! # Wyvern
//!
//! Encrypted session server core for binary game protocols.
//!
//! Wyvern accepts untrusted stream connections, agrees a fresh symmetric
//! key with each one, authenticates the player, and then routes sealed,
//! sequenced application packets to handlers the game registers. Game
//! developers write [`Handler`]s and an [`AccountStore`]; the framework
//! owns framing, crypto, session state and connection bookkeeping.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wyvern::prelude::*;
//!
//! # async fn start() -> Result<(), WyvernError> {
//! let echo = |_: &SessionContext, body: Bytes| -> HandlerResult { Ok(Some(body)) };
//! let dispatcher = Dispatcher::new().with(Opcode(0x0100), echo)?;
//! let accounts = MemoryAccountStore::new().with_account("alice", "secret", AccountId(42));
//!
//! let server = WyvernServer::builder()
//!     .bind("0.0.0.0:7777")
//!     .dispatcher(dispatcher)
//!     .build(accounts)
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod dispatcher;
mod error;
pub mod logging;
pub mod manager;
mod server;

pub use client::{Incoming, Login, WyvernClient};
pub use config::{ConfigError, ServerConfig};
pub use dispatcher::{
    Dispatch, DispatchError, Dispatcher, Handler, HandlerError, HandlerResult, SessionContext,
};
pub use error::WyvernError;
pub use manager::{ConnectionManager, SessionEvent};
pub use server::{WyvernServer, WyvernServerBuilder};

pub use wyvern_crypto::{CipherSuite, ServerKeyPair};
pub use wyvern_protocol::{
    AccountId, Bytes, ChecksumAlgorithm, CloseReason, ErrorCode, FrameCodec, Opcode, Packet,
    SessionId, opcodes,
};
pub use wyvern_session::{
    AccountIdentity, AccountStore, MemoryAccountStore, SessionCounts, SessionError, SessionState,
};
pub use wyvern_transport::{MemoryConnector, MemoryTransport, TcpTransport, Transport};

/// Everything a game server binary usually needs.
pub mod prelude {
    pub use crate::{
        AccountId, AccountIdentity, AccountStore, Bytes, CloseReason, ConnectionManager,
        Dispatcher, HandlerError, HandlerResult, MemoryAccountStore, Opcode, ServerConfig,
        SessionContext, SessionEvent, WyvernError, WyvernServer,
    };
}
