//! Session layer for Wyvern.
//!
//! This crate owns everything between a deframed [`Packet`] and a
//! dispatchable application message:
//!
//! 1. **Handshake**: negotiating a fresh symmetric key per connection
//!    ([`ClientHandshake`] for the client half)
//! 2. **Secure channel**: encryption plus per-direction sequence
//!    counters ([`SecureChannel`])
//! 3. **State machine**: what each phase accepts and how it ends
//!    ([`Session`], [`SessionState`], [`Step`])
//! 4. **Authentication**: the [`AccountStore`] hook
//! 5. **Registry**: live session IDs, account binding, ID quarantine
//!    ([`SessionRegistry`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)  ← receives decrypted application bodies
//!     ↕
//! Session Layer (this crate)  ← decrypts, sequences, enforces state
//!     ↕
//! Protocol + Crypto (below)  ← frames, checksums, ciphers
//! ```
//!
//! [`Packet`]: wyvern_protocol::Packet

mod auth;
mod channel;
mod error;
mod handshake;
mod registry;
mod session;

pub use auth::{AccountIdentity, AccountStore, MemoryAccountStore};
pub use channel::{SEALED_OVERHEAD, SecureChannel};
pub use error::SessionError;
pub use handshake::ClientHandshake;
pub use registry::{SessionCounts, SessionRecord, SessionRegistry};
pub use session::{Session, SessionConfig, SessionState, Step};
