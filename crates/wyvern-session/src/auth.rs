//! Account verification hook.
//!
//! Wyvern doesn't own player accounts. The game's persistence layer does,
//! and plugs in through the [`AccountStore`] trait. The session calls it
//! once per `AUTH_REQUEST` while in `Authenticating`; the call may be slow
//! (a database round trip), and only that session waits on it.
//!
//! [`MemoryAccountStore`] is a small in-process implementation for tests,
//! demos, and servers with a fixed account list.

use std::collections::HashMap;
use std::future::Future;

use wyvern_crypto::{Digest, digests_equal, hash};
use wyvern_protocol::AccountId;

use crate::SessionError;

/// Who a session belongs to once authentication succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub account_id: AccountId,
    /// Display name, as the store knows it.
    pub name: String,
}

/// Validates credentials and returns the account they belong to.
///
/// # Example
///
/// ```rust
/// use wyvern_session::{AccountIdentity, AccountStore, SessionError};
/// use wyvern_protocol::AccountId;
///
/// /// Lets everyone in as account 1. Development only.
/// struct OpenDoor;
///
/// impl AccountStore for OpenDoor {
///     async fn verify_credentials(
///         &self,
///         user: &str,
///         _credential: &str,
///     ) -> Result<AccountIdentity, SessionError> {
///         Ok(AccountIdentity { account_id: AccountId(1), name: user.to_string() })
///     }
/// }
/// ```
pub trait AccountStore: Send + Sync + 'static {
    /// - `Ok(identity)`: credentials are good
    /// - `Err(SessionError::AuthFailed)`: unknown user or wrong credential
    fn verify_credentials(
        &self,
        user: &str,
        credential: &str,
    ) -> impl Future<Output = Result<AccountIdentity, SessionError>> + Send;
}

struct StoredAccount {
    account_id: AccountId,
    digest: Digest,
}

/// An [`AccountStore`] backed by a `HashMap` of SHA-256 credential digests.
///
/// Plaintext credentials are hashed on insert and never kept.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: HashMap<String, StoredAccount>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_account(mut self, user: &str, credential: &str, account_id: AccountId) -> Self {
        self.insert(user, credential, account_id);
        self
    }

    /// Adds or replaces an account.
    pub fn insert(&mut self, user: &str, credential: &str, account_id: AccountId) {
        self.insert_digest(user, hash(credential.as_bytes()), account_id);
    }

    /// Adds an account from an already-computed credential digest.
    pub fn insert_digest(&mut self, user: &str, digest: Digest, account_id: AccountId) {
        self.accounts.insert(
            user.to_string(),
            StoredAccount { account_id, digest },
        );
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn verify(&self, user: &str, credential: &str) -> Result<AccountIdentity, SessionError> {
        let presented = hash(credential.as_bytes());
        match self.accounts.get(user) {
            Some(stored) if digests_equal(&stored.digest, &presented) => Ok(AccountIdentity {
                account_id: stored.account_id,
                name: user.to_string(),
            }),
            // Same message for unknown user and wrong credential.
            _ => Err(SessionError::AuthFailed("invalid credentials".into())),
        }
    }
}

impl AccountStore for MemoryAccountStore {
    async fn verify_credentials(
        &self,
        user: &str,
        credential: &str,
    ) -> Result<AccountIdentity, SessionError> {
        self.verify(user, credential)
    }
}

// =========================================================================
// Tests
// =========================================================================
