//! Persistence interface for accounts.
//!
//! The service never reads-then-writes a one-time code: redeeming one goes
//! through [`CredentialStore::consume_code`], which must match, clear and
//! apply the follow-up update as one atomic step.

pub mod memory;

use std::future::Future;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::account::{Account, AccountUpdate, CodeKind, NewAccount};
use crate::error::{CoreError, CoreResult};

pub use memory::InMemoryCredentialStore;

/// Runs one store call under `timeout`, translating its failure modes.
///
/// A uniqueness conflict becomes [`CoreError::AlreadyTaken`]; an
/// unreachable or slow store becomes [`CoreError::Dependency`].
pub async fn bounded<T, F>(timeout: Duration, op: &'static str, call: F) -> CoreResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(StoreError::Conflict)) => Err(CoreError::AlreadyTaken),
        Ok(Err(StoreError::Unavailable(e))) => Err(CoreError::Dependency(format!("{op}: {e}"))),
        Err(_) => Err(CoreError::Dependency(format!("{op}: timed out"))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint on username or email was violated.
    #[error("username or email already exists")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds an account whose username or email equals the given
    /// (already lower-cased) values.
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Inserts a new unverified account, failing with
    /// [`StoreError::Conflict`] on a duplicate username or email.
    async fn insert_unique(&self, account: NewAccount) -> Result<Account, StoreError>;

    /// Applies a partial update. Returns `false` when no account has `id`.
    async fn update_fields(&self, id: &str, update: AccountUpdate) -> Result<bool, StoreError>;

    /// Returns `false` when no account has `id`.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Atomically finds the account with `email` whose pending `kind` code
    /// equals `code` and is live at `now`, clears that code, applies `then`,
    /// and returns the updated account. Concurrent callers presenting the
    /// same code see at most one `Some`.
    async fn consume_code(
        &self,
        email: &str,
        kind: CodeKind,
        code: &str,
        now: SystemTime,
        then: AccountUpdate,
    ) -> Result<Option<Account>, StoreError>;
}
