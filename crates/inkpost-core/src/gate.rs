//! Bearer-token gating for protected routes.

use std::sync::Arc;
use std::time::Duration;

use crate::account::{AccountId, Role};
use crate::error::{CoreError, CoreResult};
use crate::store::{bounded, CredentialStore};
use crate::token::TokenIssuer;

/// The caller behind a verified token, as the store sees it right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: AccountId,
    pub username: String,
    pub role: Role,
}

/// Verifies a bearer token and re-checks the account it names.
///
/// Ban status and existence come from the store on every call; the token's
/// claims are a snapshot from login and are not trusted for either.
#[derive(Clone)]
pub struct SessionGate {
    tokens: TokenIssuer,
    store: Arc<dyn CredentialStore>,
    store_timeout: Duration,
}

impl SessionGate {
    pub fn new(tokens: TokenIssuer, store: Arc<dyn CredentialStore>, store_timeout: Duration) -> Self {
        Self {
            tokens,
            store,
            store_timeout,
        }
    }

    /// `authorization` is the raw `Authorization` header value.
    ///
    /// Missing header -> [`CoreError::MissingToken`]; malformed, forged or
    /// expired token -> [`CoreError::InvalidToken`]; account gone ->
    /// [`CoreError::NotFound`]; account banned -> [`CoreError::Banned`].
    pub async fn authenticate(&self, authorization: Option<&str>) -> CoreResult<Identity> {
        let header = authorization.ok_or(CoreError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CoreError::InvalidToken)?;

        let claims = self.tokens.verify(token)?;

        let account = bounded(
            self.store_timeout,
            "find account for token",
            self.store.find_by_id(&claims.sub),
        )
        .await?
        .ok_or(CoreError::NotFound)?;

        if account.is_banned {
            tracing::warn!(account = %account.id, "Rejected token of banned account");
            return Err(CoreError::Banned);
        }

        Ok(Identity {
            account_id: account.id,
            username: account.username,
            role: account.role,
        })
    }
}
