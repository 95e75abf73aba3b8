//! Error types for `inkpost-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`.

use std::time::Duration;

/// Unified error type for the credential lifecycle and request admission.
///
/// The `Display` text of client-facing variants is the message shown to API
/// callers. [`CoreError::Dependency`] and [`CoreError::Internal`] carry
/// operator detail that must never reach a client; use
/// [`CoreError::public_message`] when rendering.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input. Carries the first violated rule.
    #[error("{0}")]
    Validation(String),

    /// A registration collided with an existing username or email.
    #[error("This username or email is already taken")]
    AlreadyTaken,

    /// The account exists but has been banned.
    #[error("This account has been banned.")]
    Banned,

    /// Unknown username or wrong password. Deliberately indistinguishable.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Correct credentials, but the email address was never confirmed.
    #[error("Please verify your email first.")]
    NotVerified,

    /// Wrong, expired or already consumed one-time code.
    #[error("Invalid or expired code")]
    InvalidCode,

    /// No bearer token on a protected request.
    #[error("Token not found")]
    MissingToken,

    /// Any structural, cryptographic or expiry failure of a bearer token.
    #[error("Invalid token")]
    InvalidToken,

    /// The account referenced by a token or path no longer exists.
    #[error("User not found")]
    NotFound,

    /// A rate-limit window is exhausted for the request key.
    #[error("{message}")]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    /// A one-time code could not be delivered; pending state was rolled back.
    #[error("Mail could not be sent.")]
    Delivery(String),

    /// The credential store, notifier or counter store failed or timed out.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// Anything unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Message safe to return to an API caller.
    pub fn public_message(&self) -> String {
        match self {
            CoreError::Dependency(_) | CoreError::Internal(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Returns `true` for failures caused by infrastructure rather than input.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            CoreError::Delivery(_) | CoreError::Dependency(_) | CoreError::Internal(_)
        )
    }
}

/// Convenience alias used throughout `inkpost-core`.
pub type CoreResult<T> = Result<T, CoreError>;
