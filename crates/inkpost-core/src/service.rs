//! Account lifecycle: registration, email verification, login and
//! password reset.
//!
//! Every operation is validate -> consult store -> (maybe) notify ->
//! respond. Failures that would leave half-finished state (an account whose
//! code never went out, a reset code nobody received) are compensated
//! before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use crate::account::{
    AccountId, AccountSummary, AccountUpdate, CodeKind, NewAccount, PendingCode, PublicProfile, Role,
};
use crate::clock::Clock;
use crate::code::generate_code;
use crate::error::{CoreError, CoreResult};
use crate::mail::{reset_message, verification_message, Message, Notifier};
use crate::password::PasswordHasher;
use crate::store::{bounded, CredentialStore};
use crate::token::TokenIssuer;
use crate::validation::{check_password, check_registration, lookup_email, require};

/// Default lifetime of verification and reset codes.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Shown in email subjects and headings.
    pub product_name: String,
    pub code_ttl: Duration,
    pub store_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            product_name: "Inkpost".to_string(),
            code_ttl: DEFAULT_CODE_TTL,
            store_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub expires_at: u64,
    pub account_id: AccountId,
    pub role: Role,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    tokens: TokenIssuer,
    hasher: Arc<PasswordHasher>,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        tokens: TokenIssuer,
        hasher: PasswordHasher,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            tokens,
            hasher: Arc::new(hasher),
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Creates an unverified account and mails it a verification code.
    ///
    /// The account is removed again if the code cannot be delivered.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> CoreResult<AccountId> {
        let reg = check_registration(username, email, password)?;

        let existing = bounded(
            self.settings.store_timeout,
            "find existing account",
            self.store.find_by_username_or_email(&reg.username, &reg.email),
        )
        .await?;
        if let Some(existing) = existing {
            if existing.is_banned {
                return Err(CoreError::Banned);
            }
            return Err(CoreError::AlreadyTaken);
        }

        let password_hash = self.hash(password).await?;
        let code = generate_code();
        let now = self.clock.now();

        let account = bounded(
            self.settings.store_timeout,
            "insert account",
            self.store.insert_unique(NewAccount {
                username: reg.username,
                email: reg.email,
                password_hash,
                display_name: reg.display_name,
                verification: PendingCode::issued(code.clone(), now, self.settings.code_ttl),
                created_at: now,
            }),
        )
        .await?;

        let message = verification_message(&self.settings.product_name, &code, self.settings.code_ttl);
        if let Err(reason) = self.deliver(&account.email, &message).await {
            tracing::error!(account = %account.id, "Verification mail failed, rolling back: {reason}");
            let rolled_back = bounded(
                self.settings.store_timeout,
                "roll back account",
                self.store.delete(&account.id),
            )
            .await;
            if let Err(e) = rolled_back {
                tracing::error!(account = %account.id, "Rollback failed: {e}");
            }
            return Err(CoreError::Delivery(reason));
        }

        tracing::info!(account = %account.id, username = %account.username, "Account registered");
        Ok(account.id)
    }

    /// Redeems a verification code. Wrong email, wrong code, expired code
    /// and replay all fail the same way.
    pub async fn verify_email(&self, email: &str, code: &str) -> CoreResult<()> {
        let email = lookup_email(email);
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Err(CoreError::InvalidCode);
        }

        let verified = bounded(
            self.settings.store_timeout,
            "consume verification code",
            self.store.consume_code(
                &email,
                CodeKind::Verification,
                code,
                self.clock.now(),
                AccountUpdate {
                    is_verified: Some(true),
                    ..AccountUpdate::default()
                },
            ),
        )
        .await?;

        match verified {
            Some(account) => {
                tracing::info!(account = %account.id, "Email verified");
                Ok(())
            }
            None => {
                tracing::warn!("Rejected verification code");
                Err(CoreError::InvalidCode)
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> CoreResult<LoginOutcome> {
        require(username, "Username is required")?;
        require(password, "Password is required")?;
        let username = username.trim().to_lowercase();

        let account = bounded(
            self.settings.store_timeout,
            "find account by username",
            self.store.find_by_username(&username),
        )
        .await?;

        let Some(account) = account else {
            self.burn_verification(password).await?;
            tracing::warn!("Failed login attempt for unknown user: {username}");
            return Err(CoreError::InvalidCredentials);
        };

        if !self.verify(&account.password_hash, password).await? {
            tracing::warn!("Failed login attempt for user: {username}");
            return Err(CoreError::InvalidCredentials);
        }
        if !account.is_verified {
            return Err(CoreError::NotVerified);
        }
        if account.is_banned {
            tracing::warn!(account = %account.id, "Banned account attempted login");
            return Err(CoreError::Banned);
        }

        let issued = self.tokens.issue(&account.id, &account.username)?;
        tracing::info!(account = %account.id, "Login succeeded");
        Ok(LoginOutcome {
            token: issued.token,
            expires_at: issued.expires_at,
            account_id: account.id,
            role: account.role,
        })
    }

    /// Starts a password reset. Succeeds identically whether or not the
    /// address belongs to an account; only a real, unbanned account gets a
    /// code.
    pub async fn forgot_password(&self, email: &str) -> CoreResult<()> {
        let email = lookup_email(email);
        if email.is_empty() {
            return Ok(());
        }

        let account = bounded(
            self.settings.store_timeout,
            "find account by email",
            self.store.find_by_email(&email),
        )
        .await?;
        let Some(account) = account else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(());
        };
        if account.is_banned {
            tracing::warn!(account = %account.id, "Password reset requested for banned account");
            return Ok(());
        }

        let code = generate_code();
        let pending = PendingCode::issued(code.clone(), self.clock.now(), self.settings.code_ttl);
        bounded(
            self.settings.store_timeout,
            "store reset code",
            self.store.update_fields(
                &account.id,
                AccountUpdate {
                    reset: Some(Some(pending)),
                    ..AccountUpdate::default()
                },
            ),
        )
        .await?;

        let message = reset_message(&self.settings.product_name, &code, self.settings.code_ttl);
        if let Err(reason) = self.deliver(&account.email, &message).await {
            tracing::error!(account = %account.id, "Reset mail failed, clearing code: {reason}");
            let cleared = bounded(
                self.settings.store_timeout,
                "clear reset code",
                self.store.update_fields(
                    &account.id,
                    AccountUpdate::default().clear_code(CodeKind::Reset),
                ),
            )
            .await;
            if let Err(e) = cleared {
                tracing::error!(account = %account.id, "Clearing reset code failed: {e}");
            }
            return Err(CoreError::Delivery(reason));
        }

        tracing::info!(account = %account.id, "Password reset code sent");
        Ok(())
    }

    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> CoreResult<()> {
        check_password(new_password)?;
        require(code, "Code is required")?;
        let email = lookup_email(email);

        // Hash up front so unknown emails cost the same as wrong codes.
        let password_hash = self.hash(new_password).await?;

        let account = bounded(
            self.settings.store_timeout,
            "find account by email",
            self.store.find_by_email(&email),
        )
        .await?;
        match account {
            None => return Err(CoreError::InvalidCode),
            Some(account) if account.is_banned => return Err(CoreError::Banned),
            Some(_) => {}
        }

        let reset = bounded(
            self.settings.store_timeout,
            "consume reset code",
            self.store.consume_code(
                &email,
                CodeKind::Reset,
                code.trim(),
                self.clock.now(),
                AccountUpdate {
                    password_hash: Some(password_hash),
                    ..AccountUpdate::default()
                },
            ),
        )
        .await?;

        match reset {
            Some(account) => {
                tracing::info!(account = %account.id, "Password reset");
                Ok(())
            }
            None => {
                tracing::warn!("Rejected reset code");
                Err(CoreError::InvalidCode)
            }
        }
    }

    /// Profile projection for the bearer of a valid token.
    pub async fn me(&self, account_id: &str) -> CoreResult<AccountSummary> {
        bounded(
            self.settings.store_timeout,
            "find account by id",
            self.store.find_by_id(account_id),
        )
        .await?
        .map(|a| a.summary())
        .ok_or(CoreError::NotFound)
    }

    pub async fn public_profile(&self, account_id: &str) -> CoreResult<PublicProfile> {
        bounded(
            self.settings.store_timeout,
            "find account by id",
            self.store.find_by_id(account_id),
        )
        .await?
        .map(|a| a.public_profile())
        .ok_or(CoreError::NotFound)
    }

    async fn deliver(&self, to: &str, message: &Message) -> Result<(), String> {
        let send = self.notifier.send(to, &message.subject, &message.body);
        match tokio::time::timeout(self.settings.notify_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("notifier timed out".to_string()),
        }
    }

    async fn hash(&self, password: &str) -> CoreResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
    }

    async fn verify(&self, hash: &str, password: &str) -> CoreResult<bool> {
        let hasher = self.hasher.clone();
        let hash = hash.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    async fn burn_verification(&self, password: &str) -> CoreResult<()> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify_dummy(&password))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(())
    }
}
