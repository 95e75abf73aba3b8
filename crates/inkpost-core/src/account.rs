//! Account records and the partial updates applied to them.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Opaque account identifier.
pub type AccountId = String;

/// Authorization role attached to an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Public-facing social links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
}

/// Display data owned by the account holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub social: SocialLinks,
}

/// Which one-time code slot an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Verification,
    Reset,
}

/// A pending one-time code and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCode {
    pub code: String,
    pub expires_at: SystemTime,
}

impl PendingCode {
    pub fn issued(code: String, now: SystemTime, ttl: Duration) -> Self {
        Self {
            code,
            expires_at: now + ttl,
        }
    }

    /// A code is live strictly before `expires_at`.
    pub fn is_live(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }
}

/// A stored account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Always lower-case.
    pub username: String,
    /// Always trimmed and lower-case.
    pub email: String,
    pub password_hash: String,
    pub profile: Profile,
    pub role: Role,
    pub is_verified: bool,
    pub is_banned: bool,
    pub verification: Option<PendingCode>,
    pub reset: Option<PendingCode>,
    #[serde(default)]
    pub followers: Vec<AccountId>,
    #[serde(default)]
    pub following: Vec<AccountId>,
    pub created_at: SystemTime,
}

impl Account {
    pub fn pending(&self, kind: CodeKind) -> Option<&PendingCode> {
        match kind {
            CodeKind::Verification => self.verification.as_ref(),
            CodeKind::Reset => self.reset.as_ref(),
        }
    }

    /// Applies every field present in `update`.
    pub fn apply(&mut self, update: &AccountUpdate) {
        if let Some(hash) = &update.password_hash {
            self.password_hash = hash.clone();
        }
        if let Some(verified) = update.is_verified {
            self.is_verified = verified;
        }
        if let Some(banned) = update.is_banned {
            self.is_banned = banned;
        }
        if let Some(role) = update.role {
            self.role = role;
        }
        if let Some(verification) = &update.verification {
            self.verification = verification.clone();
        }
        if let Some(reset) = &update.reset {
            self.reset = reset.clone();
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            role: self.role,
            avatar: self.profile.avatar.clone(),
        }
    }

    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.profile.display_name.clone(),
            bio: self.profile.bio.clone(),
            avatar: self.profile.avatar.clone(),
            social: self.profile.social.clone(),
            role: self.role,
            followers: self.followers.len(),
            following: self.following.len(),
            created_at: crate::clock::unix_seconds(self.created_at),
        }
    }
}

/// Everything the store needs to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub verification: PendingCode,
    pub created_at: SystemTime,
}

/// A partial update. `None` leaves a field untouched; for the code slots,
/// `Some(None)` clears the slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountUpdate {
    pub password_hash: Option<String>,
    pub is_verified: Option<bool>,
    pub is_banned: Option<bool>,
    pub role: Option<Role>,
    pub verification: Option<Option<PendingCode>>,
    pub reset: Option<Option<PendingCode>>,
}

impl AccountUpdate {
    /// Clears the slot for `kind`.
    pub fn clear_code(mut self, kind: CodeKind) -> Self {
        match kind {
            CodeKind::Verification => self.verification = Some(None),
            CodeKind::Reset => self.reset = Some(None),
        }
        self
    }
}

/// Minimal projection returned to the bearer of a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub username: String,
    pub role: Role,
    pub avatar: Option<String>,
}

/// What anyone may see about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicProfile {
    pub id: AccountId,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub social: SocialLinks,
    pub role: Role,
    pub followers: usize,
    pub following: usize,
    pub created_at: u64,
}
