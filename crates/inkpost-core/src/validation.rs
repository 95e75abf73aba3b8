//! Input shape rules. Each check reports the first violated rule only.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, CoreResult};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 72;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("username pattern compiles"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern compiles")
});

fn invalid(msg: &str) -> CoreError {
    CoreError::Validation(msg.to_string())
}

/// Trims and checks a username, returning it lower-cased.
pub fn normalize_username(raw: &str) -> CoreResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(invalid("Username is required"));
    }
    let len = name.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(invalid("Username must be between 3-20 characters"));
    }
    if !USERNAME_RE.is_match(name) {
        return Err(invalid(
            "Username can only contain letters, numbers and underscore",
        ));
    }
    Ok(name.to_lowercase())
}

/// Trims and checks an email address, returning it lower-cased.
pub fn normalize_email(raw: &str) -> CoreResult<String> {
    let email = raw.trim();
    if email.len() > 254 || !EMAIL_RE.is_match(email) {
        return Err(invalid("Invalid Email"));
    }
    Ok(email.to_lowercase())
}

/// Lower-cases an email for lookups without rejecting it.
///
/// Lookup paths answer malformed input with their usual generic outcome
/// rather than a validation error.
pub fn lookup_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn check_password(password: &str) -> CoreResult<()> {
    let len = password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(invalid("Password must be between 6-72 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid("Password must contain at least one number"));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(invalid("Password must contain at least one lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("Password must contain at least one capital letter"));
    }
    Ok(())
}

pub fn require(value: &str, msg: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(msg));
    }
    Ok(())
}

/// Normalized registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub display_name: String,
    pub email: String,
}

/// Checks all registration fields in order: username, email, password.
pub fn check_registration(username: &str, email: &str, password: &str) -> CoreResult<Registration> {
    let normalized = normalize_username(username)?;
    let email = normalize_email(email)?;
    check_password(password)?;
    Ok(Registration {
        username: normalized,
        display_name: username.trim().to_string(),
        email,
    })
}
