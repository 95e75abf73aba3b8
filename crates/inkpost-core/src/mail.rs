//! Outbound notification capability and the messages the auth flows send.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Delivers a message to an address.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// A rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

fn minutes(ttl: Duration) -> u64 {
    (ttl.as_secs() / 60).max(1)
}

pub fn verification_message(product: &str, code: &str, ttl: Duration) -> Message {
    Message {
        subject: format!("Your {product} verification code"),
        body: format!(
            r#"<div style="font-family: Arial; text-align: center; padding: 20px;">
    <h2>Welcome to {product}!</h2>
    <p>Enter the code below to verify your account:</p>
    <h1 style="color: #4a90e2; letter-spacing: 5px;">{code}</h1>
    <p>This code is valid for {mins} minutes.</p>
</div>"#,
            mins = minutes(ttl),
        ),
    }
}

pub fn reset_message(product: &str, code: &str, ttl: Duration) -> Message {
    Message {
        subject: format!("{product} password reset code"),
        body: format!(
            r#"<div style="font-family: Arial; text-align: center; padding: 20px;">
    <h2>Password Reset Request</h2>
    <p>Use the code below to reset your password:</p>
    <h1 style="color: #e74c3c; letter-spacing: 5px;">{code}</h1>
    <p>This code is valid for {mins} minutes.</p>
    <p>If you did not make this request, ignore this email.</p>
</div>"#,
            mins = minutes(ttl),
        ),
    }
}
