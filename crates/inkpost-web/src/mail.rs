use async_trait::async_trait;
use inkpost_core::{Notifier, NotifyError};

use crate::config::MailConfig;

/// Sends mail through a transactional email HTTP API.
pub struct HttpMailNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailNotifier {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpMailNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": body,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "mail API returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Development notifier: logs the message instead of sending it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(to, subject, "Mail not sent (no API key configured):\n{body}");
        Ok(())
    }
}

/// Picks the HTTP notifier when an API key is configured.
pub fn notifier_from_config(config: &MailConfig) -> std::sync::Arc<dyn Notifier> {
    match &config.api_key {
        Some(key) => std::sync::Arc::new(HttpMailNotifier::new(&config.api_url, key, &config.from)),
        None => {
            tracing::warn!("No mail API key configured. Codes will be written to the log.");
            std::sync::Arc::new(LogNotifier)
        }
    }
}
