use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use inkpost_core::ratelimit::DEFAULT_IPV6_PREFIX;
use inkpost_core::{FailMode, HashCost, ScopePolicy};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    #[serde(default = "default_code_ttl_seconds")]
    pub code_ttl_seconds: u64,
    #[serde(default = "default_hash_memory_kib")]
    pub hash_memory_kib: u32,
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
    #[serde(default = "default_hash_parallelism")]
    pub hash_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_api_url")]
    pub api_url: String,
    /// Without a key, mail is written to the log instead of being sent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_product_name")]
    pub product_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: CounterBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_ipv6_prefix")]
    pub ipv6_prefix: u8,
    /// Take the client address from `X-Forwarded-For`.
    #[serde(default)]
    pub trust_proxy: bool,
    /// Keyed by scope name, e.g. `[rate_limit.scopes."auth:ip"]`.
    #[serde(default)]
    pub scopes: HashMap<String, ScopeOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeOverride {
    pub window_seconds: Option<u64>,
    pub max: Option<u32>,
    pub fail_open: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_store_ms")]
    pub store_ms: u64,
    #[serde(default = "default_notifier_ms")]
    pub notifier_ms: u64,
    #[serde(default = "default_counter_ms")]
    pub counter_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
            code_ttl_seconds: default_code_ttl_seconds(),
            hash_memory_kib: default_hash_memory_kib(),
            hash_iterations: default_hash_iterations(),
            hash_parallelism: default_hash_parallelism(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: default_mail_api_url(),
            api_key: None,
            from: default_mail_from(),
            product_name: default_product_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: CounterBackend::Memory,
            redis_url: None,
            ipv6_prefix: default_ipv6_prefix(),
            trust_proxy: false,
            scopes: HashMap::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_ms: default_store_ms(),
            notifier_ms: default_notifier_ms(),
            counter_ms: default_counter_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth: AuthConfig::default(),
            mail: MailConfig::default(),
            rate_limit: RateLimitConfig::default(),
            timeouts: TimeoutConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_token_ttl_hours() -> u64 { 72 }
fn default_code_ttl_seconds() -> u64 { 3600 }
fn default_hash_memory_kib() -> u32 { HashCost::default().memory_kib }
fn default_hash_iterations() -> u32 { HashCost::default().iterations }
fn default_hash_parallelism() -> u32 { HashCost::default().parallelism }
fn default_mail_api_url() -> String { "https://api.resend.com/emails".to_string() }
fn default_mail_from() -> String { "Inkpost <onboarding@resend.dev>".to_string() }
fn default_product_name() -> String { "Inkpost".to_string() }
fn default_ipv6_prefix() -> u8 { DEFAULT_IPV6_PREFIX }
fn default_store_ms() -> u64 { 5_000 }
fn default_notifier_ms() -> u64 { 10_000 }
fn default_counter_ms() -> u64 { 500 }

const WEAK_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "secret",
    "password",
    "jwt-secret",
    "your_jwt_secret",
];

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 60 * 60)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_seconds)
    }

    pub fn hash_cost(&self) -> HashCost {
        HashCost {
            memory_kib: self.hash_memory_kib,
            iterations: self.hash_iterations,
            parallelism: self.hash_parallelism,
        }
    }
}

impl TimeoutConfig {
    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn notifier(&self) -> Duration {
        Duration::from_millis(self.notifier_ms)
    }

    pub fn counter(&self) -> Duration {
        Duration::from_millis(self.counter_ms)
    }
}

impl RateLimitConfig {
    /// The built-in scope table with configured overrides applied.
    pub fn policies(&self) -> Vec<ScopePolicy> {
        ScopePolicy::table()
            .into_iter()
            .map(|mut policy| {
                if let Some(o) = self.scopes.get(policy.name) {
                    if let Some(secs) = o.window_seconds {
                        policy.window = Duration::from_secs(secs.max(1));
                    }
                    if let Some(max) = o.max {
                        policy.max = max;
                    }
                    if let Some(open) = o.fail_open {
                        policy.fail_mode = if open { FailMode::Open } else { FailMode::Closed };
                    }
                }
                policy
            })
            .collect()
    }
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("INKPOST_CONFIG").map(PathBuf::from).ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            ServerConfig::default()
        };

        config.apply_env()?;
        config.check_secret()?;

        for name in config.rate_limit.scopes.keys() {
            if !ScopePolicy::table().iter().any(|p| p.name == name) {
                tracing::warn!("Ignoring override for unknown rate-limit scope: {name}");
            }
        }

        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(addr) = std::env::var("INKPOST_BIND_ADDR") {
            self.bind_addr = addr.parse()?;
        }
        if let Ok(secret) = std::env::var("INKPOST_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(url) = std::env::var("INKPOST_MAIL_API_URL") {
            self.mail.api_url = url;
        }
        if let Ok(key) = std::env::var("INKPOST_MAIL_API_KEY") {
            self.mail.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Ok(from) = std::env::var("INKPOST_MAIL_FROM") {
            self.mail.from = from;
        }

        if let Ok(url) = std::env::var("INKPOST_REDIS_URL") {
            self.rate_limit.redis_url = Some(url);
            self.rate_limit.backend = CounterBackend::Redis;
        }
        if let Ok(val) = std::env::var("INKPOST_TRUST_PROXY") {
            self.rate_limit.trust_proxy = matches!(val.as_str(), "1" | "true" | "yes");
        }

        if let Ok(cert) = std::env::var("INKPOST_TLS_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Ok(key) = std::env::var("INKPOST_TLS_KEY") {
            self.tls.key_path = Some(key);
        }

        Ok(())
    }

    /// Generates a throwaway secret when none is set and refuses known
    /// placeholder values.
    fn check_secret(&mut self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            self.auth.jwt_secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
            tracing::warn!(
                "No JWT secret configured. Generated random secret (sessions end on restart)."
            );
            return Ok(());
        }

        if WEAK_SECRETS.iter().any(|&w| self.auth.jwt_secret == w) {
            anyhow::bail!(
                "JWT secret matches a known weak/placeholder value. \
                 Set a strong random secret via INKPOST_JWT_SECRET."
            );
        }
        if self.auth.jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT secret is shorter than 32 characters. \
                 Consider using a stronger secret via INKPOST_JWT_SECRET."
            );
        }
        Ok(())
    }
}
