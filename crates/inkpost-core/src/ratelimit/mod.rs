//! Fixed-window request admission.
//!
//! A [`RateLimiter`] pairs one [`ScopePolicy`] with a shared
//! [`CounterStore`]. Each request key gets a counter and a window start;
//! once `now - start >= window` the counter restarts at zero. Requests past
//! `max` inside a window are denied until the window rolls over.

pub mod key;
pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};

pub use key::{ip_key, KeyPolicy, KeySource, DEFAULT_IPV6_PREFIX};
pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;

const AUTH_MESSAGE: &str = "Too many auth attempts. Please try again later";
const GENERIC_MESSAGE: &str = "Too many requests. Please try again later";

/// What a scope does when its counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Admit the request and log a warning.
    Open,
    /// Refuse the request with a dependency error.
    Closed,
}

/// Window, cap and keying rules for one named scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max: u32,
    pub key: KeyPolicy,
    pub fail_mode: FailMode,
    /// Give the slot back when the request succeeds.
    pub skip_successful: bool,
    pub message: &'static str,
}

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

impl ScopePolicy {
    const fn new(
        name: &'static str,
        window: Duration,
        max: u32,
        key: KeyPolicy,
        fail_mode: FailMode,
        message: &'static str,
    ) -> Self {
        Self {
            name,
            window,
            max,
            key,
            fail_mode,
            skip_successful: false,
            message,
        }
    }

    pub fn global() -> Self {
        Self::new("global", minutes(1), 500, KeyPolicy::Ip, FailMode::Open, GENERIC_MESSAGE)
    }

    pub fn register() -> Self {
        Self::new("auth:ip", minutes(10), 5, KeyPolicy::Ip, FailMode::Closed, AUTH_MESSAGE)
    }

    /// Failed logins only; successful attempts are refunded.
    pub fn login() -> Self {
        Self {
            skip_successful: true,
            ..Self::new(
                "auth:username",
                minutes(10),
                5,
                KeyPolicy::IpAndField("username"),
                FailMode::Closed,
                AUTH_MESSAGE,
            )
        }
    }

    /// Verification and password flows, keyed by submitted email.
    pub fn email() -> Self {
        Self::new(
            "auth:email",
            minutes(10),
            5,
            KeyPolicy::IpAndField("email"),
            FailMode::Closed,
            AUTH_MESSAGE,
        )
    }

    pub fn read() -> Self {
        Self::new("read", minutes(10), 300, KeyPolicy::Ip, FailMode::Open, GENERIC_MESSAGE)
    }

    pub fn authenticated_read() -> Self {
        Self::new(
            "read:user",
            minutes(10),
            400,
            KeyPolicy::AccountOrIp,
            FailMode::Open,
            GENERIC_MESSAGE,
        )
    }

    pub fn write() -> Self {
        Self::new(
            "write",
            minutes(5),
            100,
            KeyPolicy::AccountOrIp,
            FailMode::Closed,
            GENERIC_MESSAGE,
        )
    }

    pub fn report() -> Self {
        Self::new(
            "report",
            minutes(5),
            10,
            KeyPolicy::AccountOrIp,
            FailMode::Closed,
            GENERIC_MESSAGE,
        )
    }

    pub fn admin() -> Self {
        Self::new(
            "admin",
            minutes(5),
            100,
            KeyPolicy::AccountOrIp,
            FailMode::Closed,
            GENERIC_MESSAGE,
        )
    }

    /// Every built-in scope.
    pub fn table() -> Vec<Self> {
        vec![
            Self::global(),
            Self::register(),
            Self::login(),
            Self::email(),
            Self::read(),
            Self::authenticated_read(),
            Self::write(),
            Self::report(),
            Self::admin(),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Counter state after one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u32,
    pub reset_at: SystemTime,
}

/// Shared key -> (count, window start) storage.
///
/// `hit` must increment atomically: concurrent hits on one key never
/// observe the same count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(&self, key: &str, window: Duration, now: SystemTime)
        -> Result<WindowHit, CounterError>;

    /// Gives one unit back to the current window, if it is still open.
    async fn release(&self, key: &str, now: SystemTime) -> Result<(), CounterError>;
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_after: Duration,
    },
    Denied {
        limit: u32,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

pub struct RateLimiter {
    policy: ScopePolicy,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(
        policy: ScopePolicy,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
            timeout,
        }
    }

    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    fn storage_key(&self, identity: &str) -> String {
        format!("rl:{}:{}", self.policy.name, identity)
    }

    /// Counts one request against `identity` and decides whether it may
    /// proceed. Only a fail-closed scope with an unreachable store errors.
    pub async fn admit(&self, identity: &str) -> CoreResult<Admission> {
        let now = self.clock.now();
        let key = self.storage_key(identity);
        let hit = tokio::time::timeout(self.timeout, self.store.hit(&key, self.policy.window, now))
            .await
            .map_err(|_| CounterError::Unavailable("counter store timed out".to_string()))
            .and_then(|r| r);

        let hit = match hit {
            Ok(hit) => hit,
            Err(e) => return self.on_store_failure(e),
        };

        let reset_after = hit.reset_at.duration_since(now).unwrap_or(Duration::ZERO);
        if hit.count > self.policy.max {
            tracing::warn!(
                scope = self.policy.name,
                identity,
                count = hit.count,
                "Rate limit exceeded"
            );
            return Ok(Admission::Denied {
                limit: self.policy.max,
                retry_after: reset_after.max(Duration::from_secs(1)),
            });
        }

        Ok(Admission::Allowed {
            limit: self.policy.max,
            remaining: self.policy.max - hit.count,
            reset_after,
        })
    }

    /// Refunds a request for scopes that skip successful attempts.
    pub async fn release(&self, identity: &str) {
        if !self.policy.skip_successful {
            return;
        }
        let key = self.storage_key(identity);
        let now = self.clock.now();
        match tokio::time::timeout(self.timeout, self.store.release(&key, now)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(scope = self.policy.name, "Refund failed: {e}"),
            Err(_) => tracing::warn!(scope = self.policy.name, "Refund timed out"),
        }
    }

    /// The error a denied request surfaces as.
    pub fn denial(&self, retry_after: Duration) -> CoreError {
        CoreError::RateLimited {
            retry_after,
            message: self.policy.message.to_string(),
        }
    }

    fn on_store_failure(&self, err: CounterError) -> CoreResult<Admission> {
        match self.policy.fail_mode {
            FailMode::Open => {
                tracing::warn!(scope = self.policy.name, "Admitting without limit: {err}");
                Ok(Admission::Allowed {
                    limit: self.policy.max,
                    remaining: self.policy.max,
                    reset_after: self.policy.window,
                })
            }
            FailMode::Closed => {
                tracing::error!(scope = self.policy.name, "Refusing request: {err}");
                Err(CoreError::Dependency(err.to_string()))
            }
        }
    }
}
