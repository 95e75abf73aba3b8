use std::collections::HashMap;
use std::sync::Arc;

use inkpost_core::{
    AuthService, AuthSettings, Clock, CounterStore, CredentialStore, Notifier, PasswordHasher,
    RateLimiter, SessionGate, TokenIssuer,
};

use crate::config::ServerConfig;

/// External collaborators the server is wired against.
pub struct Dependencies {
    pub store: Arc<dyn CredentialStore>,
    pub notifier: Arc<dyn Notifier>,
    pub counters: Arc<dyn CounterStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthService>,
    pub gate: SessionGate,
    limiters: Arc<HashMap<&'static str, Arc<RateLimiter>>>,
}

impl AppState {
    pub fn new(config: ServerConfig, deps: Dependencies) -> anyhow::Result<Self> {
        let tokens = TokenIssuer::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl(),
            deps.clock.clone(),
        );
        let hasher = PasswordHasher::new(config.auth.hash_cost())?;
        let settings = AuthSettings {
            product_name: config.mail.product_name.clone(),
            code_ttl: config.auth.code_ttl(),
            store_timeout: config.timeouts.store(),
            notify_timeout: config.timeouts.notifier(),
        };

        let gate = SessionGate::new(tokens.clone(), deps.store.clone(), config.timeouts.store());
        let auth = AuthService::new(
            deps.store,
            deps.notifier,
            tokens,
            hasher,
            deps.clock.clone(),
            settings,
        );

        let limiters = config
            .rate_limit
            .policies()
            .into_iter()
            .map(|policy| {
                let name = policy.name;
                let limiter = RateLimiter::new(
                    policy,
                    deps.counters.clone(),
                    deps.clock.clone(),
                    config.timeouts.counter(),
                );
                (name, Arc::new(limiter))
            })
            .collect();

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            gate,
            limiters: Arc::new(limiters),
        })
    }

    /// The limiter for a built-in scope name.
    pub fn limiter(&self, scope: &str) -> anyhow::Result<Arc<RateLimiter>> {
        self.limiters
            .get(scope)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no rate-limit scope named {scope}"))
    }
}
