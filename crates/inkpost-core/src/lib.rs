//! Inkpost core library: account credentials and request admission.
//!
//! `inkpost-core` holds everything the HTTP layer needs to register,
//! verify and authenticate accounts, independent of any web framework.
//!
//! # Modules
//!
//! - [`service`]: Account lifecycle flows (register, verify, login, reset).
//! - [`gate`]: Bearer-token gating for protected routes.
//! - [`token`]: Signed, time-limited session tokens.
//! - [`ratelimit`]: Fixed-window admission with in-memory and Redis counters.
//! - [`store`]: Persistence interface for accounts, plus an in-memory store.
//! - [`mail`]: Notifier capability and the messages the flows send.
//! - [`validation`]: Input normalization and password strength rules.
//! - [`error`]: Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod account;
pub mod clock;
pub mod code;
pub mod error;
pub mod gate;
pub mod mail;
pub mod password;
pub mod ratelimit;
pub mod service;
pub mod store;
pub mod token;
pub mod validation;

pub use account::{Account, AccountId, AccountSummary, CodeKind, PublicProfile, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use gate::{Identity, SessionGate};
pub use mail::{Notifier, NotifyError};
pub use password::{HashCost, PasswordHasher};
pub use ratelimit::{
    Admission, CounterStore, FailMode, InMemoryCounterStore, KeyPolicy, KeySource, RateLimiter,
    RedisCounterStore, ScopePolicy,
};
pub use service::{AuthService, AuthSettings, LoginOutcome};
pub use store::{CredentialStore, InMemoryCredentialStore, StoreError};
pub use token::{Claims, TokenIssuer};
