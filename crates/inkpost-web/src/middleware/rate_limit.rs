//! Per-scope request admission.
//!
//! Each limited route group gets a [`ScopeGuard`] layered with
//! `axum::middleware::from_fn_with_state`. The guard derives the request
//! key from the client address, the submitted credential or the
//! authenticated account, depending on the scope's policy.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use inkpost_core::{Admission, KeySource, RateLimiter};

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::BODY_LIMIT;

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Clone)]
pub struct ScopeGuard {
    limiter: Arc<RateLimiter>,
    ipv6_prefix: u8,
    trust_proxy: bool,
}

impl ScopeGuard {
    pub fn new(state: &AppState, scope: &str) -> anyhow::Result<Self> {
        Ok(Self {
            limiter: state.limiter(scope)?,
            ipv6_prefix: state.config.rate_limit.ipv6_prefix,
            trust_proxy: state.config.rate_limit.trust_proxy,
        })
    }
}

pub async fn rate_limit(
    State(guard): State<ScopeGuard>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let policy = guard.limiter.policy();
    let ip = client_ip(&req, guard.trust_proxy);
    let account_id = req
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.account_id.clone());

    let (req, field) = match policy.key.body_field() {
        Some(name) => match with_body_field(req, name).await {
            Ok(split) => split,
            Err(response) => return response,
        },
        None => (req, None),
    };

    let identity = policy.key.derive(
        KeySource {
            ip,
            field: field.as_deref(),
            account_id: account_id.as_deref(),
        },
        guard.ipv6_prefix,
    );

    let admission = match guard.limiter.admit(&identity).await {
        Ok(admission) => admission,
        Err(e) => return AppError::from(e).into_response(),
    };

    match admission {
        Admission::Denied { limit, retry_after } => {
            let mut response = AppError::from(guard.limiter.denial(retry_after)).into_response();
            set_window_headers(response.headers_mut(), limit, 0, retry_after);
            response
        }
        Admission::Allowed {
            limit,
            remaining,
            reset_after,
        } => {
            let mut response = next.run(req).await;
            if response.status().is_success() {
                guard.limiter.release(&identity).await;
            }
            set_window_headers(response.headers_mut(), limit, remaining, reset_after);
            response
        }
    }
}

/// The innermost scope's headers win; outer scopes leave them alone.
fn set_window_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: Duration) {
    let reset_secs = reset.as_millis().div_ceil(1000);
    for (name, value) in [
        (RATELIMIT_LIMIT, u128::from(limit)),
        (RATELIMIT_REMAINING, u128::from(remaining)),
        (RATELIMIT_RESET, reset_secs),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.entry(name).or_insert(value);
        }
    }
}

fn client_ip(req: &Request<Body>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Buffers the body to read one string field, then puts it back.
async fn with_body_field(
    req: Request<Body>,
    field: &str,
) -> Result<(Request<Body>, Option<String>), Response> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|_| AppError::PayloadTooLarge.into_response())?;

    let value = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|json| json.get(field).and_then(|v| v.as_str()).map(str::to_string));

    Ok((Request::from_parts(parts, Body::from(bytes)), value))
}
