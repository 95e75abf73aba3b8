//! HTTP surface for the Inkpost account API.

pub mod api;
pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod state;

use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::rate_limit::{rate_limit, ScopeGuard};
use crate::middleware::security_headers::{security_headers, HeaderPolicy};
use crate::state::AppState;

/// Largest request body accepted on any route.
pub const BODY_LIMIT: usize = 1024 * 1024;

/// Builds the full application router.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let global = ScopeGuard::new(&state, "global")?;
    let headers = HeaderPolicy {
        hsts: state.config.tls_enabled(),
    };

    let api = Router::new()
        .nest("/auth", api::auth_router(&state)?)
        .merge(api::users_router(&state)?);

    Ok(Router::new()
        .nest("/api", api)
        .layer(from_fn_with_state(global, rate_limit))
        .layer(from_fn_with_state(headers, security_headers))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
