mod auth_handlers;
mod users;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::middleware::require_auth;
use crate::middleware::rate_limit::{rate_limit, ScopeGuard};
use crate::state::AppState;

fn limited(state: &AppState, scope: &str, router: Router<AppState>) -> anyhow::Result<Router<AppState>> {
    let guard = ScopeGuard::new(state, scope)?;
    Ok(router.route_layer(from_fn_with_state(guard, rate_limit)))
}

/// Credential lifecycle routes, mounted under `/api/auth`.
pub fn auth_router(state: &AppState) -> anyhow::Result<Router<AppState>> {
    let register = limited(
        state,
        "auth:ip",
        Router::new().route("/register", post(auth_handlers::register)),
    )?;

    let login = limited(
        state,
        "auth:username",
        Router::new().route("/login", post(auth_handlers::login)),
    )?;

    let by_email = limited(
        state,
        "auth:email",
        Router::new()
            .route("/verify-email", post(auth_handlers::verify_email))
            .route("/forgot-password", post(auth_handlers::forgot_password))
            .route("/reset-password", post(auth_handlers::reset_password)),
    )?;

    // Gate first so the read scope can key by account.
    let me = limited(
        state,
        "read:user",
        Router::new().route("/me", get(auth_handlers::me)),
    )?
    .route_layer(from_fn_with_state(state.clone(), require_auth));

    Ok(Router::new()
        .merge(register)
        .merge(login)
        .merge(by_email)
        .merge(me))
}

/// Public account reads, mounted under `/api`.
pub fn users_router(state: &AppState) -> anyhow::Result<Router<AppState>> {
    limited(
        state,
        "read",
        Router::new().route("/users/{id}", get(users::profile)),
    )
}
