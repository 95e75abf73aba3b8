use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use inkpost_core::{Identity, Role};

use crate::error::AppError;
use crate::state::AppState;

/// The authenticated caller of a protected route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub account_id: String,
    pub username: String,
    pub role: Role,
}

impl From<Identity> for AuthUser {
    fn from(identity: Identity) -> Self {
        Self {
            account_id: identity.account_id,
            username: identity.username,
            role: identity.role,
        }
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Rejects the request unless it carries a valid bearer token for a live,
/// unbanned account. Downstream layers and handlers find the caller as an
/// [`AuthUser`] request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let identity = match state.gate.authenticate(authorization(req.headers())).await {
        Ok(identity) => identity,
        Err(e) => return AppError::from(e).into_response(),
    };
    req.extensions_mut().insert(AuthUser::from(identity));
    next.run(req).await
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let identity = state.gate.authenticate(authorization(&parts.headers)).await?;
        let user = AuthUser::from(identity);
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
