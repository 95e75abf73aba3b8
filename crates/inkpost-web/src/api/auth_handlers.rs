use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use inkpost_core::AccountSummary;

use crate::auth::middleware::AuthUser;
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

const RESET_SENT: &str = "The reset code has been sent to your email address.";

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let Json(body) = payload?;
    let user_id = state
        .auth
        .register(&body.username, &body.email, &body.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Account created. Check your email for the verification code.".to_string(),
            user_id,
        }),
    ))
}

pub async fn verify_email(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = payload?;
    state.auth.verify_email(&body.email, &body.code).await?;
    Ok(Json(MessageResponse::new("Account verified! You can log in!")))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = payload?;
    let outcome = state.auth.login(&body.username, &body.password).await?;
    Ok(Json(LoginResponse {
        token: outcome.token,
        expires_at: outcome.expires_at,
        account_id: outcome.account_id,
        role: outcome.role,
    }))
}

/// Answers the same way whether or not the address is registered.
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = payload?;
    state.auth.forgot_password(&body.email).await?;
    Ok(Json(MessageResponse::new(RESET_SENT)))
}

pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(body) = payload?;
    state
        .auth
        .reset_password(&body.email, &body.code, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new(
        "Your password has been changed successfully! You can log in.",
    )))
}

pub async fn me(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AccountSummary>, AppError> {
    let summary = state.auth.me(&user.account_id).await?;
    Ok(Json(summary))
}
