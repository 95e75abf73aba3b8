use axum::extract::{Path, State};
use axum::Json;
use inkpost_core::PublicProfile;

use crate::error::AppError;
use crate::state::AppState;

pub async fn profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>, AppError> {
    let profile = state.auth.public_profile(&id).await?;
    Ok(Json(profile))
}
