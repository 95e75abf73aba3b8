use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use inkpost_core::CoreError;
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    BadRequest(String),
    PayloadTooLarge,
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

fn status_of(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_)
        | CoreError::AlreadyTaken
        | CoreError::InvalidCredentials
        | CoreError::InvalidCode => StatusCode::BAD_REQUEST,
        CoreError::MissingToken | CoreError::InvalidToken => StatusCode::UNAUTHORIZED,
        CoreError::Banned | CoreError::NotVerified => StatusCode::FORBIDDEN,
        CoreError::NotFound => StatusCode::NOT_FOUND,
        CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Delivery(_) | CoreError::Dependency(_) | CoreError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn plain(status: StatusCode, message: String) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        message,
    };
    (status, axum::Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(message) => return plain(StatusCode::BAD_REQUEST, message),
            AppError::PayloadTooLarge => {
                return plain(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large".to_string(),
                )
            }
            AppError::Core(err) => err,
        };

        let status = status_of(&err);
        if err.is_server_fault() {
            // Log the real error server-side, return generic message to client
            tracing::error!("Request failed: {err}");
        }

        let body = ErrorBody {
            status: status.as_u16(),
            message: err.public_message(),
        };
        let mut response = (status, axum::Json(body)).into_response();

        if let CoreError::RateLimited { retry_after, .. } = &err {
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        AppError::Core(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {rejection}");
        AppError::BadRequest("Invalid request body".to_string())
    }
}
