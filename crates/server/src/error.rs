use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::error::{ReferralError, ValidationErrors};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Referral(#[from] ReferralError),
    #[error("missing or malformed X-User-Id header")]
    MissingUser,
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Referral(ReferralError::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Referral(ReferralError::Validation(errors)) => {
                let body = ApiResponse::<(), ValidationErrors>::error_with_data(
                    "One or more validation errors occurred",
                    errors.clone(),
                );
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Referral(ReferralError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, msg.clone())
            }
            ApiError::Referral(ReferralError::InvalidOperation(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Referral(ReferralError::Unauthorized) => {
                (StatusCode::FORBIDDEN, "Not authorized".to_string())
            }
            ApiError::MissingUser => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Referral(e) => {
                error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}
