use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use lunchbox_types::api::ErrorResponse;
use lunchbox_types::error::RoundError;

/// `RoundError` on its way out of an HTTP handler.
#[derive(Debug)]
pub struct ApiError(pub RoundError);

impl From<RoundError> for ApiError {
    fn from(err: RoundError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RoundError::NotFound(_) => StatusCode::NOT_FOUND,
            RoundError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RoundError::Conflict { .. } => StatusCode::CONFLICT,
            RoundError::Validation(_) => StatusCode::BAD_REQUEST,
            RoundError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RoundError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = match &self.0 {
            RoundError::Internal { correlation_id } => Some(correlation_id.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
            reason: self.0.conflict_kind(),
            correlation_id,
        };
        (self.status(), Json(body)).into_response()
    }
}
