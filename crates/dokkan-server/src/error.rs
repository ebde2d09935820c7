use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use dokkan_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::ConfigError(_) => StatusCode::NOT_FOUND,
            AppError::SourcesExhausted { .. }
            | AppError::SourceError { .. }
            | AppError::HttpError(_)
            | AppError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CacheError(_)
            | AppError::SerializationError(_)
            | AppError::FieldTransform { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_error_kinds_to_status() {
        let cases = [
            (AppError::ConfigError("x".into()), StatusCode::NOT_FOUND),
            (
                AppError::SourcesExhausted {
                    data_type: "cards".into(),
                    last_error: None,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (AppError::CacheError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Timeout(30), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }
}
