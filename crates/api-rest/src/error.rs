use api_shared::{AuthError, ErrorRes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use guardian_core::GuardianError;

/// An error rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GuardianError> for ApiError {
    fn from(e: GuardianError) -> Self {
        let status = match &e {
            GuardianError::PatientNotFound(_) | GuardianError::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GuardianError::SessionClosed { .. } | GuardianError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            GuardianError::InvalidInput(_) | GuardianError::Text(_) | GuardianError::Uuid(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {:?}", e);
            return Self::new(status, "Internal error");
        }
        Self::new(status, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorRes {
                error: self.message,
            }),
        )
            .into_response()
    }
}
