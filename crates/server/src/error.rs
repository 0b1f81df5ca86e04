use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use agenda_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// HTTP-facing failure: status code plus a `{ "message": ... }` body.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    pub fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn unauthorized(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::Unauthorized {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        self.0.user_message()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let InterfaceError::Internal { message, correlation_id } = &self.0 {
            error!(
                event_name = "http.request.internal_error",
                correlation_id = %correlation_id,
                error = %message,
                "request failed with an internal error"
            );
        }

        let body = ErrorBody { message: self.message().to_string() };
        (self.status(), Json(body)).into_response()
    }
}

pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}
