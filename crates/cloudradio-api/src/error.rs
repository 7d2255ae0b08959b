use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::controllable::ControlError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no {0} allow-list configured")]
    NotConfigured(&'static str),

    #[error("'{0}' is not in the allow-list")]
    NotAllowed(String),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("invalid JSON body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotConfigured(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotAllowed(_) | ApiError::NotAnObject | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Control(ControlError::CallFailed { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Control(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
