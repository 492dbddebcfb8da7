use crate::services::HeartbeatError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ApiError {
    InvalidIdentity(String),
    InvalidArgument(String),
    AuthenticationFailure,
    NotFound(String),
    Internal(anyhow::Error),
}

/// Error body returned to devices.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidIdentity(_) => "invalid_identity",
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::AuthenticationFailure => "authentication_failure",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidIdentity(_) | ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::InvalidIdentity(msg) => write!(f, "Invalid identity: {msg}"),
            ApiError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            ApiError::AuthenticationFailure => f.write_str("Authentication failure"),
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            // details stay in the log
            ApiError::Internal(_) => f.write_str("An internal error occurred"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(err) => tracing::error!("{:?}", err),
            other => tracing::debug!("{}", other),
        }
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<HeartbeatError> for ApiError {
    fn from(err: HeartbeatError) -> Self {
        match err {
            HeartbeatError::InvalidIdentity { .. } => ApiError::InvalidIdentity(err.to_string()),
            HeartbeatError::InvalidArgument(_) => ApiError::InvalidArgument(err.to_string()),
            HeartbeatError::NotFound(_) => ApiError::NotFound(err.to_string()),
            HeartbeatError::AuthenticationFailure { .. } => ApiError::AuthenticationFailure,
            HeartbeatError::Internal(err) => ApiError::Internal(err.into()),
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}
