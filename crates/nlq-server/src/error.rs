//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nlq_core::{ConnectionError, GenerationError, InputFormatError, SessionError, TranslationError};
use serde::Serialize;

pub type ApiResult<T> = Result<T, ApiError>;

/// API error with HTTP status code
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,

    pub message: String,

    /// Machine-readable error code for client handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,

    /// Structured context, e.g. the last repair feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Connection state reported by `/api/connect` failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            details: None,
            connected: None,
        }
    }

    pub fn with_code(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            code: Some(code),
            ..Self::new(status, message)
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark the error as leaving the caller disconnected
    pub fn not_connected(mut self) -> Self {
        self.connected = Some(false);
        self
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_ERROR")
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] [{}] {}", self.status, code, self.message),
            None => write!(f, "[{}] {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "Request rejected");
        }

        let mut body = serde_json::json!({
            "success": false,
            "error": self.message,
            "code": self.code,
            "details": self.details,
        });
        if let Some(connected) = self.connected {
            body["connected"] = connected.into();
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<InputFormatError> for ApiError {
    fn from(err: InputFormatError) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, err.to_string(), "INVALID_QUERY")
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        let (status, code) = match &err {
            GenerationError::Auth(_) => (StatusCode::BAD_GATEWAY, "GENERATOR_AUTH"),
            GenerationError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "GENERATOR_RATE_LIMITED"),
            GenerationError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "GENERATOR_TIMEOUT"),
            GenerationError::Network(_) | GenerationError::Provider(_) => (StatusCode::BAD_GATEWAY, "GENERATOR_ERROR"),
        };
        Self::with_code(status, err.to_string(), code)
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        let (status, code) = match &err {
            ConnectionError::InvalidCredentials(_) | ConnectionError::Mapping(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_CONNECTION")
            }
            ConnectionError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "CLUSTER_UNAUTHORIZED"),
            ConnectionError::IndexNotFound(_) => (StatusCode::NOT_FOUND, "INDEX_NOT_FOUND"),
            ConnectionError::Unreachable(_) => (StatusCode::BAD_GATEWAY, "CLUSTER_UNREACHABLE"),
        };
        Self::with_code(status, err.to_string(), code)
    }
}

impl From<TranslationError> for ApiError {
    fn from(err: TranslationError) -> Self {
        match err {
            TranslationError::Generation(e) => e.into(),
            TranslationError::InputFormat(e) => e.into(),
            TranslationError::Exhausted(e) => SessionError::Repair(e).into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotConnected => {
                Self::with_code(StatusCode::BAD_REQUEST, "Not connected to Elasticsearch", "NOT_CONNECTED")
            }
            SessionError::Connection(e) => e.into(),
            SessionError::Execution(e) => Self::with_code(StatusCode::BAD_REQUEST, e.to_string(), "EXECUTION_ERROR"),
            SessionError::Translation(e) => e.into(),
            SessionError::Repair(e) => {
                let details = serde_json::to_value(&e.last_feedback).unwrap_or_default();
                Self::with_code(StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), "REPAIR_EXHAUSTED").with_details(details)
            }
            SessionError::Schema(e) => Self::with_code(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_MAPPING"),
            SessionError::Input(e) => e.into(),
        }
    }
}
