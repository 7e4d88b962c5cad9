//! HTTP error responses for the sharing server.
//!
//! Every failure leaves the server as a JSON body of the form
//! `{"status":"error","message":...}`, the same envelope the upload route
//! uses for success.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Always `"error"`
    pub status: &'static str,
    /// Error code (e.g. "N008" for a missing file)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
    #[serde(skip)]
    http_status: StatusCode,
}

impl ApiError {
    /// Create an error answered with `status`.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            code: None,
            message: message.into(),
            http_status: status,
        }
    }

    /// Attach a stable error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.http_status
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create an internal server error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.http_status, Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match (&err, err.kind()) {
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::ShareExpired) => StatusCode::GONE,
            (Error::InvalidPath(_) | Error::InvalidInput(_) | Error::MalformedRequest(_), _) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay in the log, not in the response.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
            "internal server error".to_string()
        } else {
            err.to_string()
        };

        let api = Self::new(status, message);
        match err.code() {
            Some(code) => api.with_code(code),
            None => api,
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err).into()
    }
}

/// Result type for server handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ApiError::from(Error::FileNotFound("a.txt".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(Error::ShareExpired("x".into())).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            ApiError::from(Error::InvalidPath("../x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(Error::Internal("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = ApiError::from(Error::Storage("disk /secret/path full".into()));
        assert_eq!(err.message, "internal server error");
    }

    #[test]
    fn test_serialization() {
        let err = ApiError::from(Error::FileNotFound("a.txt".into()));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"code\":\"N008\""));
        assert!(json.contains("a.txt"));

        let json = serde_json::to_string(&ApiError::bad_request("bad")).unwrap();
        assert!(!json.contains("code"));
    }
}
