use thiserror::Error;

use crate::error::SyncError;

/// Classification of HTTP-level failures before they are folded into the
/// sync error taxonomy.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            // Timeouts and connection failures mean no response was received
            ApiError::NetworkError(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                SyncError::Network(e.to_string())
            }
            ApiError::NetworkError(e) if e.is_decode() => {
                SyncError::remote_with_code(format!("Unexpected response: {}", e), "decode")
            }
            ApiError::NetworkError(e) => SyncError::Network(e.to_string()),
            ApiError::Unauthorized => {
                SyncError::remote_with_code("Your session has expired. Please sign in again.", "unauthorized")
            }
            ApiError::AccessDenied(_) => {
                SyncError::remote_with_code("You do not have access to this item.", "forbidden")
            }
            ApiError::NotFound(_) => {
                SyncError::remote_with_code("This item no longer exists.", "not_found")
            }
            ApiError::RateLimited => SyncError::remote_with_code(
                "Too many requests. Please wait a moment and try again.",
                "rate_limited",
            ),
            ApiError::ServerError(_) => SyncError::remote_with_code(
                "The server had a problem. Please try again later.",
                "server_error",
            ),
            ApiError::InvalidResponse(_) => {
                SyncError::remote_with_code("The server sent an unexpected response.", "invalid_response")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, "x"), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "down"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(400);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(text) => {
                assert!(text.contains("truncated, 800 total bytes"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_errors_become_display_safe_remote_errors() {
        let err: SyncError = ApiError::ServerError("stack trace here".into()).into();
        assert_eq!(err.code(), Some("server_error"));
        assert!(!err.user_message().contains("stack trace"));
    }
}
