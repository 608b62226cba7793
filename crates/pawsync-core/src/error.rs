//! Error taxonomy shared by every component of the sync layer.
//!
//! `SyncError` is `Clone` because a single in-flight fetch result is handed
//! to every caller attached to it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No response was received (connection failure, timeout, DNS, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with `success = false`.
    #[error("Remote error: {message}")]
    Remote {
        message: String,
        code: Option<String>,
    },

    /// Input rejected before any network call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A rollback snapshot could not be applied because the entry was
    /// evicted while the mutation was pending.
    #[error("Conflict: cached data changed while the request was pending")]
    Conflict,
}

impl SyncError {
    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            code: None,
        }
    }

    pub fn remote_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Whether the query executor may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Remote { .. })
    }

    /// Conflicts are reported to callers the same way remote failures are.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote { .. } | SyncError::Conflict)
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            SyncError::Network(_) => Some("network"),
            SyncError::Remote { code, .. } => code.as_deref(),
            SyncError::Validation(_) => Some("validation"),
            SyncError::Conflict => Some("conflict"),
        }
    }

    /// Message suitable for a transient notification.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            SyncError::Remote { message, .. } if !message.trim().is_empty() => message.clone(),
            SyncError::Remote { .. } | SyncError::Conflict => {
                "Something went wrong. Please refresh and try again.".to_string()
            }
            SyncError::Validation(message) => message.clone(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::remote_with_code(format!("Unexpected response shape: {}", err), "decode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Network("timeout".into()).is_retryable());
        assert!(SyncError::remote("boom").is_retryable());
        assert!(!SyncError::Validation("bad".into()).is_retryable());
        assert!(!SyncError::Conflict.is_retryable());
    }

    #[test]
    fn test_conflict_is_reported_as_remote() {
        assert!(SyncError::Conflict.is_remote());
        assert_eq!(
            SyncError::Conflict.user_message(),
            "Something went wrong. Please refresh and try again."
        );
    }

    #[test]
    fn test_user_message_prefers_remote_text() {
        let err = SyncError::remote_with_code("Budget limit exceeded", "BUDGET_LIMIT");
        assert_eq!(err.user_message(), "Budget limit exceeded");
        assert_eq!(err.code(), Some("BUDGET_LIMIT"));
        assert!(SyncError::remote("  ").user_message().starts_with("Something went wrong"));
    }

    #[test]
    fn test_network_message_hides_transport_details() {
        let err = SyncError::Network("error sending request for url (http://10.0.0.1)".into());
        assert!(!err.user_message().contains("10.0.0.1"));
    }
}
