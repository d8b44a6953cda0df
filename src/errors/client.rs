//! Client-side error taxonomy.
//!
//! `PermissionDenied` and `Timeout` are split out from the generic `Network`
//! case only so callers can pick a different message. Nothing retries on them.

use std::time::Duration;

use reqwest::StatusCode;

/// Failure of a client core operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The backend rejected the caller's credentials or ownership.
    #[error("access denied: {0}")]
    PermissionDenied(String),
    /// The request did not finish before its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Any other transport or server failure.
    #[error("request failed: {0}")]
    Network(String),
    /// A required local field is missing; no request was sent.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Plant analysis failed. Reported as a warning, never fatal.
    #[error("analysis unavailable: {0}")]
    AnalysisUnavailable(String),
    /// The request scope was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Map a non-success HTTP status and envelope message to the taxonomy.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::PermissionDenied(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Validation(message),
            _ => Self::Network(format!("{}: {}", status, message)),
        }
    }

    /// Whether the failure should be shown as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AnalysisUnavailable(_))
    }

    /// User-facing message for the error.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Access denied. Check that you are signed in.".to_string()
            }
            Self::Timeout(_) => "The network is slow. Please try again shortly.".to_string(),
            Self::Network(_) => "Loading failed. Please try again shortly.".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::AnalysisUnavailable(_) => {
                "Plant analysis failed. The post was saved without a plant name.".to_string()
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(Duration::ZERO);
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        tracing::debug!("HTTP transport error: {:?}", err);
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ClientError::from_status(StatusCode::UNAUTHORIZED, "no token"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::FORBIDDEN, "not yours"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_REQUEST, "title required"),
            ClientError::Validation(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ClientError::Network(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::SERVICE_UNAVAILABLE, "down"),
            ClientError::Network(_)
        ));
    }

    #[test]
    fn test_user_messages_distinguish_timeout_and_permission() {
        let timeout = ClientError::Timeout(Duration::from_secs(5)).user_message();
        let denied = ClientError::PermissionDenied("x".into()).user_message();
        let generic = ClientError::Network("x".into()).user_message();
        assert_ne!(timeout, denied);
        assert_ne!(timeout, generic);
        assert_ne!(denied, generic);
    }

    #[test]
    fn test_validation_message_is_passed_through() {
        let err = ClientError::Validation("Title and image are required.".into());
        assert_eq!(err.user_message(), "Title and image are required.");
        assert!(!err.is_warning());
        assert!(ClientError::AnalysisUnavailable("503".into()).is_warning());
    }
}
