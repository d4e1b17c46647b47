//! Moderation error types

use thiserror::Error;

/// Moderation error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ModerationError {
    pub kind: ModerationErrorKind,
    pub message: String,
}

impl ModerationError {
    pub fn new(kind: ModerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ModerationErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ModerationErrorKind::RateLimit, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ModerationErrorKind::Auth, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ModerationErrorKind::Invalid, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ModerationErrorKind::Unknown, message)
    }

    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!("Authentication failed: {body}")),
            429 => Self::rate_limit(format!("Rate limited: {body}")),
            400 | 422 => Self::invalid(format!("Invalid request: {body}")),
            // Hugging Face answers 503 while a model is loading
            500..=599 => Self::network(format!("Server error {status}: {body}")),
            _ => Self::unknown(format!("HTTP {status}: {body}")),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationErrorKind {
    /// Network issues, timeouts, upstream 5xx
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Bad or missing token (401, 403)
    Auth,
    /// Rejected input or unreadable response
    Invalid,
    Unknown,
}

impl ModerationErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ModerationError::from_status(401, "").kind, ModerationErrorKind::Auth);
        assert_eq!(
            ModerationError::from_status(429, "").kind,
            ModerationErrorKind::RateLimit
        );
        assert_eq!(
            ModerationError::from_status(503, "loading").kind,
            ModerationErrorKind::Network
        );
        assert_eq!(
            ModerationError::from_status(418, "").kind,
            ModerationErrorKind::Unknown
        );
        assert!(ModerationErrorKind::Network.is_retryable());
        assert!(!ModerationErrorKind::Auth.is_retryable());
    }
}
