//! Error types for chime-notify

use std::time::Duration;
use thiserror::Error;

/// Result type alias using chime-notify Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while delivering a notification
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Webhook endpoint answered with a non-success status
    #[error("HTTP {status}")]
    Status { status: u16 },

    /// Webhook endpoint asked us to slow down
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Webhook URL is missing or not an accepted webhook endpoint
    #[error("Invalid webhook URL")]
    InvalidWebhookUrl,

    /// Sound playback failed
    #[error("Sound playback failed: {0}")]
    Sound(String),

    /// Settings could not be read
    #[error("Settings unavailable: {0}")]
    Settings(String),
}

impl Error {
    /// Check if this error is a rate-limit response
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status } => Some(*status),
            Error::RateLimited { .. } => Some(429),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_predicate() {
        let e = Error::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert!(e.is_rate_limited());
        assert!(!Error::Status { status: 500 }.is_rate_limited());
        assert!(!Error::InvalidWebhookUrl.is_rate_limited());
    }

    #[test]
    fn test_status_extraction() {
        assert_eq!(Error::Status { status: 404 }.status(), Some(404));
        assert_eq!(
            Error::RateLimited {
                retry_after: Duration::from_millis(1500)
            }
            .status(),
            Some(429)
        );
        assert_eq!(Error::Sound("no device".into()).status(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Status { status: 502 }.to_string(), "HTTP 502");
        assert_eq!(Error::InvalidWebhookUrl.to_string(), "Invalid webhook URL");
    }
}
