// src/error.rs

//! Unified error handling for the ingestion pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FetchErrorKind {
    /// Request exceeded the configured timeout
    Timeout,
    /// Connection dropped or refused mid-flight
    ConnectionReset,
    /// Server answered with a malformed or non-success protocol response
    ProtocolError,
    /// Server answered 404
    NotFound,
    /// Anything else (DNS, TLS, body decode)
    Other,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ConnectionReset => "connection reset",
            FetchErrorKind::ProtocolError => "protocol error",
            FetchErrorKind::NotFound => "not found",
            FetchErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Terminal fetch failure after all retry attempts were exhausted.
#[derive(Debug, Clone, Error)]
#[error("fetch failed for {link} after {attempts} attempt(s): {kind}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub link: String,
    pub attempts: u32,
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, FetchErrorKind::NotFound)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed outside the retry boundary
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Fetch failed after bounded retries
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Page content could not be turned into an article
    #[error("Extraction error for {link}: {reason}")]
    Extraction { link: String, reason: String },

    /// Concurrent ingestion raced on the same link or fingerprint
    #[error("Resolution conflict for {link}: {message}")]
    ResolutionConflict { link: String, message: String },

    /// Store integrity failure (not an expected uniqueness skip)
    #[error("Store error: {0}")]
    Store(String),

    /// Similarity index state is unusable and needs a rebuild
    #[error("Index error: {0}")]
    Index(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error with the offending link.
    pub fn extraction(link: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Extraction {
            link: link.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a resolution conflict error.
    pub fn conflict(link: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::ResolutionConflict {
            link: link.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create an index error.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error must halt the crawl instead of skipping the link.
    ///
    /// Per-link failures (fetch, extraction) are local; store and index
    /// failures threaten data integrity and are fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Index(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError {
            kind: FetchErrorKind::ConnectionReset,
            link: "https://example.com/a".to_string(),
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/a"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = FetchError {
            kind: FetchErrorKind::NotFound,
            link: "https://example.com/gone".to_string(),
            attempts: 1,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::store("constraint violated").is_fatal());
        assert!(AppError::index("corrupt vector").is_fatal());
        assert!(!AppError::extraction("https://example.com", "no body").is_fatal());
    }
}
