//! Error types for oaichat
//!
//! This module defines the error taxonomy used throughout the application,
//! using `thiserror` for the typed variants and `anyhow` for propagation.

use thiserror::Error;

/// Main error type for oaichat operations
///
/// Functions return [`Result`], an `anyhow` alias; callers that need to
/// branch on the failure kind use `err.downcast_ref::<OaichatError>()`.
#[derive(Error, Debug)]
pub enum OaichatError {
    /// Missing or invalid profile / configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failure, timeout, or malformed response from the provider
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status returned by the provider
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Provider error message or raw body
        message: String,
    },

    /// Unknown conversation or profile
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("Conversation", "Profile")
        kind: &'static str,
        /// The identifier that did not match
        id: String,
    },

    /// An id prefix matched more than one conversation
    #[error("Ambiguous id '{prefix}' matches {} conversations: {}", matches.len(), matches.join(", "))]
    AmbiguousId {
        /// The prefix supplied by the user
        prefix: String,
        /// Every full id the prefix matched
        matches: Vec<String>,
    },

    /// Appending a message would break the role order of a conversation
    #[error("Invalid message sequence: {0}")]
    InvalidSequence(String),

    /// Export format not recognised
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Operation not allowed in the current chat session state
    #[error("Session error: {0}")]
    SessionState(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OaichatError {
    /// Shorthand for a missing conversation
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Conversation",
            id: id.into(),
        }
    }

    /// Shorthand for a missing profile
    pub fn profile_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Profile",
            id: name.into(),
        }
    }

    /// True for failures talking to the provider (transport or HTTP status)
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. })
    }
}

/// Result type alias for oaichat operations
///
/// Uses `anyhow::Error` so context can be attached while the typed
/// [`OaichatError`] stays recoverable through downcasting.
pub type Result<T> = anyhow::Result<T>;

/// Return the typed error behind an `anyhow::Error`, if there is one
pub fn kind_of(err: &anyhow::Error) -> Option<&OaichatError> {
    err.downcast_ref::<OaichatError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = OaichatError::Config("no default profile".to_string());
        assert_eq!(error.to_string(), "Configuration error: no default profile");
    }

    #[test]
    fn test_http_error_display() {
        let error = OaichatError::Http {
            status: 401,
            message: "invalid api key".to_string(),
        };
        assert_eq!(error.to_string(), "HTTP error 401: invalid api key");
    }

    #[test]
    fn test_not_found_display() {
        let error = OaichatError::conversation_not_found("abc123");
        assert_eq!(error.to_string(), "Conversation not found: abc123");

        let error = OaichatError::profile_not_found("local");
        assert_eq!(error.to_string(), "Profile not found: local");
    }

    #[test]
    fn test_ambiguous_id_display_lists_matches() {
        let error = OaichatError::AmbiguousId {
            prefix: "ab".to_string(),
            matches: vec!["abc".to_string(), "abd".to_string()],
        };
        let s = error.to_string();
        assert!(s.contains("'ab'"));
        assert!(s.contains("2 conversations"));
        assert!(s.contains("abc, abd"));
    }

    #[test]
    fn test_is_network_groups_transport_and_http() {
        assert!(OaichatError::Network("timeout".into()).is_network());
        assert!(OaichatError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_network());
        assert!(!OaichatError::Storage("disk full".into()).is_network());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OaichatError = io_error.into();
        assert!(matches!(error, OaichatError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: OaichatError = json_error.into();
        assert!(matches!(error, OaichatError::Serialization(_)));
    }

    #[test]
    fn test_kind_of_recovers_typed_error() {
        let err: anyhow::Error = OaichatError::InvalidSequence("x".into()).into();
        assert!(matches!(
            kind_of(&err),
            Some(OaichatError::InvalidSequence(_))
        ));

        let plain = anyhow::anyhow!("untyped");
        assert!(kind_of(&plain).is_none());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OaichatError>();
    }
}
