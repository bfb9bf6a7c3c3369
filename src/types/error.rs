//! Error types for the sync cache
//!
//! Data-shape problems in inbound events never surface as errors from the
//! router; they are reported to an [`crate::router::ErrorSink`] and dropped.
//! The variants here cover contract violations by collaborators, bad
//! configuration, and decoding failures at the edges.

/// Main error type for sync cache operations
#[derive(Debug, thiserror::Error)]
pub enum SyncCacheError {
    /// A collaborator called a store operation with an unusable identity.
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncCacheError {
    /// Whether this error describes bad inbound data (drop and continue)
    /// rather than a bug in the calling code.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::MalformedEvent(_) | Self::Serialization(_))
    }
}

impl From<serde_json::Error> for SyncCacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for SyncCacheError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML error: {}", err))
    }
}

/// Result type alias for sync cache operations
pub type Result<T> = std::result::Result<T, SyncCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_classification() {
        assert!(SyncCacheError::MalformedEvent("no id".into()).is_data_error());
        assert!(!SyncCacheError::Contract("empty type".into()).is_data_error());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: SyncCacheError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SyncCacheError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error: JSON error"));
    }
}
