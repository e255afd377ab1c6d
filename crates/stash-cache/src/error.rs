//! Cache-related error types

use thiserror::Error;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// `resolve` was called without a producer.
    #[error("No producer was supplied")]
    MissingProducer,

    /// A producer handle was supplied but does not hold a callable producer
    /// for this cache's value type.
    #[error("Producer is not callable: expected {expected}")]
    InvalidProducer { expected: &'static str },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid duration for {field}: {message}")]
    InvalidDuration { field: &'static str, message: String },
}

impl CacheError {
    /// Build a storage error from any displayable backend failure
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: message.to_string(),
        }
    }

    /// Returns true for the two configuration errors raised before any
    /// storage access.
    pub fn is_producer_error(&self) -> bool {
        matches!(self, Self::MissingProducer | Self::InvalidProducer { .. })
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_errors_are_distinct() {
        let missing = CacheError::MissingProducer;
        let invalid = CacheError::InvalidProducer { expected: "fn" };

        assert!(missing.is_producer_error());
        assert!(invalid.is_producer_error());
        assert!(!matches!(missing, CacheError::InvalidProducer { .. }));
        assert_eq!(missing.to_string(), "No producer was supplied");
        assert_eq!(invalid.to_string(), "Producer is not callable: expected fn");
    }

    #[test]
    fn test_storage_error_message() {
        let err = CacheError::storage("disk full");
        assert_eq!(err.to_string(), "Storage error: disk full");
        assert!(!err.is_producer_error());
    }
}
