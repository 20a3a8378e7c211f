//! Error Handling Infrastructure
//!
//! This module defines the error types used throughout sqlsentry.
//! All errors are structured and map to stable error codes.
//!
//! Guard rejections are not errors: the guard always returns a
//! [`Verdict`](crate::guard::Verdict), and rejection-class outcomes travel as
//! [`PipelineOutcome`](crate::pipeline::PipelineOutcome) values.
//!
//! # Error Categories
//! - `InvalidInput`: Empty question or malformed request
//! - `GenerationFailed`: Text-generation backend transport or model failure
//! - `ExecutionFailed`: Database-level failure while introspecting or executing
//! - `ConnectionFailed`: Database could not be opened
//! - `Timeout`: A collaborator call exceeded its time budget
//! - `ConfigError`: Configuration file errors

use thiserror::Error;

/// Main error type for sqlsentry operations
#[derive(Error, Debug)]
pub enum SentryError {
    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Text-generation backend failed
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Query execution or schema introspection failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Collaborator call exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SentryError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Full diagnostic message.
    ///
    /// May contain database or backend details. Log it; never hand it to a
    /// pipeline caller.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for sqlsentry operations
pub type Result<T> = std::result::Result<T, SentryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SentryError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(SentryError::generation_failed("test").error_code(), "GENERATION_FAILED");
        assert_eq!(SentryError::execution_failed("test").error_code(), "EXECUTION_FAILED");
        assert_eq!(SentryError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(SentryError::timeout("test").error_code(), "TIMEOUT");
        assert_eq!(SentryError::config_error("test").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_messages() {
        let err = SentryError::execution_failed("no such table: Orders");
        assert!(err.message().contains("no such table: Orders"));

        let err = SentryError::timeout("generation exceeded 100ms");
        assert!(err.message().starts_with("Timed out"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(SentryError::invalid_input("x"), SentryError::InvalidInput(_)));
        assert!(matches!(SentryError::generation_failed("x"), SentryError::GenerationFailed(_)));
        assert!(matches!(SentryError::execution_failed("x"), SentryError::ExecutionFailed(_)));
        assert!(matches!(SentryError::connection_failed("x"), SentryError::ConnectionFailed(_)));
        assert!(matches!(SentryError::timeout("x"), SentryError::Timeout(_)));
        assert!(matches!(SentryError::config_error("x"), SentryError::ConfigError(_)));
    }
}
