//! Error types for the btmux stack.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire btmux stack.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait. Admission rejections and
/// benign races are modeled as return values elsewhere, not as errors; the
/// variants here are the cases callers genuinely need to branch on.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum BtmuxError {
    /// Admission denied: the store is at capacity and no eviction is
    /// possible. Not fatal; the caller may retry or disconnect manually.
    #[error("Capacity exceeded: {active} active sessions (max {max})")]
    CapacityExceeded { active: usize, max: usize },

    /// A user-initiated operation referenced a device with no active session.
    #[error("Session not found: '{address}'")]
    SessionNotFound { address: String },

    /// The learned scoring backend could not produce scores. Non-fatal;
    /// the caller falls back to the rule-based scorer.
    #[error("Scoring backend unavailable: {0}")]
    ScoringBackendUnavailable(String),

    /// The store observed a state that violates its own invariants
    /// (e.g. active count above the maximum). Indicates a concurrency bug;
    /// the store stops accepting admissions and must be restarted.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// IO error (config file access).
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BtmuxError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a CapacityExceeded error.
    pub fn capacity_exceeded(active: usize, max: usize) -> Self {
        Self::CapacityExceeded { active, max }
    }

    /// Creates a SessionNotFound error.
    pub fn session_not_found(address: impl Into<String>) -> Self {
        Self::SessionNotFound {
            address: address.into(),
        }
    }

    /// Creates a ScoringBackendUnavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::ScoringBackendUnavailable(message.into())
    }

    /// Creates an InvariantViolation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a CapacityExceeded error.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Check if this is a SessionNotFound error.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound { .. })
    }

    /// Check if this error is recoverable by falling back or retrying.
    ///
    /// InvariantViolation is the only unrecoverable case; everything else
    /// is an expected operational outcome.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for BtmuxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for BtmuxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for BtmuxError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for BtmuxError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, BtmuxError>`.
pub type Result<T> = std::result::Result<T, BtmuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(BtmuxError::capacity_exceeded(7, 7).is_capacity_exceeded());
        assert!(BtmuxError::session_not_found("aa:bb").is_session_not_found());
        assert!(BtmuxError::backend_unavailable("model not loaded").is_recoverable());
        assert!(!BtmuxError::invariant("8 active sessions").is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BtmuxError = io_err.into();
        assert!(matches!(err, BtmuxError::Io { .. }));
    }
}
