//! Error types for web-bridge
//!
//! The adapters never fail at their public interface. These errors only show up
//! as warnings for callers that ask for them.

use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A query-string segment that could not be decoded and was dropped
    #[error("malformed query fragment {fragment:?}: {reason}")]
    MalformedQuery { fragment: String, reason: String },
}

impl BridgeError {
    /// Create a malformed query error
    pub fn malformed_query(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedQuery {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
