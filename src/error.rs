//! Error types for fast-ts-runtime
//!
//! Provides structured error handling across the server lifecycle.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The listener could not be bound (malformed or in-use address)
    #[error("Bind error: {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected failure while accepting or serving connections
    #[error("Serve error: {message}")]
    Serve {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// In-flight requests did not drain before the deadline
    #[error("Shutdown timed out after {timeout:?}; remaining connections were closed")]
    ShutdownTimeout { timeout: Duration },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Create a bind error
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    /// Create a serve error with source
    pub fn serve_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Serve {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a shutdown timeout error
    pub fn shutdown_timeout(timeout: Duration) -> Self {
        Self::ShutdownTimeout { timeout }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the process should exit non-zero on this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ShutdownTimeout { .. })
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error response produced by the dispatcher itself (not by user handlers)
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(413, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "ok": false,
            "error": {
                "code": self.status,
                "message": self.message
            }
        });

        if let Some(details) = &self.details {
            obj["error"]["details"] = details.clone();
        }

        obj
    }
}
