//! Error Handling Infrastructure
//!
//! Typed errors raised by the catalog, validator and executor. They stay typed inside
//! the crate so callers (and tests) can match on the failure kind; the tool facade is
//! the only place that flattens them into text (see [`crate::tools::ToolError`]).
//!
//! # Error Categories
//! - `Catalog`: schema metadata could not be read
//! - `Execution`: the engine failed to run a query
//! - `Forbidden`: a query tripped the read-only lexical screen at execution time
//! - `ConnectionFailed`: a pooled connection could not be opened or acquired
//! - `InvalidInput`: malformed input or missing required parameters
//! - `Config`: configuration file or connection string problems

use thiserror::Error;

/// Main error type for text2sql operations
#[derive(Error, Debug)]
pub enum Text2SqlError {
    /// Schema metadata query failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Engine failed while executing a query (message is the engine's, verbatim)
    #[error("Query execution failed: {0}")]
    Execution(String),

    /// Query rejected by the read-only screen before reaching the engine
    #[error("Query execution failed: forbidden operation: {0}")]
    Forbidden(String),

    /// Database connection failed or no pooled connection became available
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, bad connection string)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Text2SqlError {
    /// Stable error code for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Forbidden(_) => "FORBIDDEN_OPERATION",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Human-readable message (never contains credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// The underlying cause without the category prefix
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Catalog(msg)
            | Self::Execution(msg)
            | Self::Forbidden(msg)
            | Self::ConnectionFailed(msg)
            | Self::InvalidInput(msg)
            | Self::Config(msg) => msg,
        }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Re-tag a connection failure raised while serving a catalog request.
    ///
    /// Metadata calls report every failure as `Catalog` so callers see one kind per
    /// component; other variants pass through untouched.
    #[must_use]
    pub fn into_catalog(self) -> Self {
        match self {
            Self::ConnectionFailed(msg) => Self::Catalog(format!("connection failed: {msg}")),
            other => other,
        }
    }

    /// Same as [`Self::into_catalog`] for the executor.
    #[must_use]
    pub fn into_execution(self) -> Self {
        match self {
            Self::ConnectionFailed(msg) => Self::Execution(format!("connection failed: {msg}")),
            other => other,
        }
    }
}

/// Result type alias for text2sql operations
pub type Result<T> = std::result::Result<T, Text2SqlError>;
