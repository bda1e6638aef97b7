//! JSON Output Envelope Types
//!
//! Structured output for the one-shot CLI commands. Every command prints exactly one
//! envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": ..., "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `data` carries the same text the matching tool returns to the agent, so scripts and
//! agents see identical content.

use serde::{Deserialize, Serialize};

use crate::error::Text2SqlError;
use crate::tools::ToolError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used for this command (postgres, sqlite)
    pub engine: String,

    /// Tool that was invoked (`list_tables`, `sql_query`, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(
        engine: impl Into<String>,
        command: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self {
            ok: true,
            engine: engine.into(),
            command: command.into(),
            data,
            meta,
        }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (empty when the failure happened before an engine was chosen)
    pub engine: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            engine: engine.into(),
            command: command.into(),
            error,
        }
    }

    /// Create error envelope from a typed crate error
    pub fn from_error(
        engine: impl Into<String>,
        command: impl Into<String>,
        err: &Text2SqlError,
    ) -> Self {
        Self::new(engine, command, ErrorInfo::new(err.error_code(), err.message()))
    }

    /// Create error envelope from a tool failure
    pub fn from_tool_error(engine: impl Into<String>, err: &ToolError) -> Self {
        Self::new(engine, err.tool.clone(), ErrorInfo::new("TOOL_ERROR", err.message.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CONFIG_ERROR", "TOOL_ERROR")
    pub code: String,

    /// Human-readable error message (no credentials)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the command in milliseconds
    pub execution_ms: u64,
}

impl Metadata {
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "sqlite",
            "list_tables",
            "The database contains 0 tables.".to_string(),
            Metadata::new(42),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "ok": true,
                "engine": "sqlite",
                "command": "list_tables",
                "data": "The database contains 0 tables.",
                "meta": {"execution_ms": 42}
            })
        );
    }

    #[test]
    fn test_error_envelope_from_error() {
        let err = Text2SqlError::config("SQLite requires 'file' parameter");
        let envelope = ErrorEnvelope::from_error("", "startup", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.engine, "");
        assert_eq!(envelope.command, "startup");
        assert_eq!(envelope.error.code, "CONFIG_ERROR");
        assert!(envelope.error.message.contains("SQLite requires 'file' parameter"));
    }

    #[test]
    fn test_error_envelope_from_tool_error() {
        let err = ToolError::new("sql_query", "Query execution failed: no such table: ghost");
        let json = serde_json::to_string(&ErrorEnvelope::from_tool_error("sqlite", &err)).unwrap();

        assert!(json.contains(r#""ok":false"#));
        assert!(json.contains(r#""command":"sql_query""#));
        assert!(json.contains(r#""code":"TOOL_ERROR""#));
        assert!(json.contains("no such table: ghost"));
    }
}
