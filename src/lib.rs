//! text2sql - Read-Only Database Tools for Text-to-SQL Agents
//!
//! This crate is the database-facing half of a text-to-SQL agent. It gives a language
//! model four tools: list the tables, describe their schemas, check a query without
//! running it, and run a read-only query with a bounded result.
//!
//! # Core Principles
//! - Read-only by construction: a lexical screen, read-only connections and dry-run
//!   validation all stand between the agent and the data
//! - Tool failures are text the agent can read and act on, never a crashed loop
//! - Bounded output: at most [`engine::MAX_ROWS`] rows per query
//!
//! # Module Organization
//! - [`engine`] - Database engine trait, core types, `PostgreSQL` and `SQLite` engines
//! - [`pool`] - Bounded connection pool shared by all components
//! - [`catalog`] - Table listing and schema description
//! - [`validator`] - Lexical screen and dry-run validation
//! - [`executor`] - Bounded read-only query execution
//! - [`tools`] - Agent-facing tool facade
//! - [`mcp`] - JSON-RPC server exposing the tools
//! - [`config`] - Configuration loading
//! - [`output`] - JSON envelopes for the CLI
//! - [`error`] - Error types

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod mcp;
pub mod output;
pub mod pool;
pub mod tools;
pub mod validator;

pub use catalog::SchemaCatalog;
pub use config::{resolve_settings, DatabaseSettings};
pub use engine::{
    CellValue, ColumnDescriptor, ConnectionConfig, DatabaseEngine, DatabaseType,
    ForeignKeyDescriptor, IndexDescriptor, QueryResult, Row, TableDescriptor, TableSchema,
    ValidationVerdict, MAX_ROWS,
};
pub use error::{Result, Text2SqlError};
pub use executor::QueryExecutor;
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use pool::{ConnectionPool, PoolOptions, PooledConnection};
pub use tools::{ToolDefinition, ToolError, Toolbox};
pub use validator::{lexical_screen, QueryValidator};
