//! Tool Facade
//!
//! The four operations an LLM agent calls while answering a question:
//!
//! - `list_tables` - every table with its comment
//! - `table_schema` - columns, keys and indexes of comma-separated tables (all if omitted)
//! - `sql_query` - run a read query, at most 100 rows, as pretty JSON
//! - `sql_query_checker` - validate a query without running it
//!
//! Every operation returns self-describing text. Typed errors and panics never cross this
//! boundary: they are flattened into a [`ToolError`] naming the tool and the cause.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::SchemaCatalog;
use crate::engine::{DatabaseEngine, QueryResult, TableDescriptor, TableSchema, ValidationVerdict};
use crate::error::Text2SqlError;
use crate::executor::QueryExecutor;
use crate::pool::ConnectionPool;
use crate::validator::QueryValidator;

pub const LIST_TABLES: &str = "list_tables";
pub const TABLE_SCHEMA: &str = "table_schema";
pub const SQL_QUERY: &str = "sql_query";
pub const SQL_QUERY_CHECKER: &str = "sql_query_checker";

/// Flattened failure of one tool call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{tool} failed: {message}")]
pub struct ToolError {
    pub tool: String,
    pub message: String,
}

impl ToolError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Arguments of `list_tables`
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListTablesArgs {}

/// Arguments of `table_schema`
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TableSchemaArgs {
    #[serde(default)]
    #[schemars(
        description = "Table names separated by commas, e.g. \"orders, users\". Omit to describe every table."
    )]
    pub table_names: Option<String>,
}

/// Arguments of `sql_query` and `sql_query_checker`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryArgs {
    #[schemars(description = "A single SQL statement starting with SELECT or WITH")]
    pub query: String,
}

/// Machine-readable description of one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The database-facing tool surface, sharing one connection pool
pub struct Toolbox<E: DatabaseEngine> {
    pool: Arc<ConnectionPool<E>>,
    catalog: SchemaCatalog<E>,
    validator: QueryValidator<E>,
    executor: QueryExecutor<E>,
}

impl<E: DatabaseEngine> Toolbox<E> {
    /// `schema` is the namespace to introspect (`None` = the connection's current schema)
    pub fn new(pool: Arc<ConnectionPool<E>>, schema: Option<String>) -> Self {
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&pool), schema),
            validator: QueryValidator::new(Arc::clone(&pool)),
            executor: QueryExecutor::new(Arc::clone(&pool)),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<E>> {
        &self.pool
    }

    /// List every table and its description
    pub async fn list_tables(&self) -> Result<String, ToolError> {
        guarded(LIST_TABLES, async {
            let tables = self.catalog.list_tables().await?;
            Ok(render_table_list(&tables))
        })
        .await
    }

    /// Describe tables given as a comma-separated list; `None` or blank means all tables
    pub async fn table_schema(&self, table_names: Option<&str>) -> Result<String, ToolError> {
        guarded(TABLE_SCHEMA, async {
            let requested = parse_table_names(table_names);
            let tables = self.catalog.describe_schema(requested.as_deref()).await?;
            Ok(render_schemas(requested.as_deref(), &tables))
        })
        .await
    }

    /// Execute a read query and render at most 100 rows
    pub async fn sql_query(&self, query: &str) -> Result<String, ToolError> {
        guarded(SQL_QUERY, async {
            if query.trim().is_empty() {
                return Err(Text2SqlError::invalid_input("query must not be empty"));
            }
            let result = self.executor.execute(query).await?;
            render_query_result(&result)
        })
        .await
    }

    /// Validate a query without running it; a rejection is an ordinary answer
    pub async fn sql_query_checker(&self, query: &str) -> Result<String, ToolError> {
        guarded(SQL_QUERY_CHECKER, async {
            Ok(match self.validator.check(query).await {
                ValidationVerdict::Valid => {
                    "The SQL query is valid and can be executed.".to_string()
                }
                ValidationVerdict::Rejected(reason) => format!("Error: {reason}"),
            })
        })
        .await
    }

    /// Dispatch a call by tool name with JSON arguments (`null` counts as `{}`)
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        match name {
            LIST_TABLES => {
                parse_args::<ListTablesArgs>(name, arguments)?;
                self.list_tables().await
            }
            TABLE_SCHEMA => {
                let args: TableSchemaArgs = parse_args(name, arguments)?;
                self.table_schema(args.table_names.as_deref()).await
            }
            SQL_QUERY => {
                let args: QueryArgs = parse_args(name, arguments)?;
                self.sql_query(&args.query).await
            }
            SQL_QUERY_CHECKER => {
                let args: QueryArgs = parse_args(name, arguments)?;
                self.sql_query_checker(&args.query).await
            }
            _ => Err(ToolError::new(name, format!("unknown tool '{name}'"))),
        }
    }
}

/// Names, descriptions and argument schemas of all four tools
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: LIST_TABLES,
            description: "List every table in the database with its description. Use this first to find out which tables exist.",
            input_schema: input_schema::<ListTablesArgs>(),
        },
        ToolDefinition {
            name: TABLE_SCHEMA,
            description: "Describe tables: column names and types, primary keys, foreign keys and indexes. Pass table names separated by commas; omit them to describe every table.",
            input_schema: input_schema::<TableSchemaArgs>(),
        },
        ToolDefinition {
            name: SQL_QUERY,
            description: "Execute a read-only SQL query (SELECT or WITH) and return at most 100 rows as JSON. Check the query with sql_query_checker first.",
            input_schema: input_schema::<QueryArgs>(),
        },
        ToolDefinition {
            name: SQL_QUERY_CHECKER,
            description: "Check whether a SQL query is safe and valid without executing it. Returns either a confirmation or the reason it was rejected.",
            input_schema: input_schema::<QueryArgs>(),
        },
    ]
}

fn input_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::new(tool, format!("invalid arguments: {e}")))
}

/// Run one tool body, converting typed errors and panics into `ToolError`
async fn guarded<F>(tool: &str, body: F) -> Result<String, ToolError>
where
    F: Future<Output = Result<String, Text2SqlError>>,
{
    tracing::info!(tool, "tool call");
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            tracing::warn!(tool, code = e.error_code(), error = %e, "tool call failed");
            Err(ToolError::new(tool, e.message()))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(tool, %message, "tool call panicked");
            Err(ToolError::new(tool, format!("internal error: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Split a comma-separated list, keeping the first of any repeated name;
/// blank input selects every table
fn parse_table_names(input: Option<&str>) -> Option<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for name in input?.split(',').map(str::trim) {
        if !name.is_empty() && !names.iter().any(|seen| seen == name) {
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

fn render_table_list(tables: &[TableDescriptor]) -> String {
    if tables.is_empty() {
        return "The database contains 0 tables.".to_string();
    }

    let mut out = format!(
        "The database contains {} table{}:\n",
        tables.len(),
        if tables.len() == 1 { "" } else { "s" }
    );
    for (i, table) in tables.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n   Description: {}\n",
            i + 1,
            table.name,
            table.comment.as_deref().unwrap_or("(none)")
        ));
    }
    out
}

fn render_schemas(requested: Option<&[String]>, tables: &[TableSchema]) -> String {
    if tables.is_empty() {
        return match requested {
            Some(names) => format!("None of the requested tables exist: {}.", names.join(", ")),
            None => "The database contains 0 tables.".to_string(),
        };
    }

    let mut blocks: Vec<String> = tables.iter().map(render_table_schema).collect();

    if let Some(names) = requested {
        let missing: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !tables.iter().any(|t| t.name() == *name))
            .collect();
        if !missing.is_empty() {
            blocks.push(format!("Tables not found: {}.", missing.join(", ")));
        }
    }

    blocks.join("\n\n")
}

fn render_table_schema(table: &TableSchema) -> String {
    let mut out = format!("Table: {}", table.name());
    if let Some(comment) = &table.table.comment {
        out.push_str(&format!(" -- comment: {comment}"));
    }

    out.push_str("\nColumns:");
    for column in &table.columns {
        out.push_str(&format!("\n    {} {}", column.name, column.data_type));
        if column.is_primary_key {
            out.push_str(" (primary key)");
        }
        if let Some(comment) = &column.comment {
            out.push_str(&format!(" -- comment: {comment}"));
        }
    }

    if !table.foreign_keys.is_empty() {
        out.push_str("\nForeign keys:");
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "\n    ({}) -> {}({})",
                fk.source_columns.join(", "),
                fk.target_table,
                fk.target_columns.join(", ")
            ));
        }
    }

    if !table.indexes.is_empty() {
        out.push_str("\nIndexes:");
        for index in &table.indexes {
            out.push_str(&format!("\n    {} ({})", index.name, index.columns.join(", ")));
            if index.unique {
                out.push_str(" (unique)");
            }
        }
    }

    out
}

fn render_query_result(result: &QueryResult) -> Result<String, Text2SqlError> {
    if result.is_empty() {
        return Ok(if result.columns.is_empty() {
            "Query returned no rows.".to_string()
        } else {
            format!("Query returned no rows. Columns: {}", result.columns.join(", "))
        });
    }

    serde_json::to_string_pretty(result)
        .map_err(|e| Text2SqlError::execution(format!("Failed to serialize result: {e}")))
}
