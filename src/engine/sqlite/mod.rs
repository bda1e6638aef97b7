//! `SQLite` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections, opened read-only
//! - In-memory connections (`:memory:`), one private database per pooled connection
//! - Schema introspection via `sqlite_master` and the table-valued PRAGMA functions
//! - Bounded, lazily stepped query execution
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver). Every trait method delegates to a plain
//!   function and never awaits while a statement is alive.
//! - BLOB data is Base64-encoded and flagged as coerced
//! - `SQLite` has no comments on tables or columns, so both are always `None`
//! - The configured schema name is ignored: a connection sees one database

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::engine::{
    CellValue, ColumnDescriptor, ConnectionConfig, DatabaseEngine, DatabaseType,
    ForeignKeyDescriptor, IndexDescriptor, QueryResult, Row, TableDescriptor, TableSchema,
};
use crate::error::{Result, Text2SqlError};

/// Path that selects an in-memory database
pub const MEMORY_PATH: &str = ":memory:";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite` database engine implementation
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    path: PathBuf,
}

impl SqliteEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build from a parsed connection config
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(Text2SqlError::config(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }
        let file = config
            .file
            .as_ref()
            .ok_or_else(|| Text2SqlError::config("SQLite requires 'file' parameter"))?;
        Ok(Self::new(file.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }
}

impl DatabaseEngine for SqliteEngine {
    type Connection = Connection;

    fn kind(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn connect(&self) -> Result<Connection> {
        open_connection(self)
    }

    fn is_reusable(conn: &Connection) -> bool {
        // A connection left inside a transaction must not be handed out again.
        conn.is_autocommit()
    }

    async fn list_tables(
        conn: &mut Connection,
        schema: Option<&str>,
    ) -> Result<Vec<TableDescriptor>> {
        if let Some(schema) = schema {
            tracing::debug!(%schema, "ignoring schema for SQLite");
        }
        list_tables(conn)
    }

    async fn describe_table(
        conn: &mut Connection,
        _schema: Option<&str>,
        table: &str,
    ) -> Result<Option<TableSchema>> {
        describe_table(conn, table)
    }

    async fn explain(conn: &mut Connection, query: &str) -> Result<()> {
        explain(conn, query)
    }

    async fn fetch(conn: &mut Connection, query: &str, max_rows: usize) -> Result<QueryResult> {
        fetch(conn, query, max_rows)
    }
}

/// Open a read-only connection (in-memory databases are private and writable)
fn open_connection(engine: &SqliteEngine) -> Result<Connection> {
    let conn = if engine.is_memory() {
        Connection::open_in_memory()
    } else {
        Connection::open_with_flags(
            &engine.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
    .map_err(|e| {
        Text2SqlError::connection_failed(format!(
            "Failed to open SQLite database {}: {e}",
            engine.path.display()
        ))
    })?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| Text2SqlError::connection_failed(format!("Failed to set busy timeout: {e}")))?;

    Ok(conn)
}

fn list_tables(conn: &Connection) -> Result<Vec<TableDescriptor>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
             AND substr(name, 1, 7) <> 'sqlite_'
             ORDER BY name",
        )
        .map_err(|e| Text2SqlError::catalog(format!("Failed to query tables: {e}")))?;

    let tables = stmt
        .query_map([], |row| {
            Ok(TableDescriptor {
                name: row.get(0)?,
                comment: None,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| Text2SqlError::catalog(format!("Failed to fetch table names: {e}")))?;

    Ok(tables)
}

fn describe_table(conn: &Connection, table_name: &str) -> Result<Option<TableSchema>> {
    let exists = conn
        .query_row(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name = ?1 AND substr(name, 1, 7) <> 'sqlite_'",
            [table_name],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to look up table {table_name}: {e}"))
        })?;
    if exists.is_none() {
        return Ok(None);
    }

    let columns = columns(conn, table_name)?;
    let foreign_keys = foreign_keys(conn, table_name)?;
    let indexes = indexes(conn, table_name)?;

    Ok(Some(TableSchema {
        table: TableDescriptor {
            name: table_name.to_string(),
            comment: None,
        },
        columns,
        foreign_keys,
        indexes,
    }))
}

fn columns(conn: &Connection, table_name: &str) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = conn
        .prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to prepare table_info for {table_name}: {e}"))
        })?;

    let columns = stmt
        .query_map([table_name], |row| {
            Ok(ColumnDescriptor {
                name: row.get(0)?,
                data_type: row.get(1)?,
                // pk: position within the primary key, 0 when not part of it
                is_primary_key: row.get::<_, i64>(2)? > 0,
                comment: None,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to query columns for {table_name}: {e}"))
        })?;

    Ok(columns)
}

/// Primary key columns in key order
fn primary_key(conn: &Connection, table_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to prepare pk query for {table_name}: {e}"))
        })?;

    let names = stmt
        .query_map([table_name], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to query primary key for {table_name}: {e}"))
        })?;

    Ok(names)
}

fn foreign_keys(conn: &Connection, table_name: &str) -> Result<Vec<ForeignKeyDescriptor>> {
    let mut stmt = conn
        .prepare(
            r#"SELECT id, "table", "from", "to" FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
        )
        .map_err(|e| {
            Text2SqlError::catalog(format!(
                "Failed to prepare foreign_key_list for {table_name}: {e}"
            ))
        })?;

    // id -> (referenced table, local columns, referenced columns)
    let mut grouped: BTreeMap<i64, (String, Vec<String>, Vec<Option<String>>)> = BTreeMap::new();

    let rows = stmt
        .query_map([table_name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to query foreign keys for {table_name}: {e}"))
        })?;

    for (id, target, from, to) in rows {
        let entry = grouped.entry(id).or_insert_with(|| (target, Vec::new(), Vec::new()));
        entry.1.push(from);
        entry.2.push(to);
    }

    grouped
        .into_values()
        .map(|(target_table, source_columns, targets)| -> Result<ForeignKeyDescriptor> {
            // `REFERENCES parent` without a column list points at the parent's primary key.
            let target_columns = if targets.iter().all(Option::is_some) {
                targets.into_iter().flatten().collect()
            } else {
                primary_key(conn, &target_table)?
            };
            Ok(ForeignKeyDescriptor {
                source_columns,
                target_table,
                target_columns,
            })
        })
        .collect()
}

fn indexes(conn: &Connection, table_name: &str) -> Result<Vec<IndexDescriptor>> {
    let mut stmt = conn
        .prepare(r#"SELECT name, "unique" FROM pragma_index_list(?1) ORDER BY name"#)
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to prepare index_list for {table_name}: {e}"))
        })?;

    let index_list: Vec<(String, bool)> = stmt
        .query_map([table_name], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| {
            Text2SqlError::catalog(format!("Failed to query indexes for {table_name}: {e}"))
        })?;

    let mut info_stmt = conn
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .map_err(|e| Text2SqlError::catalog(format!("Failed to prepare index_info: {e}")))?;

    let mut indexes = Vec::with_capacity(index_list.len());
    for (name, unique) in index_list {
        // Created implicitly for PRIMARY KEY / UNIQUE constraints
        if name.starts_with("sqlite_autoindex_") {
            continue;
        }

        let columns: Vec<Option<String>> = info_stmt
            .query_map([&name], |row| row.get(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| {
                Text2SqlError::catalog(format!("Failed to query index columns for {name}: {e}"))
            })?;

        indexes.push(IndexDescriptor {
            name,
            columns: columns
                .into_iter()
                .map(|c| c.unwrap_or_else(|| "<expression>".to_string()))
                .collect(),
            unique,
        });
    }

    Ok(indexes)
}

/// Plan the query and throw the plan away; the enclosing transaction rolls back on drop.
fn explain(conn: &mut Connection, query: &str) -> Result<()> {
    let tx = conn.transaction().map_err(execution_error)?;
    {
        let mut stmt = tx
            .prepare(&format!("EXPLAIN QUERY PLAN {query}"))
            .map_err(execution_error)?;
        let mut rows = stmt.query([]).map_err(execution_error)?;
        while rows.next().map_err(execution_error)?.is_some() {}
    }
    tx.rollback().map_err(execution_error)
}

/// Step through at most `max_rows + 1` rows; the extra row only sets `truncated`.
fn fetch(conn: &Connection, query: &str, max_rows: usize) -> Result<QueryResult> {
    let mut stmt = conn.prepare(query).map_err(execution_error)?;

    if !stmt.readonly() {
        return Err(Text2SqlError::execution("statement would modify the database"));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let mut cursor = stmt.query([]).map_err(execution_error)?;
    let mut rows = Vec::new();
    let mut truncated = false;

    while let Some(row) = cursor.next().map_err(execution_error)? {
        if rows.len() == max_rows {
            truncated = true;
            break;
        }

        let mut record = Row::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(execution_error)?;
            record.insert(name.clone(), classify_cell(value));
        }
        rows.push(record);
    }

    Ok(QueryResult {
        columns,
        rows,
        truncated,
    })
}

#[allow(clippy::needless_pass_by_value)]
fn execution_error(e: rusqlite::Error) -> Text2SqlError {
    Text2SqlError::execution(e.to_string())
}

/// Convert one `SQLite` value, coercing anything JSON cannot carry faithfully
fn classify_cell(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::null(),
        ValueRef::Integer(i) => CellValue::Typed(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or_else(|| CellValue::Coerced(f.to_string()), |n| CellValue::Typed(n.into())),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => CellValue::Typed(text.into()),
            Err(_) => CellValue::Coerced(String::from_utf8_lossy(bytes).into_owned()),
        },
        ValueRef::Blob(bytes) => {
            CellValue::Coerced(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
