//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP, with a connect timeout
//! - Schema introspection via `pg_catalog` (table and column comments included)
//! - Dry runs and queries inside read-only transactions that are always rolled back
//! - Bounded fetch through a portal: the server never sends more than `max_rows + 1` rows
//! - Rich type system support (arrays, JSON/JSONB, numerics, timestamps, etc.)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Queries go through the extended protocol, so a string holding several statements
//!   is rejected by the server instead of being run
//! - Cells are decoded from their binary wire form one at a time; a value that cannot be
//!   expressed in JSON without loss is coerced to text and flagged (NUMERIC, dates and
//!   times, UUID, BYTEA as Base64, non-finite floats, unknown types)

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;

use base64::Engine as _;
use serde_json::Value;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, Config, NoTls};

use crate::engine::{
    CellValue, ColumnDescriptor, ConnectionConfig, DatabaseEngine, DatabaseType,
    ForeignKeyDescriptor, IndexDescriptor, QueryResult, Row, TableDescriptor, TableSchema,
};
use crate::error::{Result, Text2SqlError};

/// `PostgreSQL` database engine implementation
pub struct PostgresEngine {
    config: Config,
}

impl PostgresEngine {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build from a parsed connection config
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            config: build_pg_config(config)?,
        })
    }
}

impl DatabaseEngine for PostgresEngine {
    type Connection = Client;

    fn kind(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self) -> Result<Client> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| {
            Text2SqlError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Note: Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(client)
    }

    fn is_reusable(conn: &Client) -> bool {
        !conn.is_closed()
    }

    async fn list_tables(conn: &mut Client, schema: Option<&str>) -> Result<Vec<TableDescriptor>> {
        let schema = target_schema(conn, schema).await?;
        list_tables(conn, &schema).await
    }

    async fn describe_table(
        conn: &mut Client,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Option<TableSchema>> {
        let schema = target_schema(conn, schema).await?;
        describe_table(conn, &schema, table).await
    }

    async fn explain(conn: &mut Client, query: &str) -> Result<()> {
        let tx = conn
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(execution_error)?;
        tx.query(&format!("EXPLAIN {query}"), &[]).await.map_err(execution_error)?;
        tx.rollback().await.map_err(execution_error)
    }

    async fn fetch(conn: &mut Client, query: &str, max_rows: usize) -> Result<QueryResult> {
        let tx = conn
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(execution_error)?;

        let stmt = tx.prepare(query).await.map_err(execution_error)?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let portal = tx.bind(&stmt, &[]).await.map_err(execution_error)?;
        let limit = i32::try_from(max_rows.saturating_add(1)).unwrap_or(i32::MAX);
        let fetched = tx.query_portal(&portal, limit).await.map_err(execution_error)?;

        tx.rollback().await.map_err(execution_error)?;

        let truncated = fetched.len() > max_rows;
        let rows = fetched
            .iter()
            .take(max_rows)
            .map(|row| {
                let mut record = Row::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), read_cell(row, idx));
                }
                record
            })
            .collect();

        Ok(QueryResult {
            columns,
            rows,
            truncated,
        })
    }
}

/// Build tokio-postgres Config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    if config.engine != DatabaseType::Postgres {
        return Err(Text2SqlError::config(format!(
            "Expected PostgreSQL engine, got {}",
            config.engine
        )));
    }

    let mut pg_config = match &config.url {
        Some(url) => url.parse::<Config>().map_err(|e| {
            Text2SqlError::config(format!("Invalid PostgreSQL connection string: {e}"))
        })?,
        None => config_from_fields(config)?,
    };

    if pg_config.get_application_name().is_none() {
        pg_config.application_name("text2sql");
    }
    if pg_config.get_connect_timeout().is_none() {
        pg_config.connect_timeout(PostgresEngine::CONNECT_TIMEOUT);
    }

    // Also applies a password resolved from the environment after parsing.
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        pg_config.password(password);
    }

    Ok(pg_config)
}

fn config_from_fields(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| Text2SqlError::config("PostgreSQL requires 'host' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| Text2SqlError::config("PostgreSQL requires 'user' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| Text2SqlError::config("PostgreSQL requires 'database' parameter"))?;

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(config.port.unwrap_or(ConnectionConfig::DEFAULT_POSTGRES_PORT))
        .user(user)
        .dbname(database);

    Ok(pg_config)
}

/// Determine target schema from configuration or current schema
async fn target_schema(client: &Client, schema: Option<&str>) -> Result<String> {
    if let Some(schema) = schema {
        return Ok(schema.to_string());
    }

    let row = client
        .query_one("SELECT current_schema()", &[])
        .await
        .map_err(|e| Text2SqlError::catalog(format!("Failed to query current schema: {e}")))?;

    row.try_get::<_, Option<String>>(0)
        .map_err(|e| Text2SqlError::catalog(format!("Failed to read current schema: {e}")))?
        .ok_or_else(|| Text2SqlError::catalog("No current schema: search_path is empty"))
}

fn non_empty(comment: Option<String>) -> Option<String> {
    comment.filter(|c| !c.trim().is_empty())
}

async fn list_tables(client: &Client, schema: &str) -> Result<Vec<TableDescriptor>> {
    let query = "
        SELECT c.relname, obj_description(c.oid, 'pg_class')
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
        ORDER BY c.relname";

    let rows = client
        .query(query, &[&schema])
        .await
        .map_err(|e| Text2SqlError::catalog(format!("Failed to list tables in {schema}: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| TableDescriptor {
            name: row.get(0),
            comment: non_empty(row.get(1)),
        })
        .collect())
}

async fn describe_table(
    client: &Client,
    schema: &str,
    table_name: &str,
) -> Result<Option<TableSchema>> {
    let query = "
        SELECT c.oid, obj_description(c.oid, 'pg_class')
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')";

    let found = client.query_opt(query, &[&schema, &table_name]).await.map_err(|e| {
        Text2SqlError::catalog(format!("Failed to look up table {schema}.{table_name}: {e}"))
    })?;

    let Some(found) = found else {
        return Ok(None);
    };
    let oid: u32 = found.get(0);
    let comment = non_empty(found.get(1));

    let columns = introspect_columns(client, oid, table_name).await?;
    let foreign_keys = introspect_foreign_keys(client, oid, table_name).await?;
    let indexes = introspect_indexes(client, oid, table_name).await?;

    Ok(Some(TableSchema {
        table: TableDescriptor {
            name: table_name.to_string(),
            comment,
        },
        columns,
        foreign_keys,
        indexes,
    }))
}

async fn introspect_columns(
    client: &Client,
    oid: u32,
    table_name: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let query = "
        SELECT
            a.attname,
            format_type(a.atttypid, a.atttypmod),
            COALESCE(a.attnum = ANY(pk.conkey), false),
            col_description(a.attrelid, a.attnum)
        FROM pg_catalog.pg_attribute a
        LEFT JOIN pg_catalog.pg_constraint pk
          ON pk.conrelid = a.attrelid AND pk.contype = 'p'
        WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum";

    let rows = client.query(query, &[&oid]).await.map_err(|e| {
        Text2SqlError::catalog(format!("Failed to query columns for {table_name}: {e}"))
    })?;

    Ok(rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: row.get(0),
            data_type: row.get(1),
            is_primary_key: row.get(2),
            comment: non_empty(row.get(3)),
        })
        .collect())
}

async fn introspect_foreign_keys(
    client: &Client,
    oid: u32,
    table_name: &str,
) -> Result<Vec<ForeignKeyDescriptor>> {
    let query = "
        SELECT con.conname, tgt.relname, src_att.attname, tgt_att.attname
        FROM pg_catalog.pg_constraint con
        JOIN pg_catalog.pg_class tgt ON tgt.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(src, dst, ord)
        JOIN pg_catalog.pg_attribute src_att
          ON src_att.attrelid = con.conrelid AND src_att.attnum = k.src
        JOIN pg_catalog.pg_attribute tgt_att
          ON tgt_att.attrelid = con.confrelid AND tgt_att.attnum = k.dst
        WHERE con.conrelid = $1 AND con.contype = 'f'
        ORDER BY con.conname, k.ord";

    let rows = client.query(query, &[&oid]).await.map_err(|e| {
        Text2SqlError::catalog(format!("Failed to query foreign keys for {table_name}: {e}"))
    })?;

    // Group by constraint name
    let mut grouped: BTreeMap<String, ForeignKeyDescriptor> = BTreeMap::new();
    for row in &rows {
        let constraint: String = row.get(0);
        let entry = grouped.entry(constraint).or_insert_with(|| ForeignKeyDescriptor {
            source_columns: Vec::new(),
            target_table: row.get(1),
            target_columns: Vec::new(),
        });
        entry.source_columns.push(row.get(2));
        entry.target_columns.push(row.get(3));
    }

    Ok(grouped.into_values().collect())
}

async fn introspect_indexes(
    client: &Client,
    oid: u32,
    table_name: &str,
) -> Result<Vec<IndexDescriptor>> {
    // Key columns only (INCLUDE columns are skipped); expression keys are rendered as SQL.
    let query = "
        SELECT
            ic.relname,
            i.indisunique,
            array_agg(
                COALESCE(a.attname::text, pg_get_indexdef(i.indexrelid, k.ord::int, true))
                ORDER BY k.ord
            )
        FROM pg_catalog.pg_index i
        JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
        CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        LEFT JOIN pg_catalog.pg_attribute a
          ON a.attrelid = i.indrelid AND a.attnum = k.attnum AND k.attnum > 0
        WHERE i.indrelid = $1 AND NOT i.indisprimary AND k.ord <= i.indnkeyatts
        GROUP BY ic.relname, i.indisunique
        ORDER BY ic.relname";

    let rows = client.query(query, &[&oid]).await.map_err(|e| {
        Text2SqlError::catalog(format!("Failed to query indexes for {table_name}: {e}"))
    })?;

    Ok(rows
        .iter()
        .map(|row| IndexDescriptor {
            name: row.get(0),
            unique: row.get(1),
            columns: row.get(2),
        })
        .collect())
}

/// Engine errors keep the server's message verbatim
#[allow(clippy::needless_pass_by_value)]
fn execution_error(e: tokio_postgres::Error) -> Text2SqlError {
    match e.as_db_error() {
        Some(db) => Text2SqlError::execution(db.message()),
        None => Text2SqlError::execution(e.to_string()),
    }
}

type DecodeResult<T> = std::result::Result<T, Box<dyn StdError + Sync + Send>>;

/// A cell in its binary wire form, accepted for every type
struct RawCell<'a> {
    ty: Type,
    raw: &'a [u8],
}

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        Ok(Self {
            ty: ty.clone(),
            raw,
        })
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn read_cell(row: &tokio_postgres::Row, idx: usize) -> CellValue {
    match row.try_get::<_, Option<RawCell<'_>>>(idx) {
        Ok(Some(cell)) => decode_cell(&cell.ty, cell.raw),
        Ok(None) => CellValue::null(),
        Err(e) => CellValue::Coerced(format!("<unreadable: {e}>")),
    }
}

fn decode_cell(ty: &Type, raw: &[u8]) -> CellValue {
    if let Kind::Array(member) = ty.kind() {
        return decode_array(ty, member, raw);
    }
    match decode_typed(ty, raw) {
        Ok(Some(value)) => CellValue::Typed(value),
        Ok(None) | Err(_) => CellValue::Coerced(coerce_to_text(ty, raw)),
    }
}

/// One-dimensional arrays stay typed when every element does
fn decode_array(ty: &Type, member: &Type, raw: &[u8]) -> CellValue {
    let Ok(elements) = Vec::<Option<RawCell<'_>>>::from_sql(ty, raw) else {
        return CellValue::Coerced(coerce_to_text(ty, raw));
    };

    let cells: Vec<CellValue> = elements
        .into_iter()
        .map(|element| element.map_or_else(CellValue::null, |c| decode_cell(member, c.raw)))
        .collect();

    let values = Value::Array(cells.iter().map(CellValue::to_json).collect());
    if cells.iter().any(CellValue::is_coerced) {
        CellValue::Coerced(values.to_string())
    } else {
        CellValue::Typed(values)
    }
}

/// Lossless JSON for the types that have one; `None` means "coerce"
fn decode_typed(ty: &Type, raw: &[u8]) -> DecodeResult<Option<Value>> {
    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => i16::from_sql(ty, raw)?.into(),
        Type::INT4 => i32::from_sql(ty, raw)?.into(),
        Type::INT8 => i64::from_sql(ty, raw)?.into(),
        Type::OID => u32::from_sql(ty, raw)?.into(),
        Type::FLOAT4 => {
            // Through the shortest decimal form, so 0.1::real stays 0.1
            let v: f64 = f32::from_sql(ty, raw)?.to_string().parse()?;
            return Ok(serde_json::Number::from_f64(v).map(Value::Number));
        }
        Type::FLOAT8 => {
            return Ok(serde_json::Number::from_f64(f64::from_sql(ty, raw)?).map(Value::Number));
        }
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(std::str::from_utf8(raw)?.to_string())
        }
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        _ => match ty.kind() {
            Kind::Enum(_) => Value::String(std::str::from_utf8(raw)?.to_string()),
            _ => return Ok(None),
        },
    };
    Ok(Some(value))
}

/// Text form of a value that JSON cannot carry faithfully
fn coerce_to_text(ty: &Type, raw: &[u8]) -> String {
    let text = match *ty {
        Type::NUMERIC => decode_numeric(raw).ok(),
        Type::FLOAT4 => f32::from_sql(ty, raw).ok().map(|v| v.to_string()),
        Type::FLOAT8 => f64::from_sql(ty, raw).ok().map(|v| v.to_string()),
        Type::TIMESTAMP => chrono::NaiveDateTime::from_sql(ty, raw)
            .ok()
            .map(|v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Type::TIMESTAMPTZ => {
            chrono::DateTime::<chrono::Utc>::from_sql(ty, raw).ok().map(|v| v.to_rfc3339())
        }
        Type::DATE => {
            chrono::NaiveDate::from_sql(ty, raw).ok().map(|v| v.format("%Y-%m-%d").to_string())
        }
        Type::TIME => {
            chrono::NaiveTime::from_sql(ty, raw).ok().map(|v| v.format("%H:%M:%S%.f").to_string())
        }
        Type::UUID => uuid::Uuid::from_sql(ty, raw).ok().map(|v| v.to_string()),
        Type::BYTEA => Some(base64::engine::general_purpose::STANDARD.encode(raw)),
        _ => None,
    };

    text.unwrap_or_else(|| match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => base64::engine::general_purpose::STANDARD.encode(raw),
    })
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC exactly, keeping its display scale.
///
/// Wire layout: ndigits, weight, sign, dscale (all 16-bit), then `ndigits` base-10000
/// digits. `weight` is the power of 10000 of the first digit.
fn decode_numeric(raw: &[u8]) -> DecodeResult<String> {
    let word = |i: usize| -> DecodeResult<u16> {
        raw.get(2 * i..2 * i + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "numeric value is truncated".into())
    };

    let ndigits = usize::from(word(0)?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{other:04x}").into()),
    }

    let digits = (0..ndigits).map(|i| word(4 + i)).collect::<DecodeResult<Vec<u16>>>()?;
    let digit = |i: i32| usize::try_from(i).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0);

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}
