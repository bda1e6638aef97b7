//! Query Executor
//!
//! Runs read queries with a bounded fetch. The lexical screen from
//! [`crate::validator`] is applied again here: callers are not trusted to have run the
//! validator first.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{DatabaseEngine, QueryResult, ValidationVerdict, MAX_ROWS};
use crate::error::{Result, Text2SqlError};
use crate::pool::ConnectionPool;
use crate::validator::lexical_screen;

pub struct QueryExecutor<E: DatabaseEngine> {
    pool: Arc<ConnectionPool<E>>,
}

impl<E: DatabaseEngine> QueryExecutor<E> {
    pub fn new(pool: Arc<ConnectionPool<E>>) -> Self {
        Self { pool }
    }

    /// Execute `query` and return at most [`MAX_ROWS`] rows.
    ///
    /// # Errors
    /// - `Forbidden` when the lexical screen rejects the query (nothing reaches the engine)
    /// - `Execution` for any engine or connection failure, with the engine's message
    ///
    /// Failures are never retried here.
    pub async fn execute(&self, query: &str) -> Result<QueryResult> {
        if let ValidationVerdict::Rejected(reason) = lexical_screen(query) {
            tracing::warn!(%query, %reason, "refusing to execute query");
            return Err(Text2SqlError::forbidden(reason));
        }

        let mut conn = self.pool.acquire().await.map_err(Text2SqlError::into_execution)?;

        let start = Instant::now();
        let result =
            E::fetch(&mut conn, query, MAX_ROWS).await.map_err(Text2SqlError::into_execution)?;

        tracing::debug!(
            rows = result.rows.len(),
            truncated = result.truncated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query executed"
        );

        Ok(result)
    }
}
