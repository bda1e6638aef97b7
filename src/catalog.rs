//! Schema Catalog
//!
//! Live, uncached schema introspection. Every call re-reads the system catalog over a
//! single pooled connection, so results always reflect the database at call time.

use std::sync::Arc;

use crate::engine::{DatabaseEngine, TableDescriptor, TableSchema};
use crate::error::{Result, Text2SqlError};
use crate::pool::ConnectionPool;

/// Table and column metadata for one schema
pub struct SchemaCatalog<E: DatabaseEngine> {
    pool: Arc<ConnectionPool<E>>,
    schema: Option<String>,
}

impl<E: DatabaseEngine> SchemaCatalog<E> {
    /// `schema` selects the namespace to inspect; `None` uses the connection's
    /// current schema (`public` on a stock `PostgreSQL` install).
    pub fn new(pool: Arc<ConnectionPool<E>>, schema: Option<String>) -> Self {
        Self { pool, schema }
    }

    /// Every base table with its comment, ordered by name.
    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        let mut conn = self.pool.acquire().await.map_err(Text2SqlError::into_catalog)?;
        let tables = E::list_tables(&mut conn, self.schema.as_deref())
            .await
            .map_err(Text2SqlError::into_catalog)?;
        tracing::debug!(count = tables.len(), "listed tables");
        Ok(tables)
    }

    /// Describe the named tables, or every table when `table_names` is `None`.
    ///
    /// Unknown names are skipped without error, so the result may be shorter than the
    /// request. Requested order is kept; a repeated name is described once. Any
    /// metadata failure aborts the whole call.
    pub async fn describe_schema(
        &self,
        table_names: Option<&[String]>,
    ) -> Result<Vec<TableSchema>> {
        let mut conn = self.pool.acquire().await.map_err(Text2SqlError::into_catalog)?;
        let schema = self.schema.as_deref();

        let names: Vec<String> = match table_names {
            Some(names) => {
                let mut unique: Vec<String> = Vec::with_capacity(names.len());
                for name in names {
                    if !unique.contains(name) {
                        unique.push(name.clone());
                    }
                }
                unique
            }
            None => E::list_tables(&mut conn, schema)
                .await
                .map_err(Text2SqlError::into_catalog)?
                .into_iter()
                .map(|t| t.name)
                .collect(),
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            match E::describe_table(&mut conn, schema, name)
                .await
                .map_err(Text2SqlError::into_catalog)?
            {
                Some(table) => tables.push(table),
                None => tracing::debug!(table = %name, "skipping unknown table"),
            }
        }

        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::StubEngine;
    use crate::pool::PoolOptions;
    use std::sync::atomic::Ordering;

    fn catalog() -> SchemaCatalog<StubEngine> {
        let pool = ConnectionPool::new(StubEngine::default(), PoolOptions::default()).unwrap();
        SchemaCatalog::new(Arc::new(pool), None)
    }

    #[tokio::test]
    async fn test_unknown_tables_are_skipped() {
        let catalog = catalog();
        let names = vec!["ghost_table".to_string()];
        let tables = catalog.describe_schema(Some(&names)).await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_catalog_error() {
        let catalog = catalog();
        catalog.pool.engine().state.fail_connect.store(true, Ordering::SeqCst);

        let err = catalog.list_tables().await.unwrap_err();
        assert!(matches!(err, Text2SqlError::Catalog(_)), "{err:?}");

        let err = catalog.describe_schema(None).await.unwrap_err();
        assert!(matches!(err, Text2SqlError::Catalog(_)), "{err:?}");
        assert_eq!(catalog.pool.available(), PoolOptions::DEFAULT_MAX_SIZE);
    }

    #[tokio::test]
    async fn test_each_call_uses_one_connection() {
        let catalog = catalog();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        catalog.describe_schema(Some(&names)).await.unwrap();
        catalog.list_tables().await.unwrap();
        assert_eq!(catalog.pool.engine().state.connects.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.pool.available(), PoolOptions::DEFAULT_MAX_SIZE);
    }
}
