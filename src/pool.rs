//! Bounded Connection Pool
//!
//! One pool per process, shared read-only (behind an `Arc`) by the catalog, the
//! validator and the executor. Every operation acquires exactly one connection and
//! holds it in a [`PooledConnection`]; dropping it hands the connection back on every
//! exit path, including cancellation of the owning future.
//!
//! Pooling itself is `deadpool`'s managed pool. [`EngineManager`] teaches it to open
//! connections through a [`DatabaseEngine`] and to recycle only connections the engine
//! still considers reusable. The pool size bounds concurrent database work, and
//! acquisition waits at most `acquire_timeout`.

use std::time::Duration;

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};

use crate::engine::DatabaseEngine;
use crate::error::{Result, Text2SqlError};

/// Pool sizing and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of simultaneously checked-out connections (at least 1)
    pub max_size: usize,

    /// How long `acquire` waits for a free connection
    pub acquire_timeout: Duration,
}

impl PoolOptions {
    pub const DEFAULT_MAX_SIZE: usize = 5;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: Self::DEFAULT_MAX_SIZE,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// `deadpool` manager that opens and recycles connections of one engine
pub struct EngineManager<E: DatabaseEngine> {
    engine: E,
}

impl<E: DatabaseEngine> managed::Manager for EngineManager<E> {
    type Type = E::Connection;
    type Error = Text2SqlError;

    async fn create(&self) -> Result<E::Connection> {
        tracing::debug!(engine = %self.engine.kind(), "opening new pooled connection");
        self.engine.connect().await
    }

    async fn recycle(
        &self,
        conn: &mut E::Connection,
        _metrics: &Metrics,
    ) -> RecycleResult<Text2SqlError> {
        if E::is_reusable(conn) {
            Ok(())
        } else {
            tracing::debug!(engine = %self.engine.kind(), "discarding broken connection");
            Err(RecycleError::Backend(Text2SqlError::connection_failed(
                "connection is no longer usable",
            )))
        }
    }
}

/// Checked-out connection; returned to the pool on drop
pub type PooledConnection<E> = Object<EngineManager<E>>;

/// Bounded pool of engine connections
pub struct ConnectionPool<E: DatabaseEngine> {
    pool: Pool<EngineManager<E>>,
    options: PoolOptions,
}

impl<E: DatabaseEngine> ConnectionPool<E> {
    /// Create a pool. Connections are opened lazily on first use.
    pub fn new(engine: E, options: PoolOptions) -> Result<Self> {
        let options = PoolOptions {
            max_size: options.max_size.max(1),
            ..options
        };
        let pool = Pool::builder(EngineManager { engine })
            .max_size(options.max_size)
            .wait_timeout(Some(options.acquire_timeout))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| Text2SqlError::config(format!("Invalid connection pool settings: {e}")))?;

        Ok(Self { pool, options })
    }

    /// The engine this pool opens connections with
    pub fn engine(&self) -> &E {
        &self.pool.manager().engine
    }

    /// Effective pool options (`max_size` clamped to at least 1)
    pub fn options(&self) -> PoolOptions {
        self.options
    }

    /// Number of connections that can be acquired right now without waiting
    pub fn available(&self) -> usize {
        let status = self.pool.status();
        let in_use = status.size.saturating_sub(status.available);
        status.max_size.saturating_sub(in_use)
    }

    /// Number of opened connections currently parked in the pool
    pub fn idle_count(&self) -> usize {
        self.pool.status().available
    }

    /// Check out one connection, reusing an idle one when possible.
    ///
    /// Fails with `ConnectionFailed` if no connection frees up within the acquire
    /// timeout or if opening a new connection fails; in both cases no slot is held.
    pub async fn acquire(&self) -> Result<PooledConnection<E>> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => Text2SqlError::connection_failed(format!(
                "no pooled connection became available within {}ms",
                self.options.acquire_timeout.as_millis()
            )),
            PoolError::Backend(e) => e,
            other => Text2SqlError::connection_failed(other.to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory engine for exercising the pool and the components without a database.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::engine::{
        DatabaseEngine, DatabaseType, QueryResult, TableDescriptor, TableSchema,
    };
    use crate::error::{Result, Text2SqlError};

    #[derive(Default)]
    pub struct StubState {
        pub connects: AtomicUsize,
        pub fail_connect: AtomicBool,
        pub broken: AtomicBool,
        pub fetches: AtomicUsize,
        /// Text of the most recent dry run
        pub last_explain: Mutex<Option<String>>,
    }

    /// Connection handle: just the sequence number of the connect call
    pub struct StubConnection {
        pub id: usize,
        state: Arc<StubState>,
    }

    #[derive(Default, Clone)]
    pub struct StubEngine {
        pub state: Arc<StubState>,
    }

    impl DatabaseEngine for StubEngine {
        type Connection = StubConnection;

        fn kind(&self) -> DatabaseType {
            DatabaseType::SQLite
        }

        async fn connect(&self) -> Result<StubConnection> {
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(Text2SqlError::connection_failed("stub refused"));
            }
            let id = self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(StubConnection {
                id,
                state: Arc::clone(&self.state),
            })
        }

        fn is_reusable(conn: &StubConnection) -> bool {
            !conn.state.broken.load(Ordering::SeqCst)
        }

        async fn list_tables(
            _conn: &mut StubConnection,
            _schema: Option<&str>,
        ) -> Result<Vec<TableDescriptor>> {
            Ok(Vec::new())
        }

        async fn describe_table(
            _conn: &mut StubConnection,
            _schema: Option<&str>,
            _table: &str,
        ) -> Result<Option<TableSchema>> {
            Ok(None)
        }

        async fn explain(conn: &mut StubConnection, query: &str) -> Result<()> {
            if let Ok(mut last) = conn.state.last_explain.lock() {
                *last = Some(query.to_string());
            }
            if query.contains("ghost_table") {
                return Err(Text2SqlError::execution("relation \"ghost_table\" does not exist"));
            }
            Ok(())
        }

        async fn fetch(
            conn: &mut StubConnection,
            _query: &str,
            _max_rows: usize,
        ) -> Result<QueryResult> {
            conn.state.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResult::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubEngine;
    use super::*;
    use std::sync::atomic::Ordering;

    fn pool(max_size: usize) -> ConnectionPool<StubEngine> {
        ConnectionPool::new(
            StubEngine::default(),
            PoolOptions {
                max_size,
                acquire_timeout: Duration::from_millis(50),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_release_restores_availability() {
        let pool = pool(2);
        assert_eq!(pool.available(), 2);
        {
            let _a = pool.acquire().await.unwrap();
            let _b = pool.acquire().await.unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let pool = pool(1);
        let first = pool.acquire().await.unwrap().id;
        let second = pool.acquire().await.unwrap().id;
        assert_eq!(first, second);
        assert_eq!(pool.engine().state.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1);
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().expect("second acquire must fail");
        assert!(matches!(err, Text2SqlError::ConnectionFailed(_)));
        assert!(err.message().contains("within 50ms"));
    }

    #[tokio::test]
    async fn test_failed_connect_releases_slot() {
        let pool = pool(1);
        pool.engine().state.fail_connect.store(true, Ordering::SeqCst);
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.available(), 1);

        pool.engine().state.fail_connect.store(false, Ordering::SeqCst);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_connections_are_replaced() {
        let pool = pool(1);
        let first = {
            let conn = pool.acquire().await.unwrap();
            pool.engine().state.broken.store(true, Ordering::SeqCst);
            conn.id
        };
        assert_eq!(pool.available(), 1);

        pool.engine().state.broken.store(false, Ordering::SeqCst);
        let second = pool.acquire().await.unwrap();
        assert_ne!(second.id, first);
        assert_eq!(pool.engine().state.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        let pool = pool(0);
        assert_eq!(pool.options().max_size, 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_holder_releases_connection() {
        let pool = std::sync::Arc::new(pool(1));
        let holder = {
            let pool = std::sync::Arc::clone(&pool);
            tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.available(), 0);

        holder.abort();
        let _ = holder.await;
        assert_eq!(pool.available(), 1);
    }
}
