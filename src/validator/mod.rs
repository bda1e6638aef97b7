//! Query Safety Validation
//!
//! Two mandatory stages, run in order:
//!
//! 1. [`lexical_screen`]: the trimmed, lowercased text must start with `select` or
//!    `with` and must not contain any of [`FORBIDDEN_KEYWORDS`] anywhere. The match is a
//!    plain substring test, so identifiers such as `update_time` or string literals
//!    containing `delete` are rejected too. This is a known false positive and is kept.
//! 2. Dry run: the engine plans the query (`EXPLAIN`) inside a transaction that is
//!    always rolled back. Any engine error becomes a rejection reason.
//!
//! The lowercased copy is only used for comparison; the engine always receives the
//! query text exactly as given.

use std::sync::Arc;

use crate::engine::{DatabaseEngine, ValidationVerdict};
use crate::pool::ConnectionPool;

/// Substrings that make a query unsafe to run, wherever they appear
pub const FORBIDDEN_KEYWORDS: [&str; 8] =
    ["drop", "delete", "truncate", "create", "alter", "insert", "update", "grant"];

/// Statement prefixes accepted by the screen
const READ_PREFIXES: [&str; 2] = ["select", "with"];

/// Stage one: purely lexical, no database access.
///
/// Also used by the executor, which must not assume validation ran first.
#[must_use]
pub fn lexical_screen(query: &str) -> ValidationVerdict {
    let normalized = query.trim().to_lowercase();

    if normalized.is_empty() {
        return ValidationVerdict::Rejected("query must not be empty".to_string());
    }

    if !READ_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix)) {
        return ValidationVerdict::Rejected(
            "SQL must begin with SELECT or WITH; other statements are not supported".to_string(),
        );
    }

    if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|kw| normalized.contains(*kw)) {
        return ValidationVerdict::Rejected(format!(
            "query contains forbidden keyword '{keyword}'"
        ));
    }

    ValidationVerdict::Valid
}

/// Lexical screen plus engine dry run
pub struct QueryValidator<E: DatabaseEngine> {
    pool: Arc<ConnectionPool<E>>,
}

impl<E: DatabaseEngine> QueryValidator<E> {
    pub fn new(pool: Arc<ConnectionPool<E>>) -> Self {
        Self { pool }
    }

    /// Check a query without executing it.
    ///
    /// Never fails: connection problems and planner errors are reported as
    /// `Rejected`. Calling it twice on an unchanged schema gives the same verdict.
    pub async fn check(&self, query: &str) -> ValidationVerdict {
        if let rejected @ ValidationVerdict::Rejected(_) = lexical_screen(query) {
            tracing::debug!(%query, ?rejected, "lexical screen rejected query");
            return rejected;
        }

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                return ValidationVerdict::Rejected(format!(
                    "could not check query, database unavailable: {}",
                    e.detail()
                ))
            }
        };

        match E::explain(&mut conn, query).await {
            Ok(()) => ValidationVerdict::Valid,
            Err(e) => {
                tracing::debug!(%query, error = %e, "dry run rejected query");
                ValidationVerdict::Rejected(format!("SQL parse/plan failed: {}", e.detail()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::StubEngine;
    use crate::pool::PoolOptions;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn rejected(query: &str) -> String {
        match lexical_screen(query) {
            ValidationVerdict::Rejected(reason) => reason,
            ValidationVerdict::Valid => panic!("expected {query:?} to be rejected"),
        }
    }

    // Lexical screen

    #[test]
    fn test_select_passes() {
        assert_eq!(lexical_screen("SELECT * FROM users"), ValidationVerdict::Valid);
        assert_eq!(lexical_screen("select count(*) from users"), ValidationVerdict::Valid);
    }

    #[test]
    fn test_cte_passes() {
        assert_eq!(
            lexical_screen("WITH x AS (SELECT 1) SELECT * FROM x"),
            ValidationVerdict::Valid
        );
    }

    #[test]
    fn test_leading_whitespace_and_case_ignored() {
        assert_eq!(lexical_screen("   \n\tSeLeCt 1"), ValidationVerdict::Valid);
        assert!(rejected("  DELETE FROM orders").contains("must begin with SELECT or WITH"));
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(rejected("").contains("must not be empty"));
        assert!(rejected("   \n ").contains("must not be empty"));
    }

    #[test]
    fn test_non_read_statements_rejected() {
        for query in [
            "INSERT INTO users (name) VALUES ('x')",
            "UPDATE users SET name = 'x'",
            "DROP TABLE users",
            "EXPLAIN SELECT 1",
            "SHOW TABLES",
            "-- note\nSELECT 1",
        ] {
            assert!(rejected(query).contains("must begin with SELECT or WITH"), "{query}");
        }
    }

    #[test]
    fn test_forbidden_keyword_inside_select_rejected() {
        let reason = rejected("SELECT 1; DROP TABLE users");
        assert!(reason.contains("'drop'"));

        let reason = rejected("WITH gone AS (DELETE FROM orders RETURNING *) SELECT * FROM gone");
        assert!(reason.contains("'delete'"));
    }

    #[test]
    fn test_identifier_substring_is_a_known_false_positive() {
        let reason = rejected("select update_time from orders");
        assert!(reason.contains("'update'"));

        let reason = rejected("select created_at from orders");
        assert!(reason.contains("'create'"));
    }

    // Full check against the stub engine

    fn validator() -> QueryValidator<StubEngine> {
        QueryValidator::new(Arc::new(
            ConnectionPool::new(StubEngine::default(), PoolOptions::default()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_dry_run_sees_the_query_as_written() {
        let validator = validator();
        let query = "  WITH Recent AS (SELECT Name FROM Users) SELECT * FROM Recent  ";
        assert_eq!(validator.check(query).await, ValidationVerdict::Valid);

        let seen = validator.pool.engine().state.last_explain.lock().unwrap().clone();
        assert_eq!(seen.as_deref(), Some(query));
    }

    #[tokio::test]
    async fn test_check_valid_query() {
        let validator = validator();
        assert_eq!(validator.check("SELECT * FROM users").await, ValidationVerdict::Valid);
    }

    #[tokio::test]
    async fn test_lexical_rejection_never_touches_the_pool() {
        let validator = validator();
        let verdict = validator.check("DELETE FROM users").await;
        assert!(!verdict.is_valid());
        assert_eq!(validator.pool.engine().state.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_error_becomes_rejection() {
        let validator = validator();
        let verdict = validator.check("SELECT * FROM ghost_table").await;
        assert_eq!(
            verdict,
            ValidationVerdict::Rejected(
                "SQL parse/plan failed: relation \"ghost_table\" does not exist".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_rejection() {
        let validator = validator();
        validator.pool.engine().state.fail_connect.store(true, Ordering::SeqCst);
        let verdict = validator.check("SELECT 1").await;
        assert!(
            matches!(verdict, ValidationVerdict::Rejected(ref r) if r.contains("stub refused"))
        );
        assert_eq!(validator.pool.available(), validator.pool.options().max_size);
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let validator = validator();
        for query in ["SELECT 1", "SELECT * FROM ghost_table", "select update_time from t"] {
            let first = validator.check(query).await;
            let second = validator.check(query).await;
            assert_eq!(first, second, "{query}");
        }
    }

    #[tokio::test]
    async fn test_check_releases_connection() {
        let validator = validator();
        let before = validator.pool.available();
        let _ = validator.check("SELECT * FROM ghost_table").await;
        let _ = validator.check("SELECT 1").await;
        assert_eq!(validator.pool.available(), before);
    }
}
