//! Query execution engine.
//!
//! [`QueryExecutor::execute`] runs one statement through the process-wide
//! connection handle:
//! - reads (`SELECT`, `WITH`, `SHOW`, `EXPLAIN`, `VALUES`, `TABLE`) return every
//!   row as an order-preserving map
//! - everything else runs in a transaction that is committed, returning the
//!   affected-row count
//!
//! Faults never propagate: each one produces exactly one error notice and a
//! [`QueryResult::NoResult`].
//!
//! # Architecture
//!
//! Backend-specific submodules (`postgres`, `sqlite`) check a connection out of
//! the pool for the duration of one statement. Their structure is parallel so
//! differences stand out.

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::db::pool::{ConnectionFactory, DbPool};
use crate::db::statement::{PreparedSql, classify, prepare};
use crate::db::types::{RowToJson, duplicate_columns};
use crate::error::{DbError, DbResult};
use crate::models::{NamedParams, QueryParam, QueryResult, RowMap, StatementKind};
use crate::notice::{Notice, SharedNotices};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Executes SQL against the handle provided by a [`ConnectionFactory`].
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    factory: Arc<ConnectionFactory>,
    notices: SharedNotices,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(factory: Arc<ConnectionFactory>, notices: SharedNotices) -> Self {
        Self {
            factory,
            notices,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Bound every statement by `query_timeout`.
    pub fn with_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn factory(&self) -> &Arc<ConnectionFactory> {
        &self.factory
    }

    pub fn notices(&self) -> &SharedNotices {
        &self.notices
    }

    /// Run one statement with `:name` parameters.
    ///
    /// On failure the reason goes to the notice channel and
    /// [`QueryResult::NoResult`] is returned.
    pub async fn execute(&self, sql: &str, params: &NamedParams) -> QueryResult {
        match self.try_execute(sql, params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Statement failed");
                self.notices.notify(Notice::error(e.notice_message()));
                QueryResult::NoResult
            }
        }
    }

    fn report_duplicates(&self, duplicates: &[String]) {
        if duplicates.is_empty() {
            return;
        }
        let names = duplicates.join(", ");
        warn!(columns = %names, "Duplicate column names in result");
        self.notices.notify(Notice::warning(format!(
            "Duplicate column names ({}): only the last value of each is shown; alias the columns to keep all of them",
            names
        )));
    }

    /// Like [`execute`](Self::execute), but hands the error back instead of
    /// reporting it.
    pub async fn try_execute(&self, sql: &str, params: &NamedParams) -> DbResult<QueryResult> {
        let handle = self.factory.get_handle().await?;
        let kind = classify(sql, handle.db_type());
        let prepared = prepare(sql);
        let values = prepared.ordered(params)?;

        debug!(
            sql = %prepared.sql,
            kind = ?kind,
            params = values.len(),
            timeout_secs = self.query_timeout.as_secs(),
            "Executing statement"
        );

        let start = Instant::now();
        let result = match (handle.pool(), kind) {
            (DbPool::Postgres(p), StatementKind::Read) => {
                let (rows, duplicates) =
                    postgres::fetch_rows(p, &prepared, &values, self.query_timeout).await?;
                self.report_duplicates(&duplicates);
                QueryResult::Rows(rows)
            }
            (DbPool::Postgres(p), StatementKind::Write) => QueryResult::Affected(
                postgres::execute_write(p, &prepared, &values, self.query_timeout).await?,
            ),
            (DbPool::SQLite(p), StatementKind::Read) => {
                let (rows, duplicates) =
                    sqlite::fetch_rows(p, &prepared, &values, self.query_timeout).await?;
                self.report_duplicates(&duplicates);
                QueryResult::Rows(rows)
            }
            (DbPool::SQLite(p), StatementKind::Write) => QueryResult::Affected(
                sqlite::execute_write(p, &prepared, &values, self.query_timeout).await?,
            ),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            QueryResult::Rows(rows) => {
                debug!(rows = rows.len(), elapsed_ms = elapsed_ms, "Read finished")
            }
            QueryResult::Affected(count) => {
                info!(rows_affected = count, elapsed_ms = elapsed_ms, "Write committed")
            }
            QueryResult::NoResult => {}
        }
        Ok(result)
    }
}

/// Rows plus the column names that collided while building them.
type Fetched = (Vec<RowMap>, Vec<String>);

fn finish<T>(
    outcome: Result<Result<T, sqlx::Error>, tokio::time::error::Elapsed>,
    operation: &str,
    query_timeout: Duration,
    acquire_timeout: Duration,
) -> DbResult<T> {
    match outcome {
        Ok(Err(sqlx::Error::PoolTimedOut)) => Err(DbError::timeout(
            "connection pool acquire",
            acquire_timeout,
        )),
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(DbError::timeout(operation, query_timeout)),
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Statements without parameters go through the raw executor so that multiple
// statements and utility commands work; with parameters they are prepared.

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::{Executor, PgPool};

    pub async fn fetch_rows(
        pool: &PgPool,
        prepared: &PreparedSql,
        params: &[&QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Fetched> {
        let work = async {
            let mut conn = pool.acquire().await?;
            let rows = if prepared.has_params() {
                let mut query = sqlx::query(&prepared.sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.fetch_all(&mut *conn).await?
            } else {
                (&mut *conn).fetch_all(prepared.sql.as_str()).await?
            };
            let maps: Vec<RowMap> = rows.iter().map(RowToJson::to_json_map).collect();
            let duplicates = rows.first().map(|row| duplicate_columns(row)).unwrap_or_default();
            Ok::<_, sqlx::Error>((maps, duplicates))
        };
        finish(
            timeout(query_timeout, work).await,
            "query execution",
            query_timeout,
            pool.options().get_acquire_timeout(),
        )
    }

    pub async fn execute_write(
        pool: &PgPool,
        prepared: &PreparedSql,
        params: &[&QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let work = async {
            let mut tx = pool.begin().await?;
            let result = if prepared.has_params() {
                let mut query = sqlx::query(&prepared.sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.execute(&mut *tx).await?
            } else {
                (&mut *tx).execute(prepared.sql.as_str()).await?
            };
            tx.commit().await?;
            Ok::<_, sqlx::Error>(result.rows_affected())
        };
        finish(
            timeout(query_timeout, work).await,
            "write operation",
            query_timeout,
            pool.options().get_acquire_timeout(),
        )
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::{Executor, SqlitePool};

    pub async fn fetch_rows(
        pool: &SqlitePool,
        prepared: &PreparedSql,
        params: &[&QueryParam],
        query_timeout: Duration,
    ) -> DbResult<Fetched> {
        let work = async {
            let mut conn = pool.acquire().await?;
            let rows = if prepared.has_params() {
                let mut query = sqlx::query(&prepared.sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.fetch_all(&mut *conn).await?
            } else {
                (&mut *conn).fetch_all(prepared.sql.as_str()).await?
            };
            let maps: Vec<RowMap> = rows.iter().map(RowToJson::to_json_map).collect();
            let duplicates = rows.first().map(|row| duplicate_columns(row)).unwrap_or_default();
            Ok::<_, sqlx::Error>((maps, duplicates))
        };
        finish(
            timeout(query_timeout, work).await,
            "query execution",
            query_timeout,
            pool.options().get_acquire_timeout(),
        )
    }

    pub async fn execute_write(
        pool: &SqlitePool,
        prepared: &PreparedSql,
        params: &[&QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let work = async {
            let mut tx = pool.begin().await?;
            let result = if prepared.has_params() {
                let mut query = sqlx::query(&prepared.sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.execute(&mut *tx).await?
            } else {
                (&mut *tx).execute(prepared.sql.as_str()).await?
            };
            tx.commit().await?;
            Ok::<_, sqlx::Error>(result.rows_affected())
        };
        finish(
            timeout(query_timeout, work).await,
            "write operation",
            query_timeout,
            pool.options().get_acquire_timeout(),
        )
    }
}
