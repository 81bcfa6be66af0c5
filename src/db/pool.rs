//! Connection pool management.
//!
//! [`ConnectionFactory`] builds one pooled [`ConnectionHandle`] per process from
//! the resolved configuration and hands out the cached handle while its pool is
//! open. Pools are backend-specific (`PgPool`, `SqlitePool`) to keep full type
//! support; the SQLite variant exists for local fixtures and offline copies.

use crate::config::{ConnectStrategy, ConnectionSettings, KeepaliveSettings};
use crate::db::address::AddressResolver;
use crate::db::credentials::CredentialResolver;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionDescriptor, DatabaseType};
use serde::Serialize;
use sqlx::{PgPool, SqlitePool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        match self {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }

    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::SQLite(pool) => pool.num_idle(),
        }
    }

    /// Round-trip a trivial statement through the pool.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match self {
            DbPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            DbPool::SQLite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        }
    }
}

/// Snapshot of pool state returned by [`ConnectionHandle::health`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub backend: DatabaseType,
    /// Masked connection URL, when the handle was built from a descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub size: u32,
    pub idle: usize,
    pub closed: bool,
    pub reachable: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A live connection pool plus the descriptor it was built from.
///
/// Shared as `Arc<ConnectionHandle>`; the heartbeat task (if any) stops when
/// the last reference is dropped.
#[derive(Debug)]
pub struct ConnectionHandle {
    pool: DbPool,
    descriptor: Option<ConnectionDescriptor>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Wrap a pool, starting the keepalive heartbeat when settings are given.
    ///
    /// Must be called inside a tokio runtime when `keepalive` is set.
    pub fn new(
        pool: DbPool,
        descriptor: Option<ConnectionDescriptor>,
        keepalive: Option<KeepaliveSettings>,
    ) -> Self {
        let heartbeat =
            keepalive.map(|settings| tokio::spawn(heartbeat_task(pool.clone(), settings)));
        Self {
            pool,
            descriptor,
            heartbeat,
        }
    }

    /// Handle around an existing pool, without descriptor or heartbeat.
    pub fn from_pool(pool: DbPool) -> Self {
        Self::new(pool, None, None)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the heartbeat and close every pooled connection.
    pub async fn close(&self) {
        if let Some(handle) = &self.heartbeat {
            handle.abort();
        }
        self.pool.close().await;
    }

    /// Ping the pool and report its state.
    pub async fn health(&self) -> PoolHealth {
        let started = Instant::now();
        let ping = if self.pool.is_closed() {
            Err(sqlx::Error::PoolClosed)
        } else {
            self.pool.ping().await
        };
        PoolHealth {
            backend: self.pool.db_type(),
            target: self.descriptor.as_ref().map(ConnectionDescriptor::masked_url),
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            closed: self.pool.is_closed(),
            reachable: ping.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            error: ping.err().map(|e| e.to_string()),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

/// Ping the pool every `interval` once it has been up for `idle`.
///
/// sqlx has no socket-level keepalive; this stands in for it and keeps the
/// pool's idle connections exercised so dead peers surface early.
async fn heartbeat_task(pool: DbPool, settings: KeepaliveSettings) {
    let start = tokio::time::Instant::now() + settings.idle;
    let mut ticker = tokio::time::interval_at(start, settings.interval.max(Duration::from_millis(1)));
    let mut failures: u32 = 0;

    loop {
        ticker.tick().await;
        if pool.is_closed() {
            debug!("Pool closed, stopping keepalive heartbeat");
            break;
        }
        match pool.ping().await {
            Ok(()) => {
                if failures >= settings.probes {
                    info!(failures = failures, "Database reachable again");
                }
                failures = 0;
            }
            Err(e) => {
                failures += 1;
                if failures == settings.probes {
                    warn!(
                        failures = failures,
                        error = %e,
                        "Keepalive probes failed, connection considered dead"
                    );
                } else {
                    debug!(failures = failures, error = %e, "Keepalive probe failed");
                }
            }
        }
    }
}

/// Builds and caches the process-wide connection handle.
#[derive(Debug)]
pub struct ConnectionFactory {
    settings: ConnectionSettings,
    credentials: CredentialResolver,
    addresses: AddressResolver,
    current: Mutex<Option<Arc<ConnectionHandle>>>,
}

impl ConnectionFactory {
    pub fn new(
        settings: ConnectionSettings,
        credentials: CredentialResolver,
        addresses: AddressResolver,
    ) -> Self {
        Self {
            settings,
            credentials,
            addresses,
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Return the cached handle, building it first if there is none or its
    /// pool has been closed.
    ///
    /// Concurrent first calls wait on the same build.
    pub async fn get_handle(&self) -> DbResult<Arc<ConnectionHandle>> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            if !handle.is_closed() {
                return Ok(Arc::clone(handle));
            }
            debug!("Cached connection pool is closed, rebuilding");
        }

        let handle = Arc::new(self.build().await?);
        *current = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Close and drop the cached handle; the next call to
    /// [`get_handle`](Self::get_handle) rebuilds it.
    pub async fn invalidate(&self) {
        let previous = self.current.lock().await.take();
        if let Some(handle) = previous {
            info!("Invalidating cached connection handle");
            handle.close().await;
        }
    }

    /// Install a pre-built handle, replacing any cached one.
    pub async fn seed(&self, handle: ConnectionHandle) -> Arc<ConnectionHandle> {
        let handle = Arc::new(handle);
        let previous = self.current.lock().await.replace(Arc::clone(&handle));
        if let Some(previous) = previous {
            previous.close().await;
        }
        handle
    }

    /// Resolve configuration and host into a connection descriptor.
    pub async fn build_descriptor(&self) -> DbResult<ConnectionDescriptor> {
        let config = self.credentials.resolve()?;
        let host = self
            .addresses
            .resolve_host(&config.endpoint_url, self.settings.force_ipv4)
            .await?;
        Ok(ConnectionDescriptor::new(&host, &config))
    }

    async fn build(&self) -> DbResult<ConnectionHandle> {
        let pool_opts = &self.settings.pool_options;
        pool_opts.validate().map_err(DbError::malformed_config)?;

        let descriptor = self.build_descriptor().await?;
        let connect_timeout = self.settings.connect_timeout;

        info!(
            target_url = %descriptor.masked_url(),
            strategy = ?self.settings.strategy,
            keepalive = self.settings.keepalive.is_some(),
            "Building connection pool"
        );

        let options = PgPoolOptions::new()
            .min_connections(pool_opts.min_connections_or_default())
            .max_connections(pool_opts.max_connections_or_default())
            .acquire_timeout(connect_timeout)
            .idle_timeout(Some(self.settings.effective_idle_timeout()))
            .test_before_acquire(pool_opts.test_before_acquire_or_default());
        let connect_options = descriptor.connect_options();

        let pool = match self.settings.strategy {
            ConnectStrategy::Eager => {
                timeout(connect_timeout, options.connect_with(connect_options))
                    .await
                    .map_err(|_| DbError::timeout("connect", connect_timeout))?
                    .map_err(|e| {
                        DbError::connection(
                            format!("Failed to connect to {}: {}", descriptor.masked_url(), e),
                            connection_suggestion(&e),
                        )
                    })?
            }
            ConnectStrategy::Lazy => options.connect_lazy_with(connect_options),
        };

        info!(host = %descriptor.host, "Connection pool ready");
        Ok(ConnectionHandle::new(
            DbPool::Postgres(pool),
            Some(descriptor),
            self.settings.keepalive,
        ))
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the database server is running and accessible".to_string();
    }

    if error_str.contains("network is unreachable") || error_str.contains("no route") {
        return "The host may only be reachable over IPv4; retry with --force-ipv4".to_string();
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the database password".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or build with a TLS feature enabled".to_string();
    }

    "Verify the endpoint URL and that the database accepts connections".to_string()
}
