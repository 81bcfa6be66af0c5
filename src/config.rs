//! Configuration handling for windmanager-db.
//!
//! This module provides configuration management via CLI arguments and environment
//! variables. Connection parameters themselves (endpoint URL, credential) are resolved
//! separately by [`crate::db::credentials`]; this module only carries the knobs that
//! shape how the connection is built.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 5;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

// Keepalive defaults, matching the usual libpq tuning for hosted Postgres
pub const DEFAULT_KEEPALIVE_IDLE_SECS: u64 = 30;
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_KEEPALIVE_PROBES: u32 = 5;

/// Tables shown by `preview` when none are named.
pub const DEFAULT_PREVIEW_TABLES: &[&str] = &["companies", "farms", "persons"];
pub const DEFAULT_PREVIEW_LIMIT: u32 = 5;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 5)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
            if let Some(min) = self.min_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Keepalive tuning for long-lived pooled connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Time between probes.
    pub interval: Duration,
    /// Consecutive failed probes before a connection is considered dead.
    pub probes: u32,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(DEFAULT_KEEPALIVE_IDLE_SECS),
            interval: Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            probes: DEFAULT_KEEPALIVE_PROBES,
        }
    }
}

impl KeepaliveSettings {
    /// Longest time a silently dropped connection can go undetected.
    pub fn detection_window(&self) -> Duration {
        self.idle + self.interval * self.probes
    }
}

/// When the pool opens its first connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConnectStrategy {
    /// Connect while building the handle (fail fast).
    #[default]
    Eager,
    /// Defer the first connection to the first checkout.
    Lazy,
}

/// Settings that shape how the connection handle is built.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub force_ipv4: bool,
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub keepalive: Option<KeepaliveSettings>,
    pub strategy: ConnectStrategy,
    pub pool_options: PoolOptions,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            force_ipv4: false,
            resolve_timeout: Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keepalive: None,
            strategy: ConnectStrategy::Eager,
            pool_options: PoolOptions::default(),
        }
    }
}

impl ConnectionSettings {
    /// Idle timeout applied to pooled connections.
    ///
    /// With keepalive enabled the pool retires connections before the keepalive
    /// detection window would have expired.
    pub fn effective_idle_timeout(&self) -> Duration {
        let configured = Duration::from_secs(self.pool_options.idle_timeout_or_default());
        match self.keepalive {
            Some(keepalive) => configured.min(keepalive.detection_window()),
            None => configured,
        }
    }
}

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (like psql)
    #[default]
    Table,
    /// JSON array of row objects
    Json,
    /// Markdown table format
    Markdown,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Test the connection by asking the server who and where we are
    Check,
    /// Show the first rows of the dashboard tables
    Preview {
        /// Tables to preview (default: companies farms persons)
        tables: Vec<String>,
        /// Rows per table
        #[arg(long, default_value_t = DEFAULT_PREVIEW_LIMIT)]
        limit: u32,
    },
    /// Run a single statement with optional named parameters
    Query {
        /// SQL text; use :name for parameters
        sql: String,
        /// Named parameter, repeatable: -p name=value (value parsed as JSON when possible)
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
    /// Report pool statistics and ping the server
    Health,
}

/// Configuration for windmanager-db.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "windmanager-db",
    about = "Browse the WindManager database from the terminal",
    version,
    author
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// TOML secrets file holding SUPABASE_URL and SUPABASE_DB_PASSWORD
    #[arg(long, value_name = "PATH", env = "WNDMNGR_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// Resolve the database host to an IPv4 address before connecting
    #[arg(long, env = "WNDMNGR_FORCE_IPV4")]
    pub force_ipv4: bool,

    /// Name resolution timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_RESOLVE_TIMEOUT_SECS,
        env = "WNDMNGR_RESOLVE_TIMEOUT"
    )]
    pub resolve_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "WNDMNGR_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "WNDMNGR_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Enable keepalive probing of pooled connections
    #[arg(long, env = "WNDMNGR_KEEPALIVE")]
    pub keepalive: bool,

    /// Keepalive idle time in seconds
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_IDLE_SECS)]
    pub keepalive_idle: u64,

    /// Keepalive probe interval in seconds
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_INTERVAL_SECS)]
    pub keepalive_interval: u64,

    /// Keepalive failed probes before giving up
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_PROBES)]
    pub keepalive_probes: u32,

    /// When to open the first pooled connection
    #[arg(long, value_enum, default_value = "eager", env = "WNDMNGR_CONNECT")]
    pub connect: ConnectStrategy,

    /// Maximum connections in the pool
    #[arg(long, env = "WNDMNGR_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Output format for result sets
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "WNDMNGR_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "WNDMNGR_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Build the connection settings described by this configuration.
    pub fn connection_settings(&self) -> Result<ConnectionSettings, String> {
        let pool_options = PoolOptions {
            max_connections: self.max_connections,
            ..PoolOptions::default()
        };
        pool_options.validate()?;

        let keepalive = self.keepalive.then(|| KeepaliveSettings {
            idle: Duration::from_secs(self.keepalive_idle),
            interval: Duration::from_secs(self.keepalive_interval),
            probes: self.keepalive_probes,
        });
        if let Some(keepalive) = keepalive {
            if keepalive.interval.is_zero() || keepalive.probes == 0 {
                return Err("keepalive interval and probes must be greater than 0".to_string());
            }
        }

        Ok(ConnectionSettings {
            force_ipv4: self.force_ipv4,
            resolve_timeout: self.resolve_timeout_duration(),
            connect_timeout: self.connect_timeout_duration(),
            keepalive,
            strategy: self.connect,
            pool_options,
        })
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get the resolution timeout as a Duration.
    pub fn resolve_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout)
    }
}
