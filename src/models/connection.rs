//! Connection-related data models.
//!
//! This module defines types for the resolved connection parameters and the
//! descriptor the pool is built from.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use sqlx::postgres::PgConnectOptions;

/// Fixed PostgreSQL port of the hosted backend.
pub const DEFAULT_PORT: u16 = 5432;
/// Fixed database name of the hosted backend.
pub const DEFAULT_DATABASE: &str = "postgres";
/// Fixed role used to connect.
pub const DEFAULT_USERNAME: &str = "postgres";

const APPLICATION_NAME: &str = "windmanager-db";

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Local fixtures and offline copies
    SQLite,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Connection parameters resolved from the configuration sources.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint_url: String,
    /// Contains sensitive data - never log
    pub credential: String,
}

impl ConnectionConfig {
    /// Create a connection configuration; both fields must be non-empty.
    pub fn new(endpoint_url: impl Into<String>, credential: impl Into<String>) -> DbResult<Self> {
        let endpoint_url = endpoint_url.into().trim().to_string();
        let credential = credential.into();

        let mut missing = Vec::new();
        if endpoint_url.is_empty() {
            missing.push("endpoint URL");
        }
        if credential.is_empty() {
            missing.push("credential");
        }
        if !missing.is_empty() {
            return Err(DbError::configuration(missing));
        }

        Ok(Self {
            endpoint_url,
            credential,
        })
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("credential", &"****")
            .finish()
    }
}

/// Database host derived from the endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedHost {
    pub hostname: String,
    pub is_ip_literal: bool,
}

impl ResolvedHost {
    pub fn name(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            is_ip_literal: false,
        }
    }

    pub fn ip(address: std::net::IpAddr) -> Self {
        Self {
            hostname: address.to_string(),
            is_ip_literal: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hostname
    }
}

impl std::fmt::Display for ResolvedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hostname)
    }
}

/// Everything the driver needs to open a connection.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    credential: String,
}

impl ConnectionDescriptor {
    /// Bind the resolved host and credential to the fixed port, database and role.
    pub fn new(host: &ResolvedHost, config: &ConnectionConfig) -> Self {
        Self {
            host: host.hostname.clone(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            credential: config.credential.clone(),
        }
    }

    /// Driver connect options for this descriptor.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.credential)
            .application_name(APPLICATION_NAME)
    }

    /// Display-safe URL (credential masked).
    pub fn masked_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "postgresql://{}:****@{}:{}/{}",
            self.username, host, self.port, self.database
        )
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
