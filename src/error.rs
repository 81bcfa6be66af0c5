//! Error types for the WindManager database layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Configuration and parsing faults are fatal to the calling flow; execution faults
//! are absorbed by the query executor and reported as notices instead.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration missing: {}", missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("Malformed configuration: {message}")]
    MalformedConfig { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error listing every missing key.
    pub fn configuration<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Configuration {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a malformed configuration error.
    pub fn malformed_config(message: impl Into<String>) -> Self {
        Self::MalformedConfig {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Configuration { .. } => {
                Some("Set the values in the secrets file or as environment variables")
            }
            _ => None,
        }
    }

    /// Configuration and parsing faults mean the layer cannot function at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::MalformedConfig { .. }
        )
    }

    /// Human-readable message for the inline notice channel.
    pub fn notice_message(&self) -> String {
        match self {
            Self::Database {
                message,
                sql_state: Some(code),
                ..
            } => format!("Database error: {} (SQLSTATE: {})", message, code),
            _ => self.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the endpoint URL and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // The acquire limit is not carried by the error; callers that know
            // the pool map this case themselves.
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Check network connectivity and database server status",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::database(format!("Column not found: {}", col), None, "Check column names")
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_configuration_error_lists_missing_keys() {
        let err = DbError::configuration(["SUPABASE_URL", "SUPABASE_DB_PASSWORD"]);
        let msg = err.to_string();
        assert!(msg.contains("SUPABASE_URL"));
        assert!(msg.contains("SUPABASE_DB_PASSWORD"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        assert!(DbError::malformed_config("no host").is_fatal());
        assert!(!DbError::timeout("query", Duration::from_secs(30)).is_fatal());
        assert!(!DbError::connection("err", "sugg").is_fatal());
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::internal("boom").suggestion(), None);
    }

    #[test]
    fn test_notice_message_includes_sql_state() {
        let err = DbError::database("syntax error", Some("42601".to_string()), "check syntax");
        assert!(err.notice_message().contains("42601"));

        let err = DbError::invalid_input("missing value for parameter :n");
        assert_eq!(
            err.notice_message(),
            "Invalid input: missing value for parameter :n"
        );
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_limits() {
        let err = DbError::timeout("connect", Duration::from_millis(200));
        assert_eq!(err.to_string(), "Timeout: connect exceeded 200ms");
        let err = DbError::timeout("query execution", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Timeout: query execution exceeded 30s");
    }
}
