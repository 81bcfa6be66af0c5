//! Data models for windmanager-db.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionDescriptor, DEFAULT_DATABASE, DEFAULT_PORT, DEFAULT_USERNAME,
    DatabaseType, ResolvedHost,
};
pub use query::{NamedParams, QueryParam, QueryResult, RowMap, StatementKind};
