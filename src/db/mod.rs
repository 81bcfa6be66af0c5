//! Database access layer.
//!
//! This module provides:
//! - Connection parameter resolution (secrets file, environment)
//! - Database host derivation with optional IPv4 pinning
//! - The cached connection pool and its factory
//! - Statement classification and named-parameter rewriting
//! - Query execution with inline error notices
//! - Row to JSON type mappings

pub mod address;
pub mod credentials;
pub mod executor;
pub mod params;
pub mod pool;
pub mod statement;
pub mod types;

pub use address::{AddressResolver, HostLookup, SystemLookup};
pub use credentials::{
    CredentialResolver, EnvSource, SecretSource, SecretValues, SecretsFile, StaticSecrets,
};
pub use executor::QueryExecutor;
pub use pool::{ConnectionFactory, ConnectionHandle, DbPool, PoolHealth};
pub use statement::{PreparedSql, classify, prepare};
