//! WindManager database layer.
//!
//! Resolves connection parameters for the hosted PostgreSQL backend, keeps one
//! pooled connection handle per process, and executes SQL with named
//! parameters. Execution faults are reported on an inline notice channel
//! instead of being raised, so a dashboard page keeps rendering.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notice;
pub mod tools;

pub use config::Config;
pub use db::{ConnectionFactory, QueryExecutor};
pub use error::{DbError, DbResult};
pub use models::{NamedParams, QueryParam, QueryResult};
pub use notice::{Notice, NoticeLevel, NoticeLog, NoticeSink, SharedNotices};
