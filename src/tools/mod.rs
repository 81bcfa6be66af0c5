//! Higher-level helpers built on the executor.
//!
//! - `tables`: select/insert/update/delete by table name
//! - `format`: render result sets as tables, JSON or Markdown

pub mod format;
pub mod tables;

pub use format::format_result;
pub use tables::{ColumnValues, TableGateway};
