//! Binding named-parameter values to prepared statements.
//!
//! Values are bound in placeholder order, as produced by
//! [`crate::db::statement::PreparedSql::ordered`]. Strings are declared as
//! `text`; write `CAST(:name AS <type>)` (or `:name::<type>`) to feed them into
//! typed columns. NULL carries no declared type, so Postgres takes the type
//! from the surrounding expression.

use crate::models::QueryParam;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Postgres, Sqlite, Type};

/// Parameter type OID meaning "let the server infer it".
const UNSPECIFIED_OID: Oid = Oid(0);

/// A NULL whose type the server infers from context.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(UNSPECIFIED_OID)
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(UntypedNull),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// SQLite is dynamically typed; JSON travels as its text form.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::TypeInfo;

    #[test]
    fn test_untyped_null_declares_no_type() {
        let info = <UntypedNull as Type<Postgres>>::type_info();
        assert_eq!(info, PgTypeInfo::with_oid(Oid(0)));
        assert_ne!(info.name(), "TEXT");
    }

    #[test]
    fn test_untyped_null_encodes_as_null() {
        let mut buf = PgArgumentBuffer::default();
        let is_null = UntypedNull.encode_by_ref(&mut buf).unwrap();
        assert!(is_null.is_null());
    }
}
