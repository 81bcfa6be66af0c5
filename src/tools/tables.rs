//! Table-level data helpers.
//!
//! Select, insert, update and delete by table name, built on
//! [`QueryExecutor`]. Table and column names are validated and double-quoted;
//! values always travel as bound parameters (`:v_<column>` for values,
//! `:f_<column>` for equality filters).
//!
//! String parameters are declared as `text`, which Postgres will not assign to
//! or compare with `uuid`, `date` and other typed columns. On Postgres the
//! gateway reads the column types from the catalog first and wraps string
//! values in `CAST(.. AS <type>)`.
//!
//! Like the executor, these helpers never fail outright: validation problems
//! become one error notice and [`QueryResult::NoResult`], and successful
//! writes are confirmed with a success notice.

use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, NamedParams, QueryParam, QueryResult};
use crate::notice::Notice;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Column name to value.
pub type ColumnValues = BTreeMap<String, QueryParam>;

/// Column name to SQL type name, without length or precision modifiers.
pub type ColumnTypes = HashMap<String, String>;

const COLUMN_TYPES_SQL: &str = "SELECT a.attname::text AS column_name, \
     format_type(a.atttypid, NULL) AS column_type \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = to_regclass(:table) AND a.attnum > 0 AND NOT a.attisdropped";

/// Check a table name and return it double-quoted.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified as
/// `schema.table`.
pub fn quote_ident(name: &str) -> DbResult<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|part| is_valid_ident(part)) {
        return Err(DbError::invalid_input(format!(
            "'{}' is not a valid identifier",
            name
        )));
    }
    Ok(parts
        .iter()
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Check a column name and return it double-quoted. Column names are never
/// qualified; they also become part of parameter names.
pub fn quote_column(name: &str) -> DbResult<String> {
    if !is_valid_ident(name) {
        return Err(DbError::invalid_input(format!(
            "'{}' is not a valid column name",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

/// Placeholder for one value, cast to the column type when it is a string.
fn placeholder(column: &str, name: &str, value: &QueryParam, types: &ColumnTypes) -> String {
    match (value, types.get(column)) {
        (QueryParam::String(_), Some(sql_type)) => format!("CAST(:{} AS {})", name, sql_type),
        _ => format!(":{}", name),
    }
}

fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `WHERE` clause for equality filters; NULL filters become `IS NULL`.
fn where_clause(
    filters: &ColumnValues,
    types: &ColumnTypes,
    params: &mut NamedParams,
) -> DbResult<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut conditions = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        let quoted = quote_column(column)?;
        if value.is_null() {
            conditions.push(format!("{} IS NULL", quoted));
        } else {
            let name = format!("f_{}", column);
            conditions.push(format!(
                "{} = {}",
                quoted,
                placeholder(column, &name, value, types)
            ));
            params.insert(name, value.clone());
        }
    }
    Ok(format!(" WHERE {}", conditions.join(" AND ")))
}

/// `SELECT` statement with an optional row limit.
pub fn build_select(
    table: &str,
    columns: &[&str],
    filters: &ColumnValues,
    types: &ColumnTypes,
    limit: Option<u32>,
) -> DbResult<(String, NamedParams)> {
    let table = quote_ident(table)?;
    let select_list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|column| quote_column(column))
            .collect::<DbResult<Vec<_>>>()?
            .join(", ")
    };

    let mut params = NamedParams::new();
    let mut sql = format!("SELECT {} FROM {}", select_list, table);
    sql.push_str(&where_clause(filters, types, &mut params)?);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok((sql, params))
}

pub fn build_insert(
    table: &str,
    values: &ColumnValues,
    types: &ColumnTypes,
) -> DbResult<(String, NamedParams)> {
    let table = quote_ident(table)?;
    if values.is_empty() {
        return Err(DbError::invalid_input(format!(
            "insert into {} needs at least one value",
            table
        )));
    }

    let mut params = NamedParams::new();
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(quote_column(column)?);
        let name = format!("v_{}", column);
        placeholders.push(placeholder(column, &name, value, types));
        params.insert(name, value.clone());
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok((sql, params))
}

pub fn build_update(
    table: &str,
    values: &ColumnValues,
    filters: &ColumnValues,
    types: &ColumnTypes,
) -> DbResult<(String, NamedParams)> {
    let table = quote_ident(table)?;
    if values.is_empty() {
        return Err(DbError::invalid_input(format!(
            "update of {} needs at least one value",
            table
        )));
    }
    if filters.is_empty() {
        return Err(DbError::invalid_input(format!(
            "update of {} needs at least one filter",
            table
        )));
    }

    let mut params = NamedParams::new();
    let mut assignments = Vec::with_capacity(values.len());
    for (column, value) in values {
        let name = format!("v_{}", column);
        assignments.push(format!(
            "{} = {}",
            quote_column(column)?,
            placeholder(column, &name, value, types)
        ));
        params.insert(name, value.clone());
    }

    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    sql.push_str(&where_clause(filters, types, &mut params)?);
    Ok((sql, params))
}

pub fn build_delete(
    table: &str,
    filters: &ColumnValues,
    types: &ColumnTypes,
) -> DbResult<(String, NamedParams)> {
    let table = quote_ident(table)?;
    if filters.is_empty() {
        return Err(DbError::invalid_input(format!(
            "delete from {} needs at least one filter",
            table
        )));
    }

    let mut params = NamedParams::new();
    let mut sql = format!("DELETE FROM {}", table);
    sql.push_str(&where_clause(filters, types, &mut params)?);
    Ok((sql, params))
}

/// CRUD helpers over a [`QueryExecutor`].
#[derive(Debug, Clone)]
pub struct TableGateway {
    executor: QueryExecutor,
}

impl TableGateway {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Rows matching every filter; all columns when `columns` is empty.
    pub async fn select(
        &self,
        table: &str,
        columns: &[&str],
        filters: &ColumnValues,
    ) -> QueryResult {
        let statement = self
            .column_types(table, &[filters])
            .await
            .and_then(|types| build_select(table, columns, filters, &types, None));
        self.run(statement, None).await
    }

    /// First `limit` rows of a table.
    pub async fn preview(&self, table: &str, limit: u32) -> QueryResult {
        let statement = build_select(
            table,
            &[],
            &ColumnValues::new(),
            &ColumnTypes::new(),
            Some(limit),
        );
        self.run(statement, None).await
    }

    pub async fn insert(&self, table: &str, values: &ColumnValues) -> QueryResult {
        let statement = self
            .column_types(table, &[values])
            .await
            .and_then(|types| build_insert(table, values, &types));
        self.run(statement, Some((WriteKind::Insert, table))).await
    }

    pub async fn update(
        &self,
        table: &str,
        values: &ColumnValues,
        filters: &ColumnValues,
    ) -> QueryResult {
        let statement = self
            .column_types(table, &[values, filters])
            .await
            .and_then(|types| build_update(table, values, filters, &types));
        self.run(statement, Some((WriteKind::Update, table))).await
    }

    pub async fn delete(&self, table: &str, filters: &ColumnValues) -> QueryResult {
        let statement = self
            .column_types(table, &[filters])
            .await
            .and_then(|types| build_delete(table, filters, &types));
        self.run(statement, Some((WriteKind::Delete, table))).await
    }

    /// Column types of `table`, looked up only on Postgres and only when a
    /// string value needs a cast.
    async fn column_types(&self, table: &str, inputs: &[&ColumnValues]) -> DbResult<ColumnTypes> {
        let quoted = quote_ident(table)?;
        let has_strings = inputs
            .iter()
            .flat_map(|values| values.values())
            .any(|value| matches!(value, QueryParam::String(_)));
        if !has_strings {
            return Ok(ColumnTypes::new());
        }

        let handle = self.executor.factory().get_handle().await?;
        if handle.db_type() != DatabaseType::PostgreSQL {
            return Ok(ColumnTypes::new());
        }

        let params: NamedParams = [("table".to_string(), QueryParam::String(quoted))]
            .into_iter()
            .collect();
        let rows = self
            .executor
            .try_execute(COLUMN_TYPES_SQL, &params)
            .await?
            .into_rows()
            .unwrap_or_default();

        let types: ColumnTypes = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?;
                let sql_type = row.get("column_type")?.as_str()?;
                Some((name.to_string(), sql_type.to_string()))
            })
            .collect();
        debug!(table = table, columns = types.len(), "Loaded column types");
        Ok(types)
    }

    /// Execute a built statement, confirming writes with a success notice.
    async fn run(
        &self,
        statement: DbResult<(String, NamedParams)>,
        write: Option<(WriteKind, &str)>,
    ) -> QueryResult {
        let (sql, params) = match statement {
            Ok(statement) => statement,
            Err(e) => {
                warn!(error = %e, "Rejected table operation");
                self.executor
                    .notices()
                    .notify(Notice::error(e.notice_message()));
                return QueryResult::NoResult;
            }
        };

        let result = self.executor.execute(&sql, &params).await;
        if let (Some((kind, table)), QueryResult::Affected(count)) = (write, &result) {
            self.executor
                .notices()
                .notify(Notice::success(kind.message(table, *count)));
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    fn message(self, table: &str, count: u64) -> String {
        let rows = if count == 1 { "row" } else { "rows" };
        match self {
            Self::Insert => format!("Inserted {} {} into {}", count, rows, table),
            Self::Update => format!("Updated {} {} in {}", count, rows, table),
            Self::Delete => format!("Deleted {} {} from {}", count, rows, table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, QueryParam)]) -> ColumnValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("companies").unwrap(), "\"companies\"");
        assert_eq!(quote_ident("_tmp1").unwrap(), "\"_tmp1\"");
        assert_eq!(quote_ident("public.farms").unwrap(), "\"public\".\"farms\"");
        for bad in ["", "1abc", "farms; DROP TABLE x", "a\"b", "a.b.c", "naïve", "a-b"] {
            assert!(quote_ident(bad).is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_build_select() {
        let (sql, params) = build_select(
            "companies",
            &["id", "name"],
            &values(&[("id", QueryParam::Int(3))]),
            &ColumnTypes::new(),
            None,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"companies\" WHERE \"id\" = :f_id"
        );
        assert_eq!(params.get("f_id"), Some(&QueryParam::Int(3)));

        let (sql, params) = build_select("farms", &[], &ColumnValues::new(), &ColumnTypes::new(), Some(5)).unwrap();
        assert_eq!(sql, "SELECT * FROM \"farms\" LIMIT 5");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_select_null_filter() {
        let (sql, params) = build_select(
            "persons",
            &[],
            &values(&[("company_id", QueryParam::Null)]),
            &ColumnTypes::new(),
            None,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM \"persons\" WHERE \"company_id\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_insert() {
        let (sql, params) = build_insert(
            "companies",
            &values(&[("name", QueryParam::from("Acme")), ("id", QueryParam::Int(9))]),
            &ColumnTypes::new(),
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"companies\" (\"id\", \"name\") VALUES (:v_id, :v_name)"
        );
        assert_eq!(params.len(), 2);
        assert!(build_insert("companies", &ColumnValues::new(), &ColumnTypes::new()).is_err());
    }

    #[test]
    fn test_build_update_uses_distinct_param_names() {
        let (sql, params) = build_update(
            "companies",
            &values(&[("id", QueryParam::Int(2))]),
            &values(&[("id", QueryParam::Int(1))]),
            &ColumnTypes::new(),
        )
        .unwrap();
        assert_eq!(sql, "UPDATE \"companies\" SET \"id\" = :v_id WHERE \"id\" = :f_id");
        assert_eq!(params.get("v_id"), Some(&QueryParam::Int(2)));
        assert_eq!(params.get("f_id"), Some(&QueryParam::Int(1)));
    }

    #[test]
    fn test_update_and_delete_require_filters() {
        let set = values(&[("name", QueryParam::from("x"))]);
        let err = build_update("companies", &set, &ColumnValues::new(), &ColumnTypes::new()).unwrap_err();
        assert!(err.to_string().contains("filter"));
        assert!(build_delete("companies", &ColumnValues::new(), &ColumnTypes::new()).is_err());
    }

    #[test]
    fn test_write_messages() {
        assert_eq!(
            WriteKind::Insert.message("companies", 1),
            "Inserted 1 row into companies"
        );
        assert_eq!(
            WriteKind::Delete.message("farms", 3),
            "Deleted 3 rows from farms"
        );
    }

    #[test]
    fn test_build_delete() {
        let (sql, _) = build_delete("farms", &values(&[("id", QueryParam::Int(4))]), &ColumnTypes::new()).unwrap();
        assert_eq!(sql, "DELETE FROM \"farms\" WHERE \"id\" = :f_id");
    }

    #[test]
    fn test_invalid_column_rejected() {
        let none = ColumnTypes::new();
        assert!(build_select("farms", &["name; --"], &ColumnValues::new(), &none, None).is_err());
        assert!(build_insert("farms", &values(&[("bad col", QueryParam::Int(1))]), &none).is_err());
    }

    #[test]
    fn test_qualified_column_rejected() {
        let none = ColumnTypes::new();
        assert!(quote_column("public.name").is_err());
        let err = build_select(
            "public.farms",
            &[],
            &values(&[("farms.id", QueryParam::Int(1))]),
            &none,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a valid column name"));
        assert!(build_select("farms", &["farms.name"], &ColumnValues::new(), &none, None).is_err());
    }

    #[test]
    fn test_string_values_cast_to_column_type() {
        let types: ColumnTypes = [
            ("uuid".to_string(), "uuid".to_string()),
            ("built".to_string(), "date".to_string()),
            ("turbines".to_string(), "integer".to_string()),
        ]
        .into_iter()
        .collect();

        let (sql, _) = build_select(
            "farms",
            &[],
            &values(&[("uuid", QueryParam::from("6f1c2a9e-0000-4000-8000-000000000001"))]),
            &types,
            None,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM \"farms\" WHERE \"uuid\" = CAST(:f_uuid AS uuid)");

        let (sql, _) = build_insert(
            "farms",
            &values(&[
                ("built", QueryParam::from("2021-02-03")),
                ("turbines", QueryParam::Int(4)),
            ]),
            &types,
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"farms\" (\"built\", \"turbines\") VALUES (CAST(:v_built AS date), :v_turbines)"
        );

        // NULL is bound untyped and needs no cast
        let (sql, _) = build_update(
            "farms",
            &values(&[("built", QueryParam::Null)]),
            &values(&[("uuid", QueryParam::from("6f1c2a9e-0000-4000-8000-000000000001"))]),
            &types,
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"farms\" SET \"built\" = :v_built WHERE \"uuid\" = CAST(:f_uuid AS uuid)"
        );
    }
}
