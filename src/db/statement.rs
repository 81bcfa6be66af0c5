//! Statement classification and named-parameter rewriting.
//!
//! Statements are classified by their leading keyword, found with the
//! [sqlparser](https://docs.rs/sqlparser/) tokenizer so that comments, whitespace
//! and opening parentheses before the keyword are skipped. Named parameters use
//! the `:name` syntax and are rewritten to positional `$n` placeholders, which
//! both PostgreSQL and SQLite accept.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, NamedParams, QueryParam, StatementKind};
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

/// Leading keywords of statements that return rows.
const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "EXPLAIN", "VALUES", "TABLE"];

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Classify a statement as a read or a write by its leading keyword.
pub fn classify(sql: &str, db_type: DatabaseType) -> StatementKind {
    match leading_keyword(sql, db_type) {
        Some(keyword) if READ_KEYWORDS.contains(&keyword.as_str()) => StatementKind::Read,
        _ => StatementKind::Write,
    }
}

/// First keyword of the statement, upper-cased.
pub fn leading_keyword(sql: &str, db_type: DatabaseType) -> Option<String> {
    let dialect = get_dialect(db_type);
    match Tokenizer::new(dialect.as_ref(), sql).tokenize() {
        Ok(tokens) => {
            let first = tokens
                .into_iter()
                .find(|token| !matches!(token, Token::Whitespace(_) | Token::LParen))?;
            match first {
                Token::Word(word) if word.quote_style.is_none() => {
                    Some(word.value.to_ascii_uppercase())
                }
                _ => None,
            }
        }
        // Unterminated literals and the like; the driver will report the real error.
        Err(_) => sql
            .split_whitespace()
            .next()
            .map(|word| word.trim_start_matches('(').to_ascii_uppercase())
            .filter(|word| !word.is_empty()),
    }
}

/// A statement with named parameters replaced by positional placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSql {
    pub sql: String,
    /// Parameter names in placeholder order; `$1` is `names[0]`.
    pub names: Vec<String>,
}

impl PreparedSql {
    pub fn has_params(&self) -> bool {
        !self.names.is_empty()
    }

    /// Parameter values in placeholder order.
    ///
    /// Every referenced name must have a value; extra values are ignored.
    pub fn ordered<'a>(&self, params: &'a NamedParams) -> DbResult<Vec<&'a QueryParam>> {
        let missing: Vec<&str> = self
            .names
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DbError::invalid_input(format!(
                "missing value for parameter{} :{}",
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", :")
            )));
        }
        Ok(self
            .names
            .iter()
            .filter_map(|name| params.get(name.as_str()))
            .collect())
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Rewrite `:name` parameters to `$n`.
///
/// String literals, quoted identifiers, dollar-quoted bodies, comments and `::`
/// casts are copied untouched. `\:` produces a literal colon. A name used more
/// than once maps to the same placeholder.
pub fn prepare(sql: &str) -> PreparedSql {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    // Start of the pending verbatim run; all delimiters are ASCII so byte
    // offsets here always fall on char boundaries.
    let mut run = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'$' => {
                let tag_end = bytes[i + 1..]
                    .iter()
                    .position(|b| !is_ident_char(*b))
                    .map(|p| i + 1 + p);
                match tag_end {
                    Some(end)
                        if bytes[end] == b'$'
                            && (end == i + 1 || is_ident_start(bytes[i + 1])) =>
                    {
                        let tag = &sql[i..=end];
                        match sql[end + 1..].find(tag) {
                            Some(close) => i = end + 1 + close + tag.len(),
                            None => i = bytes.len(),
                        }
                    }
                    _ => i += 1,
                }
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b'\\' if bytes.get(i + 1) == Some(&b':') => {
                out.push_str(&sql[run..i]);
                i += 1;
                run = i;
                i += 1;
            }
            b':' if bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) => {
                out.push_str(&sql[run..i]);
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_char(bytes[end]) {
                    end += 1;
                }
                let name = &sql[start..end];
                let position = match names.iter().position(|n| n == name) {
                    Some(pos) => pos,
                    None => {
                        names.push(name.to_string());
                        names.len() - 1
                    }
                };
                out.push('$');
                out.push_str(&(position + 1).to_string());
                i = end;
                run = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[run.min(sql.len())..]);

    PreparedSql { sql: out, names }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(sql: &str) -> StatementKind {
        classify(sql, DatabaseType::PostgreSQL)
    }

    #[test]
    fn test_classify_reads() {
        assert_eq!(pg("SELECT id, name FROM companies LIMIT 5"), StatementKind::Read);
        assert_eq!(pg("  select 1"), StatementKind::Read);
        assert_eq!(pg("\n\tSeLeCt now()"), StatementKind::Read);
        assert_eq!(pg("WITH t AS (SELECT 1) SELECT * FROM t"), StatementKind::Read);
        assert_eq!(pg("(SELECT 1) UNION (SELECT 2)"), StatementKind::Read);
        assert_eq!(pg("-- preview\nSELECT * FROM farms"), StatementKind::Read);
        assert_eq!(pg("/* c */ SELECT 1"), StatementKind::Read);
        assert_eq!(pg("EXPLAIN SELECT 1"), StatementKind::Read);
        assert_eq!(pg("SHOW server_version"), StatementKind::Read);
    }

    #[test]
    fn test_classify_writes() {
        assert_eq!(
            pg("UPDATE companies SET name = :n WHERE id = :i"),
            StatementKind::Write
        );
        assert_eq!(pg("insert into farms (id) values (1)"), StatementKind::Write);
        assert_eq!(pg("DELETE FROM persons"), StatementKind::Write);
        assert_eq!(pg("CREATE TABLE t (id int)"), StatementKind::Write);
        assert_eq!(pg(""), StatementKind::Write);
        assert_eq!(pg("\"select\""), StatementKind::Write);
    }

    #[test]
    fn test_classify_unterminated_literal_falls_back() {
        assert_eq!(pg("SELECT 'oops"), StatementKind::Read);
        assert_eq!(pg("UPDATE t SET a = 'oops"), StatementKind::Write);
    }

    #[test]
    fn test_leading_keyword_sqlite() {
        assert_eq!(
            leading_keyword("  values (1)", DatabaseType::SQLite),
            Some("VALUES".to_string())
        );
    }

    #[test]
    fn test_prepare_named_params() {
        let prepared = prepare("UPDATE companies SET name = :n WHERE id = :i");
        assert_eq!(prepared.sql, "UPDATE companies SET name = $1 WHERE id = $2");
        assert_eq!(prepared.names, vec!["n", "i"]);
    }

    #[test]
    fn test_prepare_repeated_name_reuses_placeholder() {
        let prepared = prepare("SELECT * FROM t WHERE a = :x OR b = :x AND c = :y");
        assert_eq!(prepared.sql, "SELECT * FROM t WHERE a = $1 OR b = $1 AND c = $2");
        assert_eq!(prepared.names, vec!["x", "y"]);
    }

    #[test]
    fn test_prepare_skips_literals_comments_and_casts() {
        let sql = "SELECT ':no', \":nope\", id::text, $$ :body $$ -- :comment\n/* :block */ FROM t WHERE x = :yes";
        let prepared = prepare(sql);
        assert_eq!(prepared.names, vec!["yes"]);
        assert!(prepared.sql.contains("':no'"));
        assert!(prepared.sql.contains("\":nope\""));
        assert!(prepared.sql.contains("id::text"));
        assert!(prepared.sql.contains("$$ :body $$"));
        assert!(prepared.sql.contains("-- :comment"));
        assert!(prepared.sql.contains("/* :block */"));
        assert!(prepared.sql.ends_with("x = $1"));
    }

    #[test]
    fn test_prepare_tagged_dollar_quote() {
        let prepared = prepare("SELECT $fn$ :inside $fn$, :outside");
        assert_eq!(prepared.sql, "SELECT $fn$ :inside $fn$, $1");
        assert_eq!(prepared.names, vec!["outside"]);
    }

    #[test]
    fn test_prepare_leaves_positional_and_slices() {
        let prepared = prepare("SELECT arr[1:2], $1 FROM t");
        assert_eq!(prepared.sql, "SELECT arr[1:2], $1 FROM t");
        assert!(!prepared.has_params());
    }

    #[test]
    fn test_prepare_escaped_colon() {
        let prepared = prepare(r"SELECT '12' || \:literal");
        assert_eq!(prepared.sql, "SELECT '12' || :literal");
        assert!(prepared.names.is_empty());
    }

    #[test]
    fn test_prepare_unicode_passthrough() {
        let prepared = prepare("SELECT 'éolienne' AS nom, :ferme");
        assert_eq!(prepared.sql, "SELECT 'éolienne' AS nom, $1");
    }

    #[test]
    fn test_ordered_params() {
        let prepared = prepare("UPDATE companies SET name = :n WHERE id = :i");
        let mut params = NamedParams::new();
        params.insert("i".to_string(), QueryParam::Int(1));
        params.insert("n".to_string(), QueryParam::from("Acme"));
        params.insert("unused".to_string(), QueryParam::Null);

        let ordered = prepared.ordered(&params).unwrap();
        assert_eq!(ordered, vec![&QueryParam::from("Acme"), &QueryParam::Int(1)]);
    }

    #[test]
    fn test_ordered_params_missing() {
        let prepared = prepare("SELECT * FROM t WHERE a = :a AND b = :b");
        let mut params = NamedParams::new();
        params.insert("a".to_string(), QueryParam::Int(1));

        let err = prepared.ordered(&params).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains(":b"));
    }
}
