//! Output formatting for result sets.
//!
//! Renders [`QueryResult`] values as ASCII tables (like psql), JSON, or
//! Markdown tables. Column order follows the first row, which follows the
//! select list.

use crate::config::OutputFormat;
use crate::models::{QueryResult, RowMap};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Column names in select-list order.
pub fn column_names(rows: &[RowMap]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// Render a result in the requested format.
pub fn format_result(result: &QueryResult, format: OutputFormat, elapsed_ms: u64) -> String {
    match (result, format) {
        (QueryResult::Rows(rows), OutputFormat::Table) => format_as_table(rows, elapsed_ms),
        (QueryResult::Rows(rows), OutputFormat::Markdown) => format_as_markdown(rows),
        (QueryResult::Rows(rows), OutputFormat::Json) => {
            serde_json::to_string_pretty(rows).unwrap_or_default()
        }
        (QueryResult::Affected(count), OutputFormat::Json) => {
            serde_json::json!({ "rows_affected": count }).to_string()
        }
        (QueryResult::Affected(count), _) => {
            let row_text = if *count == 1 { "row" } else { "rows" };
            format!(
                "Query OK, {} {} affected ({:.2} sec)",
                count,
                row_text,
                elapsed_ms as f64 / 1000.0
            )
        }
        (QueryResult::NoResult, OutputFormat::Json) => "null".to_string(),
        (QueryResult::NoResult, _) => String::new(),
    }
}

pub fn format_as_table(rows: &[RowMap], execution_time_ms: u64) -> String {
    let columns = column_names(rows);
    if columns.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(col, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in rows {
        let row_str: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(col).unwrap_or(&JsonValue::Null);
                let formatted = format_value(value);
                if matches!(value, JsonValue::Number(_)) {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_text = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        rows.len(),
        row_text,
        execution_time_ms as f64 / 1000.0
    ));

    output
}

pub fn format_as_markdown(rows: &[RowMap]) -> String {
    let columns = column_names(rows);
    if columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let mut output = String::new();

    let header: String = columns
        .iter()
        .map(|c| format!("| {} ", c))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in rows {
        let row_str: String = columns
            .iter()
            .map(|col| {
                let value = row.get(col).unwrap_or(&JsonValue::Null);
                format!("| {} ", format_value(value).replace('|', "\\|"))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} rows*", rows.len()));

    output
}

// `format!` width specifiers count chars, not display columns.
fn pad_right(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{}{}", " ".repeat(width.saturating_sub(s.width())), s)
}

fn pad_center(s: &str, width: usize) -> String {
    let total = width.saturating_sub(s.width());
    let left = total / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(total - left))
}
