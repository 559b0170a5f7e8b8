//! SQL dialect adapter.
//!
//! DDL is authored once in the canonical SQLite dialect and translated for
//! other stores by ordered, independent token substitutions. DML is portable
//! apart from parameter placeholders, which positional-only backends rewrite
//! with [`bind_positional`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use super::connection::DbError;
use crate::schema::SqlValue;

/// SQL syntax variant of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    DuckDb,
}

impl Dialect {
    /// Dialect every schema descriptor renders DDL in.
    pub const CANONICAL: Dialect = Dialect::Sqlite;

    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::DuckDb => "duckdb",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Substitution rules, applied in order.
static CREATE_TABLE_RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn create_table_rules() -> &'static [(Regex, &'static str)] {
    CREATE_TABLE_RULES.get_or_init(|| {
        [
            (
                r"(?i)\bINTEGER\s+PRIMARY\s+KEY\s+AUTOINCREMENT\b",
                "BIGINT PRIMARY KEY GENERATED ALWAYS AS IDENTITY",
            ),
            (r"(?i)\bTEXT\b", "VARCHAR"),
            (r"(?i)\bREAL\b", "DOUBLE"),
            (r"(?i)\bDATETIME\b", "TIMESTAMP"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("dialect rule is a valid regex"),
                replacement,
            )
        })
        .collect()
    })
}

/// Translate canonical (SQLite) CREATE TABLE text into DuckDB syntax.
///
/// Only whole words are replaced, so identifiers such as `GREATER` or
/// `context_id` pass through untouched, as does `IF NOT EXISTS`. The output
/// contains no source tokens, which makes the translation idempotent.
pub fn translate_create_table(ddl: &str) -> String {
    create_table_rules()
        .iter()
        .fold(ddl.to_string(), |sql, (pattern, replacement)| {
            pattern.replace_all(&sql, *replacement).into_owned()
        })
}

/// Canonical DDL adapted for `target`; borrowed when no translation is needed.
pub fn adapt_create_table(target: Dialect, ddl: &str) -> Cow<'_, str> {
    if target == Dialect::CANONICAL {
        Cow::Borrowed(ddl)
    } else {
        Cow::Owned(translate_create_table(ddl))
    }
}

/// Byte ranges of `:name` placeholders, skipping quoted text and `::` casts.
fn placeholder_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b':' => {
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start {
                    spans.push((i, end));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    spans
}

/// Names of the `:name` placeholders in `sql`, in order of appearance.
pub fn placeholder_names(sql: &str) -> Vec<&str> {
    placeholder_spans(sql)
        .into_iter()
        .map(|(start, end)| &sql[start + 1..end])
        .collect()
}

/// Rewrite `:name` placeholders as `?` and order the values to match.
///
/// A name used twice contributes its value twice.
///
/// # Errors
///
/// Returns [`DbError::UnboundParameter`] when a placeholder has no value.
pub fn bind_positional(
    sql: &str,
    params: &[(String, SqlValue)],
) -> Result<(String, Vec<SqlValue>), DbError> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut last = 0;

    for (start, end) in placeholder_spans(sql) {
        let name = &sql[start + 1..end];
        let value = params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DbError::UnboundParameter(name.to_string()))?;
        rewritten.push_str(&sql[last..start]);
        rewritten.push('?');
        values.push(value);
        last = end;
    }
    rewritten.push_str(&sql[last..]);

    Ok((rewritten, values))
}
