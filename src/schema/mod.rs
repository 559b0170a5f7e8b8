//! Table descriptors and canonical SQL builders.
//!
//! A [`TableSchema`] describes how one record shape maps onto a parent table
//! and its child tables. It is plain data: the ingestion worker never needs a
//! per-record type, only this value and the record's [`RecordData`].
//!
//! All SQL built here is in the canonical (SQLite) dialect. Parameters use the
//! `:name` placeholder form and are never inlined, so the SQL text of two
//! records with the same shape is identical and can key a statement cache.

pub mod value;

pub use value::SqlValue;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error type for schema descriptor validation and command building.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("invalid identifier '{0}': must be ASCII alphanumeric or '_' and not start with a digit")]
    InvalidIdentifier(String),

    #[error("table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{0}' has no insertable columns")]
    NoInsertableColumns(String),

    #[error("record for table '{table}' carries {actual} child tables, schema declares {expected}")]
    ChildTableMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },
}

/// Column storage type, named by its canonical (SQLite) spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    DateTime,
    Blob,
}

impl ColumnType {
    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::DateTime => "DATETIME",
            Self::Blob => "BLOB",
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// Placeholder name used in INSERT statements (without the `:` prefix).
    pub parameter_name: String,
    pub column_type: ColumnType,
    /// Surrogate key generated by the store; never part of an INSERT.
    pub is_identity: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            parameter_name: name.clone(),
            name,
            column_type,
            is_identity: false,
        }
    }

    /// A store-generated integer primary key.
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            is_identity: true,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    pub fn with_parameter_name(mut self, parameter_name: impl Into<String>) -> Self {
        self.parameter_name = parameter_name.into();
        self
    }

    fn definition(&self) -> String {
        if self.is_identity {
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.name)
        } else {
            format!("{} {}", self.name, self.column_type.canonical_name())
        }
    }
}

/// A child table whose rows hang off each parent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildTableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
}

impl ChildTableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let table_name = table_name.into();
        validate_table(&table_name, &columns)?;
        Ok(Self {
            table_name,
            columns,
        })
    }
}

/// Descriptor for one record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    pub children: Vec<ChildTableSchema>,
}

impl TableSchema {
    /// Create a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if any identifier is unusable in unquoted SQL, a
    /// column name repeats within a table, or a table has nothing to insert.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        children: Vec<ChildTableSchema>,
    ) -> Result<Self, SchemaError> {
        let table_name = table_name.into();
        validate_table(&table_name, &columns)?;
        Ok(Self {
            table_name,
            columns,
            children,
        })
    }

    /// CREATE TABLE statements for the parent table followed by each child table.
    pub fn create_table_sql(&self) -> Vec<String> {
        std::iter::once(create_table(&self.table_name, &self.columns))
            .chain(
                self.children
                    .iter()
                    .map(|child| create_table(&child.table_name, &child.columns)),
            )
            .collect()
    }

    /// Parameterized INSERT commands for one record.
    ///
    /// The first command inserts the parent row. Each child table then
    /// contributes one command per present row; absent rows contribute nothing.
    /// Child placeholders are suffixed with the row index (`:col_0`, `:col_1`).
    pub fn insert_commands(&self, record: &RecordData) -> Result<Vec<SqlCommand>, SchemaError> {
        if record.children.len() > self.children.len() {
            return Err(SchemaError::ChildTableMismatch {
                table: self.table_name.clone(),
                expected: self.children.len(),
                actual: record.children.len(),
            });
        }

        let mut commands = vec![insert_row(
            &self.table_name,
            &self.columns,
            &record.values,
            None,
        )];

        for (child, rows) in self.children.iter().zip(&record.children) {
            for (index, row) in rows.rows.iter().enumerate() {
                if !row.present {
                    continue;
                }
                commands.push(insert_row(
                    &child.table_name,
                    &child.columns,
                    &row.values,
                    Some(index),
                ));
            }
        }

        Ok(commands)
    }
}

/// SQL text plus named parameter values, ready for a statement cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub sql: String,
    /// Parameter names without the `:` prefix, in placeholder order.
    pub params: Vec<(String, SqlValue)>,
}

impl SqlCommand {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Column values of one record, including its child rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordData {
    pub values: HashMap<String, SqlValue>,
    /// One entry per child table, in the order the schema declares them.
    pub children: Vec<ChildRows>,
}

impl RecordData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn with_children(mut self, rows: ChildRows) -> Self {
        self.children.push(rows);
        self
    }

    /// Value for a column, or `None` when the record does not carry it.
    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }
}

/// Rows of one child table for one parent record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildRows {
    pub rows: Vec<ChildRow>,
}

impl ChildRows {
    pub fn new(rows: Vec<ChildRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn presence_mask(&self) -> Vec<bool> {
        self.rows.iter().map(|row| row.present).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildRow {
    pub present: bool,
    pub values: HashMap<String, SqlValue>,
}

impl ChildRow {
    pub fn present() -> Self {
        Self {
            present: true,
            values: HashMap::new(),
        }
    }

    /// A slot the source left empty; it is skipped, not inserted as NULLs.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }
}

/// Whether `name` can be used as an unquoted identifier in every dialect.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_table(table_name: &str, columns: &[ColumnSpec]) -> Result<(), SchemaError> {
    if !is_valid_identifier(table_name) {
        return Err(SchemaError::InvalidIdentifier(table_name.to_string()));
    }

    let mut seen = HashSet::new();
    for column in columns {
        for ident in [&column.name, &column.parameter_name] {
            if !is_valid_identifier(ident) {
                return Err(SchemaError::InvalidIdentifier(ident.clone()));
            }
        }
        if !seen.insert(column.name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                table: table_name.to_string(),
                column: column.name.clone(),
            });
        }
    }

    if columns.iter().all(|c| c.is_identity) {
        return Err(SchemaError::NoInsertableColumns(table_name.to_string()));
    }
    Ok(())
}

fn create_table(table_name: &str, columns: &[ColumnSpec]) -> String {
    let definitions: Vec<String> = columns.iter().map(ColumnSpec::definition).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table_name,
        definitions.join(", ")
    )
}

fn insert_row(
    table_name: &str,
    columns: &[ColumnSpec],
    values: &HashMap<String, SqlValue>,
    row_index: Option<usize>,
) -> SqlCommand {
    let insertable: Vec<&ColumnSpec> = columns.iter().filter(|c| !c.is_identity).collect();

    let params: Vec<(String, SqlValue)> = insertable
        .iter()
        .map(|column| {
            let name = match row_index {
                Some(index) => format!("{}_{}", column.parameter_name, index),
                None => column.parameter_name.clone(),
            };
            let value = values.get(&column.name).cloned().unwrap_or_default();
            (name, value)
        })
        .collect();

    let column_list: Vec<&str> = insertable.iter().map(|c| c.name.as_str()).collect();
    let placeholders: Vec<String> = params.iter().map(|(name, _)| format!(":{name}")).collect();

    SqlCommand {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name,
            column_list.join(", "),
            placeholders.join(", ")
        ),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race_schema() -> TableSchema {
        TableSchema::new(
            "race",
            vec![
                ColumnSpec::identity("id"),
                ColumnSpec::new("name", ColumnType::Text),
                ColumnSpec::new("distance", ColumnType::Real),
                ColumnSpec::new("held_at", ColumnType::DateTime),
            ],
            vec![ChildTableSchema::new(
                "race_entry",
                vec![
                    ColumnSpec::new("horse", ColumnType::Text),
                    ColumnSpec::new("gate", ColumnType::Integer),
                ],
            )
            .unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_create_table_sql_covers_children() {
        let ddl = race_schema().create_table_sql();
        assert_eq!(
            ddl,
            vec![
                "CREATE TABLE IF NOT EXISTS race (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 name TEXT, distance REAL, held_at DATETIME)"
                    .to_string(),
                "CREATE TABLE IF NOT EXISTS race_entry (horse TEXT, gate INTEGER)".to_string(),
            ]
        );
    }

    #[test]
    fn test_insert_skips_identity_and_binds_missing_as_null() {
        let record = RecordData::new().with_value("name", "Derby");
        let commands = race_schema().insert_commands(&record).unwrap();

        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].sql,
            "INSERT INTO race (name, distance, held_at) VALUES (:name, :distance, :held_at)"
        );
        assert_eq!(commands[0].params[0], ("name".into(), SqlValue::from("Derby")));
        assert_eq!(commands[0].params[1], ("distance".into(), SqlValue::Null));
    }

    #[test]
    fn test_absent_child_rows_produce_no_commands() {
        let record = RecordData::new().with_children(ChildRows::new(vec![
            ChildRow::present().with_value("horse", "A").with_value("gate", 1),
            ChildRow::absent(),
            ChildRow::present().with_value("horse", "C").with_value("gate", 3),
        ]));
        let commands = race_schema().insert_commands(&record).unwrap();

        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[1].sql,
            "INSERT INTO race_entry (horse, gate) VALUES (:horse_0, :gate_0)"
        );
        assert_eq!(
            commands[2].sql,
            "INSERT INTO race_entry (horse, gate) VALUES (:horse_2, :gate_2)"
        );
        assert!(commands.iter().all(|c| !c.sql.contains("_1")));
        assert_eq!(record.children[0].presence_mask(), vec![true, false, true]);
    }

    #[test]
    fn test_too_many_child_tables_rejected() {
        let record = RecordData::new()
            .with_children(ChildRows::default())
            .with_children(ChildRows::default());
        assert!(matches!(
            race_schema().insert_commands(&record),
            Err(SchemaError::ChildTableMismatch { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("race_2024"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("name; DROP TABLE x"));

        let err = TableSchema::new("bad-name", vec![ColumnSpec::new("a", ColumnType::Text)], vec![])
            .unwrap_err();
        assert_eq!(err, SchemaError::InvalidIdentifier("bad-name".into()));
    }

    #[test]
    fn test_duplicate_and_identity_only_tables_rejected() {
        let dup = TableSchema::new(
            "t",
            vec![
                ColumnSpec::new("a", ColumnType::Text),
                ColumnSpec::new("a", ColumnType::Integer),
            ],
            vec![],
        );
        assert!(matches!(dup, Err(SchemaError::DuplicateColumn { .. })));

        let identity_only = TableSchema::new("t", vec![ColumnSpec::identity("id")], vec![]);
        assert_eq!(
            identity_only,
            Err(SchemaError::NoInsertableColumns("t".into()))
        );
    }
}
