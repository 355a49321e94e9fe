//! Bulk Sink contract.
//!
//! A sink accepts a finished relation for a named, pre-existing destination
//! table. [`bulk_load`] checks the relation against the destination schema
//! before anything is written, so a positional insert can never land values
//! in the wrong columns. Sinks insert row by row inside one transaction and
//! commit after the last row.

use crate::dates::CANONICAL_FORMAT;
use crate::errors::EtlError;
use crate::models::{Cell, Relation, Row};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Column type of a destination table, as reported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Date,
    Timestamp,
    Boolean,
    Other(String),
}

impl ColumnType {
    /// Maps an `information_schema.columns.data_type` value.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" => {
                ColumnType::Text
            }
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" => {
                ColumnType::Integer
            }
            "real" | "double precision" | "numeric" | "decimal" | "float4" | "float8" => {
                ColumnType::Float
            }
            "date" => ColumnType::Date,
            "timestamp without time zone" | "timestamp with time zone" | "timestamp" => {
                ColumnType::Timestamp
            }
            "boolean" | "bool" => ColumnType::Boolean,
            other => ColumnType::Other(other.to_string()),
        }
    }

    /// SQL type name used to cast textual parameters on insert.
    pub fn sql_name(&self) -> &str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "bigint",
            ColumnType::Float => "numeric",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
            ColumnType::Other(name) => name,
        }
    }

    /// False for the bare `ARRAY` and `USER-DEFINED` categories, which name no
    /// concrete type to cast to.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ColumnType::Other(name) if name == "array" || name == "user-defined")
    }

    /// Whether `cell` can be stored in a column of this type.
    pub fn accepts(&self, cell: &Cell) -> bool {
        match (self, cell) {
            (_, Cell::Null) => true,
            (ColumnType::Text, _) | (ColumnType::Other(_), _) => true,
            (ColumnType::Integer, Cell::Int(_)) => true,
            (ColumnType::Integer, Cell::Text(s)) => s.trim().parse::<i64>().is_ok(),
            (ColumnType::Float, Cell::Int(_) | Cell::Float(_)) => true,
            (ColumnType::Float, Cell::Text(s)) => s.trim().parse::<f64>().is_ok(),
            (ColumnType::Date, Cell::Text(s)) => {
                NaiveDate::parse_from_str(s.trim(), CANONICAL_FORMAT).is_ok()
            }
            (ColumnType::Timestamp, Cell::Text(s)) => {
                let s = s.trim();
                NaiveDate::parse_from_str(s, CANONICAL_FORMAT).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
            }
            (ColumnType::Boolean, Cell::Text(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "false" | "t" | "f")
            }
            (ColumnType::Boolean, Cell::Int(v)) => *v == 0 || *v == 1,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl DestinationColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Positional column list of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSchema {
    pub table: String,
    pub columns: Vec<DestinationColumn>,
}

impl DestinationSchema {
    /// Checks that `relation` fits this table positionally.
    ///
    /// Column count and names (case-insensitive) must match in order, and
    /// every value must be storable in its column.
    pub fn validate(&self, relation: &Relation) -> Result<(), EtlError> {
        if relation.columns().len() != self.columns.len() {
            return Err(EtlError::Schema(format!(
                "{} has {} columns but the relation has {} ({})",
                self.table,
                self.columns.len(),
                relation.columns().len(),
                relation.columns().join(", ")
            )));
        }

        for (pos, (have, want)) in relation.columns().iter().zip(&self.columns).enumerate() {
            if !have.eq_ignore_ascii_case(&want.name) {
                return Err(EtlError::Schema(format!(
                    "{} column {} is '{}' but the relation has '{}'",
                    self.table,
                    pos + 1,
                    want.name,
                    have
                )));
            }
        }

        if let Some(column) = self.columns.iter().find(|c| !c.column_type.is_resolved()) {
            return Err(EtlError::Schema(format!(
                "{}.{} has type {} with no insertable element type",
                self.table,
                column.name,
                column.column_type.sql_name()
            )));
        }

        for (row_idx, row) in relation.rows().iter().enumerate() {
            for (cell, column) in row.iter().zip(&self.columns) {
                if !column.column_type.accepts(cell) {
                    return Err(EtlError::Schema(format!(
                        "row {}: value '{}' does not fit {}.{} ({})",
                        row_idx + 1,
                        cell,
                        self.table,
                        column.name,
                        column.column_type.sql_name()
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Checks a destination name: a plain identifier, optionally schema-qualified.
pub fn validate_identifier(name: &str) -> Result<(), EtlError> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("identifier pattern is valid")
    });

    if re.is_match(name) {
        Ok(())
    } else {
        Err(EtlError::Schema(format!(
            "'{}' is not a valid destination table name",
            name
        )))
    }
}

/// Destination that persists finished relations.
#[async_trait]
pub trait BulkSink: Send {
    /// Returns the column list of `destination`, or `None` when it does not exist.
    async fn describe(&mut self, destination: &str) -> Result<Option<DestinationSchema>, EtlError>;

    /// Inserts `rows` into `schema.table` row by row inside one transaction,
    /// committing after the last row. Nothing is persisted on failure.
    async fn insert_rows(&mut self, schema: &DestinationSchema, rows: &[Row])
        -> Result<u64, EtlError>;
}

/// Appends `table` to `destination`.
///
/// Fails with a schema error before writing when the destination is missing
/// or does not match the relation. Loads are appends: running twice inserts
/// the rows twice.
pub async fn bulk_load<S>(table: &Relation, destination: &str, sink: &mut S) -> Result<u64, EtlError>
where
    S: BulkSink + ?Sized,
{
    validate_identifier(destination)?;

    let schema = sink.describe(destination).await?.ok_or_else(|| {
        EtlError::Schema(format!("destination table {} does not exist", destination))
    })?;
    schema.validate(table)?;

    if table.is_empty() {
        tracing::info!("Nothing to load into {}", destination);
        return Ok(0);
    }

    tracing::info!("Loading {} rows into {}", table.len(), destination);
    let inserted = sink.insert_rows(&schema, table.rows()).await?;
    tracing::info!("Committed {} rows into {}", inserted, destination);

    Ok(inserted)
}

/// In-process sink holding committed rows per table.
///
/// Used by tests and dry runs. A failure can be injected at a given row to
/// exercise rollback.
#[derive(Debug, Default)]
pub struct MemorySink {
    schemas: HashMap<String, DestinationSchema>,
    committed: HashMap<String, Vec<Row>>,
    fail_at_row: HashMap<String, usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a destination table.
    pub fn with_table(mut self, schema: DestinationSchema) -> Self {
        self.schemas.insert(schema.table.clone(), schema);
        self
    }

    /// Makes the insert of the `row`-th row (0-based) into `table` fail.
    pub fn fail_at(mut self, table: &str, row: usize) -> Self {
        self.fail_at_row.insert(table.to_string(), row);
        self
    }

    /// Rows committed so far to `table`.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.committed.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn describe(&mut self, destination: &str) -> Result<Option<DestinationSchema>, EtlError> {
        Ok(self.schemas.get(destination).cloned())
    }

    async fn insert_rows(
        &mut self,
        schema: &DestinationSchema,
        rows: &[Row],
    ) -> Result<u64, EtlError> {
        let fail_at = self.fail_at_row.get(&schema.table).copied();
        let mut pending: Vec<Row> = Vec::with_capacity(rows.len());

        for (idx, row) in rows.iter().enumerate() {
            if fail_at == Some(idx) {
                return Err(EtlError::SinkRejected(format!(
                    "insert into {} failed at row {}",
                    schema.table,
                    idx + 1
                )));
            }
            pending.push(row.clone());
        }

        let count = pending.len() as u64;
        self.committed
            .entry(schema.table.clone())
            .or_default()
            .extend(pending);
        Ok(count)
    }
}
