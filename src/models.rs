//! Tabular data model shared by the loader, the transforms and the sink.
//!
//! A [`Relation`] is an ordered collection of rows with a named column list,
//! the in-memory shape of one extract or one output table.

use crate::errors::EtlError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A single typed value inside a relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// String coercion applied to join keys and identifiers.
    ///
    /// `123` and `"123"` compare equal afterwards. Nulls stay null so a missing
    /// identifier never turns into a literal placeholder string.
    pub fn coerce_to_text(&self) -> Cell {
        match self {
            Cell::Null => Cell::Null,
            Cell::Int(v) => Cell::Text(v.to_string()),
            Cell::Float(v) => Cell::Text(format_float(*v)),
            Cell::Text(s) => Cell::Text(s.clone()),
        }
    }

    /// Textual rendering used when binding values for the sink.
    pub fn render(&self) -> Option<String> {
        match self.coerce_to_text() {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Key used for equality joins and deduplication. Nulls have no key.
    fn join_key(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Int(v) => Some(format!("i:{}", v)),
            Cell::Float(v) => Some(format!("f:{}", format_float(*v))),
            Cell::Text(s) => Some(format!("t:{}", s)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, ""),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", format_float(*v)),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

/// Integral floats keep a trailing `.0` (`1.0` renders as `"1.0"`, not `"1"`).
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

pub type Row = Vec<Cell>;

/// Outcome of [`Relation::dedup_by`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Rows removed because an earlier row had the same key.
    pub dropped_rows: usize,
    /// Distinct keys that appeared more than once.
    pub duplicated_keys: usize,
    /// Duplicated keys whose rows disagree on at least one non-key column.
    pub conflicting_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Relation {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Relation {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a relation from string column names and rows of convertible values.
    pub fn from_rows<C, R, V>(columns: C, rows: R) -> Result<Self, EtlError>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator,
        R::Item: IntoIterator<Item = V>,
        V: Into<Cell>,
    {
        let mut relation = Self::new(columns.into_iter().map(Into::into).collect());
        for row in rows {
            relation.push_row(row.into_iter().map(Into::into).collect())?;
        }
        Ok(relation)
    }

    pub fn push_row(&mut self, row: Row) -> Result<(), EtlError> {
        if row.len() != self.columns.len() {
            return Err(EtlError::Schema(format!(
                "row has {} values but relation has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, EtlError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EtlError::Schema(format!("column '{}' not found", name)))
    }

    /// Fails with a single SchemaError naming every absent column.
    pub fn require_columns(&self, relation: &str, required: &[&str]) -> Result<(), EtlError> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !self.has_column(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EtlError::Schema(format!(
                "{} is missing required column(s): {}",
                relation,
                missing.join(", ")
            )))
        }
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All values of one column in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>, EtlError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), EtlError> {
        let idx = self.column_index(from)?;
        self.columns[idx] = to.to_string();
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<(), EtlError> {
        let idx = self.column_index(name)?;
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        Ok(())
    }

    /// Replaces every value of `name` with `f(value)`, stopping at the first error.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), EtlError>
    where
        F: FnMut(&Cell) -> Result<Cell, EtlError>,
    {
        let idx = self.column_index(name)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx])?;
        }
        Ok(())
    }

    pub fn coerce_columns_to_text(&mut self, names: &[&str]) -> Result<(), EtlError> {
        for name in names {
            self.map_column(name, |cell| Ok(cell.coerce_to_text()))?;
        }
        Ok(())
    }

    /// Keeps rows for which `keep(value of column)` holds.
    pub fn retain_rows<F>(&mut self, column: &str, mut keep: F) -> Result<(), EtlError>
    where
        F: FnMut(&Cell) -> bool,
    {
        let idx = self.column_index(column)?;
        self.rows.retain(|row| keep(&row[idx]));
        Ok(())
    }

    /// Keeps the first row seen per value of `key`.
    ///
    /// Rows with a null key are all kept. The report lists keys whose
    /// duplicates disagree so callers can flag the arbitrary tie-break.
    pub fn dedup_by(&mut self, key: &str) -> Result<DuplicateReport, EtlError> {
        let idx = self.column_index(key)?;
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut duplicated: HashSet<String> = HashSet::new();
        let mut conflicting: Vec<String> = Vec::new();
        let mut kept: Vec<Row> = Vec::with_capacity(self.rows.len());
        let mut dropped = 0;

        for row in self.rows.drain(..) {
            let Some(k) = row[idx].join_key() else {
                kept.push(row);
                continue;
            };

            match first_seen.get(&k) {
                Some(&pos) => {
                    dropped += 1;
                    duplicated.insert(k.clone());
                    if kept[pos] != row {
                        let display = row[idx].to_string();
                        if !conflicting.contains(&display) {
                            conflicting.push(display);
                        }
                    }
                }
                None => {
                    first_seen.insert(k, kept.len());
                    kept.push(row);
                }
            }
        }

        self.rows = kept;
        Ok(DuplicateReport {
            dropped_rows: dropped,
            duplicated_keys: duplicated.len(),
            conflicting_keys: conflicting,
        })
    }

    /// Left join on equal values of `keys`.
    ///
    /// Every left row is kept in order; each match on the right produces one
    /// output row (fan-out), unmatched rows get nulls for the right columns.
    /// Output columns are the left columns followed by the right non-key
    /// columns. Non-key names present on both sides get `_x` / `_y` suffixes.
    /// Null keys never match.
    pub fn left_join(&self, right: &Relation, keys: &[&str]) -> Result<Relation, EtlError> {
        let left_keys = keys
            .iter()
            .map(|k| self.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;
        let right_keys = keys
            .iter()
            .map(|k| right.column_index(k))
            .collect::<Result<Vec<_>, _>>()?;

        let right_payload: Vec<usize> = (0..right.columns.len())
            .filter(|i| !right_keys.contains(i))
            .collect();

        let overlapping: HashSet<&str> = right_payload
            .iter()
            .map(|&i| right.columns[i].as_str())
            .filter(|name| !keys.contains(name) && self.has_column(name))
            .collect();

        let mut columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if overlapping.contains(c.as_str()) {
                    format!("{}_x", c)
                } else {
                    c.clone()
                }
            })
            .collect();
        columns.extend(right_payload.iter().map(|&i| {
            let name = &right.columns[i];
            if overlapping.contains(name.as_str()) {
                format!("{}_y", name)
            } else {
                name.clone()
            }
        }));

        let mut index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for (pos, row) in right.rows.iter().enumerate() {
            if let Some(k) = composite_key(row, &right_keys) {
                index.entry(k).or_default().push(pos);
            }
        }

        let mut out = Relation::new(columns);
        for row in &self.rows {
            let matches = composite_key(row, &left_keys).and_then(|k| index.get(&k));
            match matches {
                Some(positions) => {
                    for &pos in positions {
                        let mut joined = row.clone();
                        joined.extend(right_payload.iter().map(|&i| right.rows[pos][i].clone()));
                        out.rows.push(joined);
                    }
                }
                None => {
                    let mut joined = row.clone();
                    joined.extend(std::iter::repeat(Cell::Null).take(right_payload.len()));
                    out.rows.push(joined);
                }
            }
        }

        Ok(out)
    }
}

fn composite_key(row: &Row, indices: &[usize]) -> Option<Vec<String>> {
    indices.iter().map(|&i| row[i].join_key()).collect()
}
