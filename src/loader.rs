//! Tabular Loader: reads the raw comma-separated extracts into [`Relation`]s.

use crate::errors::{EtlError, ResultExt};
use crate::models::{Cell, Relation};
use csv::ReaderBuilder;
use std::io::Read;
use std::path::{Path, PathBuf};

/// File names of the four extracts inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFiles {
    pub active: String,
    pub customer: String,
    pub order: String,
    pub service: String,
}

impl Default for ExtractFiles {
    fn default() -> Self {
        Self {
            active: "Raw Active.csv".to_string(),
            customer: "Raw Customer.csv".to_string(),
            order: "Raw Orders.csv".to_string(),
            service: "Raw Service.csv".to_string(),
        }
    }
}

/// The four raw extracts of one run.
#[derive(Debug, Clone)]
pub struct ExtractSet {
    pub active: Relation,
    pub customer: Relation,
    pub order: Relation,
    pub service: Relation,
}

impl ExtractSet {
    pub fn load(staging_dir: &Path, files: &ExtractFiles) -> Result<Self, EtlError> {
        let load = |name: &str| -> Result<Relation, EtlError> {
            let path: PathBuf = staging_dir.join(name);
            let relation = load_relation(&path)?;
            tracing::info!(
                "Loaded {} ({} rows, {} columns)",
                path.display(),
                relation.len(),
                relation.columns().len()
            );
            Ok(relation)
        };

        Ok(Self {
            service: load(&files.service)?,
            customer: load(&files.customer)?,
            order: load(&files.order)?,
            active: load(&files.active)?,
        })
    }
}

/// Reads a comma-separated file with a header row.
pub fn load_relation(path: &Path) -> Result<Relation, EtlError> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_relation(file).with_context(|| format!("reading {}", path.display()))
}

/// Reads comma-separated data with a header row from any reader.
///
/// Blank fields become nulls. Each column is typed as a whole: integers if
/// every value is an integer, floats if every value is numeric, text
/// otherwise. Integers written with a leading zero keep the column textual.
pub fn read_relation<R: Read>(reader: R) -> Result<Relation, EtlError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut raw: Vec<Vec<Option<String>>> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        raw.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        None
                    } else {
                        Some(field.to_string())
                    }
                })
                .collect(),
        );
    }

    let kinds: Vec<ColumnKind> = (0..columns.len())
        .map(|i| infer_kind(raw.iter().filter_map(|row| row[i].as_deref())))
        .collect();

    let mut relation = Relation::new(columns);
    for row in raw {
        let cells = row
            .into_iter()
            .zip(&kinds)
            .map(|(value, kind)| match value {
                None => Cell::Null,
                Some(v) => kind.convert(v),
            })
            .collect();
        relation.push_row(cells)?;
    }

    Ok(relation)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

impl ColumnKind {
    fn convert(self, value: String) -> Cell {
        let trimmed = value.trim();
        match self {
            ColumnKind::Int => trimmed.parse().map(Cell::Int).unwrap_or(Cell::Text(value)),
            ColumnKind::Float => trimmed
                .parse()
                .map(Cell::Float)
                .unwrap_or(Cell::Text(value)),
            ColumnKind::Text => Cell::Text(value),
        }
    }
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut kind = ColumnKind::Int;
    for value in values {
        let v = value.trim();
        if kind == ColumnKind::Int && !is_plain_integer(v) {
            kind = ColumnKind::Float;
        }
        if kind == ColumnKind::Float && !is_plain_float(v) {
            return ColumnKind::Text;
        }
    }
    kind
}

fn is_plain_integer(v: &str) -> bool {
    let digits = v.strip_prefix('-').unwrap_or(v);
    if digits.len() > 1 && digits.starts_with('0') {
        return false;
    }
    v.parse::<i64>().is_ok()
}

fn is_plain_float(v: &str) -> bool {
    let digits = v.strip_prefix('-').unwrap_or(v);
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return false;
    }
    v.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}
