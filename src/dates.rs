//! Date parsing and canonical rendering.
//!
//! Every date that takes part in a comparison or a join is re-emitted as
//! `YYYY-MM-DD`, so lexicographic order on the text equals date order.

use crate::errors::EtlError;
use crate::models::Cell;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d";

/// Renders a date in the canonical `YYYY-MM-DD` form.
pub fn canonical(date: NaiveDate) -> String {
    date.format(CANONICAL_FORMAT).to_string()
}

/// Latest snapshot date considered complete for a run on `reference`.
pub fn watermark(reference: NaiveDate) -> NaiveDate {
    reference - Duration::days(1)
}

/// Parses a day-first `DD/MM/YYYY` date. No other layout is accepted.
pub fn parse_day_first(value: &str) -> Result<NaiveDate, EtlError> {
    NaiveDate::parse_from_str(value.trim(), "%d/%m/%Y").map_err(|_| {
        EtlError::Format(format!(
            "'{}' is not a day/month/year date (expected DD/MM/YYYY)",
            value
        ))
    })
}

/// Parses a date whose layout is not known in advance.
///
/// Slash, dash and dot separated dates with a two-digit leading field are read
/// month-first; when the first field cannot be a month the day-first reading
/// is used instead.
pub fn parse_ambient(value: &str) -> Result<NaiveDate, EtlError> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.date_naive());
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%d/%m/%Y %H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.date());
        }
    }

    if trimmed.len() == 8 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(trimmed, "%Y%m%d").map_err(|_| unparseable(value));
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%d/%m/%Y", "%m-%d-%Y", "%d-%m-%Y",
        "%m.%d.%Y", "%d.%m.%Y", "%d %b %Y", "%d %B %Y", "%d-%b-%Y", "%b %d, %Y", "%B %d, %Y",
        "%b %d %Y", "%B %d %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }

    Err(unparseable(value))
}

/// Normalizes a cell holding a day-first date. Nulls stay null.
pub fn normalize_day_first(cell: &Cell) -> Result<Cell, EtlError> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Text(s) => Ok(Cell::Text(canonical(parse_day_first(s)?))),
        other => Err(EtlError::Format(format!(
            "'{}' is not a day/month/year date (expected DD/MM/YYYY)",
            other
        ))),
    }
}

/// Normalizes a cell holding a date in any supported layout. Nulls stay null.
///
/// Integer cells are read as compact `YYYYMMDD` dates.
pub fn normalize_ambient(cell: &Cell) -> Result<Cell, EtlError> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Text(s) => Ok(Cell::Text(canonical(parse_ambient(s)?))),
        Cell::Int(v) => Ok(Cell::Text(canonical(parse_ambient(&v.to_string())?))),
        Cell::Float(_) => Err(unparseable(&cell.to_string())),
    }
}

fn unparseable(value: &str) -> EtlError {
    EtlError::Format(format!("'{}' is not a recognizable date", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_first_parses_padded_and_unpadded() {
        assert_eq!(parse_day_first("01/02/2024").unwrap(), ymd(2024, 2, 1));
        assert_eq!(parse_day_first("5/3/2024").unwrap(), ymd(2024, 3, 5));
        assert_eq!(parse_day_first("31/12/2023").unwrap(), ymd(2023, 12, 31));
    }

    #[test]
    fn test_day_first_rejects_other_layouts() {
        assert!(parse_day_first("2024-01-01").unwrap_err().is_format());
        assert!(parse_day_first("12/31/2023").unwrap_err().is_format());
        assert!(parse_day_first("").unwrap_err().is_format());
    }

    #[test]
    fn test_ambient_formats() {
        assert_eq!(parse_ambient("2024-01-05").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("2024/01/05").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("20240105").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("2024-01-05 13:45:00").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("2024-01-05T13:45:00Z").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("05 Jan 2024").unwrap(), ymd(2024, 1, 5));
        assert_eq!(parse_ambient("January 5, 2024").unwrap(), ymd(2024, 1, 5));
    }

    #[test]
    fn test_ambient_slash_dates_are_month_first_with_fallback() {
        assert_eq!(parse_ambient("01/02/2024").unwrap(), ymd(2024, 1, 2));
        assert_eq!(parse_ambient("25/12/2024").unwrap(), ymd(2024, 12, 25));
        assert_eq!(parse_ambient("01/02/2024 10:00:00").unwrap(), ymd(2024, 1, 2));
        assert_eq!(parse_ambient("25/12/2024 10:00:00").unwrap(), ymd(2024, 12, 25));
        assert_eq!(parse_ambient("25/12/2024 10:00").unwrap(), ymd(2024, 12, 25));
        assert_eq!(parse_ambient("2024/12/25 10:00").unwrap(), ymd(2024, 12, 25));
    }

    #[test]
    fn test_ambient_rejects_garbage() {
        assert!(parse_ambient("not a date").unwrap_err().is_format());
        assert!(parse_ambient("2024-13-45").unwrap_err().is_format());
    }

    #[test]
    fn test_normalize_cells() {
        assert_eq!(
            normalize_day_first(&Cell::text("01/01/2024")).unwrap(),
            Cell::text("2024-01-01")
        );
        assert_eq!(normalize_day_first(&Cell::Null).unwrap(), Cell::Null);
        assert!(normalize_day_first(&Cell::Int(20240101)).is_err());
        assert_eq!(
            normalize_ambient(&Cell::Int(20240101)).unwrap(),
            Cell::text("2024-01-01")
        );
    }

    #[test]
    fn test_watermark_is_previous_day() {
        assert_eq!(watermark(ymd(2024, 3, 1)), ymd(2024, 2, 29));
        assert_eq!(canonical(watermark(ymd(2024, 1, 1))), "2023-12-31");
    }
}
