//! Active-Snapshot Normalizer.
//!
//! Cleans the active-subscription extract and enriches it with customer
//! attributes:
//! 1. `REPORT_DATE` becomes `SNAPSHOT_DATE`
//! 2. identifiers are coerced to text
//! 3. day-first snapshot dates are re-emitted as `YYYY-MM-DD`
//! 4. snapshots newer than the watermark (reference date - 1 day) are dropped
//! 5. only `active` subscriptions are kept, the status column is dropped
//! 6. customers are reduced to one row per `CUSTOMER_ID`
//! 7. the two are left-joined on `CUSTOMER_ID`
use crate::dates::{canonical, normalize_day_first, watermark};
use crate::errors::{EtlError, ResultExt};
use crate::models::{Cell, DuplicateReport, Relation};
use chrono::NaiveDate;

pub const ACTIVE_STATUS: &str = "active";

const ACTIVE_REQUIRED: &[&str] = &[
    "REPORT_DATE",
    "CUSTOMER_ID",
    "SERVICE_ID",
    "SERVICE_NAME",
    "SUBSCRIPTION_STATUS",
];
const CUSTOMER_REQUIRED: &[&str] = &["CUSTOMER_ID", "REPORT_DATE"];

/// Produces the `active_final` table for a run on `reference_date`.
///
/// Fails as a whole on a missing column or an unparseable snapshot date.
pub fn normalize_active(
    active: &Relation,
    customer: &Relation,
    reference_date: NaiveDate,
) -> Result<Relation, EtlError> {
    active.require_columns("active", ACTIVE_REQUIRED)?;
    customer.require_columns("customer", CUSTOMER_REQUIRED)?;

    let mut active = active.clone();
    active.rename_column("REPORT_DATE", "SNAPSHOT_DATE")?;
    active.coerce_columns_to_text(&["CUSTOMER_ID", "SERVICE_ID", "SERVICE_NAME"])?;
    active
        .map_column("SNAPSHOT_DATE", normalize_day_first)
        .context("normalizing active SNAPSHOT_DATE")?;

    let cutoff = canonical(watermark(reference_date));
    let before = active.len();
    // Canonical dates order lexicographically; null dates never pass.
    active.retain_rows("SNAPSHOT_DATE", |cell| {
        cell.as_str().is_some_and(|d| d <= cutoff.as_str())
    })?;
    let after_watermark = active.len();

    active.retain_rows("SUBSCRIPTION_STATUS", is_active_status)?;
    active.drop_column("SUBSCRIPTION_STATUS")?;

    tracing::debug!(
        "Active snapshots: {} read, {} within watermark {}, {} active",
        before,
        after_watermark,
        cutoff,
        active.len()
    );

    let (customers, _) = dedup_customers(customer)?;
    let joined = active.left_join(&customers, &["CUSTOMER_ID"])?;

    tracing::info!("Normalized {} active subscription rows", joined.len());
    Ok(joined)
}

/// Convenience wrapper that uses today's local date as the reference date.
pub fn normalize_active_today(active: &Relation, customer: &Relation) -> Result<Relation, EtlError> {
    normalize_active(active, customer, chrono::Local::now().date_naive())
}

/// Reduces the customer extract to one row per `CUSTOMER_ID`.
///
/// The first row in input order wins and `REPORT_DATE` is dropped. Keys whose
/// duplicates disagree are logged because the choice between them depends on
/// extract ordering.
pub fn dedup_customers(customer: &Relation) -> Result<(Relation, DuplicateReport), EtlError> {
    customer.require_columns("customer", CUSTOMER_REQUIRED)?;

    let mut customers = customer.clone();
    customers.coerce_columns_to_text(&["CUSTOMER_ID"])?;
    // Dates differ between report days by construction; compare attributes only.
    customers.drop_column("REPORT_DATE")?;
    let report = customers.dedup_by("CUSTOMER_ID")?;

    if report.dropped_rows > 0 {
        tracing::debug!(
            "Customer dedup dropped {} rows across {} duplicated ids",
            report.dropped_rows,
            report.duplicated_keys
        );
    }
    if !report.conflicting_keys.is_empty() {
        let sample: Vec<&str> = report
            .conflicting_keys
            .iter()
            .take(10)
            .map(String::as_str)
            .collect();
        tracing::warn!(
            "{} customer id(s) have conflicting duplicate rows; keeping first seen (e.g. {})",
            report.conflicting_keys.len(),
            sample.join(", ")
        );
    }

    Ok((customers, report))
}

/// True when `cell` holds the exact status value kept by the normalizer.
pub fn is_active_status(cell: &Cell) -> bool {
    cell.as_str() == Some(ACTIVE_STATUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn active(rows: Vec<Vec<Cell>>) -> Relation {
        Relation::from_rows(
            [
                "REPORT_DATE",
                "CUSTOMER_ID",
                "SERVICE_ID",
                "SERVICE_NAME",
                "SUBSCRIPTION_STATUS",
            ],
            rows,
        )
        .unwrap()
    }

    fn customers(rows: Vec<Vec<Cell>>) -> Relation {
        Relation::from_rows(["CUSTOMER_ID", "REPORT_DATE", "NAME"], rows).unwrap()
    }

    #[test]
    fn test_end_to_end_example() {
        let a = active(vec![vec![
            "01/01/2024".into(),
            Cell::Int(1),
            Cell::Int(10),
            "X".into(),
            "active".into(),
        ]]);
        let c = customers(vec![vec![Cell::Int(1), "2024-01-01".into(), "Alice".into()]]);

        let out = normalize_active(&a, &c, date("2024-01-02")).unwrap();

        assert_eq!(
            out.columns(),
            vec!["SNAPSHOT_DATE", "CUSTOMER_ID", "SERVICE_ID", "SERVICE_NAME", "NAME"]
        );
        assert_eq!(
            out.rows(),
            vec![vec![
                Cell::text("2024-01-01"),
                Cell::text("1"),
                Cell::text("10"),
                Cell::text("X"),
                Cell::text("Alice"),
            ]]
        );
    }

    #[test]
    fn test_watermark_boundary() {
        let a = active(vec![
            vec!["01/01/2024".into(), "1".into(), "10".into(), "X".into(), "active".into()],
            vec!["02/01/2024".into(), "1".into(), "11".into(), "Y".into(), "active".into()],
        ]);
        let c = customers(vec![]);

        let out = normalize_active(&a, &c, date("2024-01-02")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0, "SNAPSHOT_DATE"), Some(&Cell::text("2024-01-01")));
    }

    #[test]
    fn test_status_filter_is_case_sensitive() {
        let a = active(vec![
            vec!["01/01/2024".into(), "1".into(), "10".into(), "X".into(), "Active".into()],
            vec!["01/01/2024".into(), "1".into(), "11".into(), "X".into(), "cancelled".into()],
            vec!["01/01/2024".into(), "1".into(), "12".into(), "X".into(), "active".into()],
        ]);
        let out = normalize_active(&a, &customers(vec![]), date("2024-02-01")).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0, "SERVICE_ID"), Some(&Cell::text("12")));
        assert!(!out.has_column("SUBSCRIPTION_STATUS"));
    }

    #[test]
    fn test_unmatched_customer_yields_nulls() {
        let a = active(vec![vec![
            "01/01/2024".into(),
            "99".into(),
            "10".into(),
            "X".into(),
            "active".into(),
        ]]);
        let c = customers(vec![vec!["1".into(), "2024-01-01".into(), "Alice".into()]]);

        let out = normalize_active(&a, &c, date("2024-01-05")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0, "NAME"), Some(&Cell::Null));
    }

    #[test]
    fn test_duplicate_customers_do_not_fan_out() {
        let a = active(vec![vec![
            "01/01/2024".into(),
            "1".into(),
            "10".into(),
            "X".into(),
            "active".into(),
        ]]);
        let c = customers(vec![
            vec![Cell::Int(1), "2024-01-01".into(), "Alice".into()],
            vec![Cell::Int(1), "2024-01-02".into(), "Alice".into()],
        ]);

        let out = normalize_active(&a, &c, date("2024-01-05")).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_malformed_snapshot_date_fails_whole_call() {
        let a = active(vec![
            vec!["01/01/2024".into(), "1".into(), "10".into(), "X".into(), "active".into()],
            vec!["2024-01-01".into(), "1".into(), "10".into(), "X".into(), "active".into()],
        ]);
        let err = normalize_active(&a, &customers(vec![]), date("2024-01-05")).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let a = Relation::from_rows(["REPORT_DATE", "CUSTOMER_ID"], Vec::<Vec<Cell>>::new()).unwrap();
        let err = normalize_active(&a, &customers(vec![]), date("2024-01-05")).unwrap_err();
        assert!(err.is_schema());
        assert!(err.to_string().contains("SUBSCRIPTION_STATUS"));

        let a = active(vec![]);
        let c = Relation::from_rows(["CUSTOMER_ID"], Vec::<Vec<Cell>>::new()).unwrap();
        assert!(normalize_active(&a, &c, date("2024-01-05")).unwrap_err().is_schema());
    }

    #[test]
    fn test_dedup_customers_reports_conflicts() {
        let c = customers(vec![
            vec![Cell::Int(1), "2024-01-01".into(), "Alice".into()],
            vec!["1".into(), "2024-01-02".into(), "Alicia".into()],
            vec![Cell::Int(2), "2024-01-01".into(), "Bob".into()],
            vec![Cell::Int(2), "2024-01-02".into(), "Bob".into()],
        ]);
        let (deduped, report) = dedup_customers(&c).unwrap();

        assert_eq!(deduped.columns(), vec!["CUSTOMER_ID", "NAME"]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped.get(0, "NAME"), Some(&Cell::text("Alice")));
        assert_eq!(report.duplicated_keys, 2);
        assert_eq!(report.conflicting_keys, vec!["1".to_string()]);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let a = active(vec![vec![
            "01/01/2024".into(),
            Cell::Int(1),
            Cell::Int(10),
            "X".into(),
            "active".into(),
        ]]);
        let c = customers(vec![vec![Cell::Int(1), "2024-01-01".into(), "Alice".into()]]);
        let (a0, c0) = (a.clone(), c.clone());

        normalize_active(&a, &c, date("2024-01-02")).unwrap();
        assert_eq!(a, a0);
        assert_eq!(c, c0);
    }
}
