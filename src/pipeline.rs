//! One batch run: transform both tables, then load them sequentially.
//!
//! Transforms are all-or-nothing and run before any write, so a schema or
//! format problem never leaves a destination half-loaded. Loads are
//! fail-fast: once one fails the next is skipped, and each destination's
//! outcome is reported separately. Re-running appends the rows again.

use crate::config::Config;
use crate::errors::EtlError;
use crate::joiner::join_order_service;
use crate::loader::ExtractSet;
use crate::models::Relation;
use crate::normalize::normalize_active;
use crate::sink::{bulk_load, BulkSink};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

pub const ACTIVE_FINAL: &str = "active_final";
pub const ORDER_FINAL: &str = "order_final";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded { rows: u64 },
    Failed { error: String },
    Skipped,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub reference_date: NaiveDate,
    pub active_final: LoadOutcome,
    pub order_final: LoadOutcome,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.active_final.is_loaded() && self.order_final.is_loaded()
    }
}

/// Transforms the extracts and loads `active_final` then `order_final`.
///
/// Returns an error only when a transform fails; load failures are reported
/// in the [`RunReport`].
pub async fn run<S>(
    extracts: &ExtractSet,
    sink: &mut S,
    reference_date: NaiveDate,
) -> Result<RunReport, EtlError>
where
    S: BulkSink + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("etl_run", %run_id, %reference_date);

    async move {
        let active_final = normalize_active(&extracts.active, &extracts.customer, reference_date)?;
        let order_final = join_order_service(&extracts.order, &extracts.service)?;

        let mut report = RunReport {
            run_id,
            reference_date,
            active_final: LoadOutcome::Skipped,
            order_final: LoadOutcome::Skipped,
        };

        report.active_final = load(&active_final, ACTIVE_FINAL, sink).await;
        if report.active_final.is_loaded() {
            report.order_final = load(&order_final, ORDER_FINAL, sink).await;
        } else {
            tracing::warn!("Skipping {} because {} failed", ORDER_FINAL, ACTIVE_FINAL);
        }

        Ok::<_, EtlError>(report)
    }
    .instrument(span)
    .await
}

/// Loads the extracts from the configured staging directory, then runs.
pub async fn run_from_staging<S>(
    config: &Config,
    sink: &mut S,
    reference_date: NaiveDate,
) -> Result<RunReport, EtlError>
where
    S: BulkSink + ?Sized,
{
    let extracts = ExtractSet::load(&config.staging_dir, &config.files)?;
    run(&extracts, sink, reference_date).await
}

async fn load<S>(table: &Relation, destination: &str, sink: &mut S) -> LoadOutcome
where
    S: BulkSink + ?Sized,
{
    match bulk_load(table, destination, sink).await {
        Ok(rows) => LoadOutcome::Loaded { rows },
        Err(e) => {
            tracing::error!("Load into {} failed: {}", destination, e);
            LoadOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cell;
    use crate::sink::{ColumnType, DestinationColumn, DestinationSchema, MemorySink};

    fn extracts() -> ExtractSet {
        ExtractSet {
            active: Relation::from_rows(
                [
                    "REPORT_DATE",
                    "CUSTOMER_ID",
                    "SERVICE_ID",
                    "SERVICE_NAME",
                    "SUBSCRIPTION_STATUS",
                ],
                vec![vec![
                    Cell::text("01/01/2024"),
                    Cell::Int(1),
                    Cell::Int(10),
                    Cell::text("X"),
                    Cell::text("active"),
                ]],
            )
            .unwrap(),
            customer: Relation::from_rows(
                ["CUSTOMER_ID", "REPORT_DATE", "NAME"],
                vec![vec![Cell::Int(1), Cell::text("2024-01-01"), Cell::text("Alice")]],
            )
            .unwrap(),
            order: Relation::from_rows(
                ["ORDER_ID", "SERVICE_ID", "REPORT_DATE"],
                vec![vec![Cell::text("o1"), Cell::Int(10), Cell::text("2024-01-01")]],
            )
            .unwrap(),
            service: Relation::from_rows(
                ["SERVICE_ID", "REPORT_DATE", "PRICE"],
                vec![vec![Cell::text("10"), Cell::text("2024-01-01"), Cell::Float(9.9)]],
            )
            .unwrap(),
        }
    }

    fn schema(table: &str, columns: &[(&str, ColumnType)]) -> DestinationSchema {
        DestinationSchema {
            table: table.to_string(),
            columns: columns
                .iter()
                .map(|(n, t)| DestinationColumn::new(*n, t.clone()))
                .collect(),
        }
    }

    fn sink() -> MemorySink {
        MemorySink::new()
            .with_table(schema(
                ACTIVE_FINAL,
                &[
                    ("snapshot_date", ColumnType::Date),
                    ("customer_id", ColumnType::Text),
                    ("service_id", ColumnType::Text),
                    ("service_name", ColumnType::Text),
                    ("name", ColumnType::Text),
                ],
            ))
            .with_table(schema(
                ORDER_FINAL,
                &[
                    ("order_id", ColumnType::Text),
                    ("service_id", ColumnType::Text),
                    ("report_date", ColumnType::Date),
                    ("price", ColumnType::Float),
                ],
            ))
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[tokio::test]
    async fn test_run_loads_both_tables() {
        let mut sink = sink();
        let report = run(&extracts(), &mut sink, jan(2)).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.active_final, LoadOutcome::Loaded { rows: 1 });
        assert_eq!(report.order_final, LoadOutcome::Loaded { rows: 1 });
        assert_eq!(sink.rows(ORDER_FINAL)[0][3], Cell::Float(9.9));
    }

    #[tokio::test]
    async fn test_failed_active_load_skips_order_load() {
        let mut sink = sink().fail_at(ACTIVE_FINAL, 0);
        let report = run(&extracts(), &mut sink, jan(2)).await.unwrap();

        assert!(matches!(report.active_final, LoadOutcome::Failed { .. }));
        assert_eq!(report.order_final, LoadOutcome::Skipped);
        assert!(sink.rows(ACTIVE_FINAL).is_empty());
        assert!(sink.rows(ORDER_FINAL).is_empty());
    }

    #[tokio::test]
    async fn test_order_failure_reported_separately() {
        let mut sink = sink().fail_at(ORDER_FINAL, 0);
        let report = run(&extracts(), &mut sink, jan(2)).await.unwrap();

        assert!(report.active_final.is_loaded());
        assert!(matches!(report.order_final, LoadOutcome::Failed { .. }));
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn test_transform_failure_writes_nothing() {
        let mut broken = extracts();
        broken.service.drop_column("REPORT_DATE").unwrap();
        let mut sink = sink();

        let err = run(&broken, &mut sink, jan(2)).await.unwrap_err();
        assert!(err.is_schema());
        assert!(sink.rows(ACTIVE_FINAL).is_empty());
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let report = RunReport {
            run_id: Uuid::nil(),
            reference_date: jan(2),
            active_final: LoadOutcome::Loaded { rows: 3 },
            order_final: LoadOutcome::Skipped,
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["active_final"]["status"], "loaded");
        assert_eq!(json["active_final"]["rows"], 3);
        assert_eq!(json["order_final"]["status"], "skipped");
        assert_eq!(json["reference_date"], "2024-01-02");
    }
}
