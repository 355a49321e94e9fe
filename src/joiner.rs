//! Order-Service Joiner: reconciles order events with the service catalog.
use crate::dates::normalize_ambient;
use crate::errors::{EtlError, ResultExt};
use crate::models::Relation;

const JOIN_KEYS: &[&str] = &["SERVICE_ID", "REPORT_DATE"];

/// Produces the `order_final` table.
///
/// Both `REPORT_DATE` columns are normalized to `YYYY-MM-DD` from whatever
/// layout the extract uses, `SERVICE_ID` is coerced to text on both sides and
/// the order rows are left-joined with the catalog on `(SERVICE_ID, REPORT_DATE)`.
/// The catalog is not deduplicated: repeated keys multiply the matching order
/// rows.
pub fn join_order_service(order: &Relation, service: &Relation) -> Result<Relation, EtlError> {
    order.require_columns("order", JOIN_KEYS)?;
    service.require_columns("service", JOIN_KEYS)?;

    let order = prepare(order).context("normalizing order REPORT_DATE")?;
    let service = prepare(service).context("normalizing service REPORT_DATE")?;

    let joined = order.left_join(&service, JOIN_KEYS)?;

    if joined.len() > order.len() {
        tracing::debug!(
            "Order/service join fanned out {} order rows into {} rows",
            order.len(),
            joined.len()
        );
    }
    tracing::info!("Joined {} order rows with service catalog", joined.len());

    Ok(joined)
}

fn prepare(relation: &Relation) -> Result<Relation, EtlError> {
    let mut relation = relation.clone();
    relation.map_column("REPORT_DATE", normalize_ambient)?;
    relation.coerce_columns_to_text(&["SERVICE_ID"])?;
    Ok(relation)
}
