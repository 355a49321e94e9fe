use crate::errors::{EtlError, ResultExt};
use crate::models::Row;
use crate::sink::{BulkSink, ColumnType, DestinationColumn, DestinationSchema};
use async_trait::async_trait;
use sqlx::PgPool;

/// PostgreSQL warehouse sink.
///
/// Never creates or alters tables; destinations must already exist.
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkSink for PgSink {
    async fn describe(&mut self, destination: &str) -> Result<Option<DestinationSchema>, EtlError> {
        // Resolved through search_path exactly as the unqualified INSERT resolves it.
        let columns: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT c.column_name::text, c.data_type::text, c.udt_schema::text, c.udt_name::text
            FROM pg_catalog.pg_class r
            JOIN pg_catalog.pg_namespace n ON n.oid = r.relnamespace
            JOIN information_schema.columns c
              ON c.table_schema::text = n.nspname::text
             AND c.table_name::text = r.relname::text
            WHERE r.oid = to_regclass($1)
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(destination)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("describing {}", destination))?;

        if columns.is_empty() {
            return Ok(None);
        }

        Ok(Some(DestinationSchema {
            table: destination.to_string(),
            columns: columns
                .into_iter()
                .map(|(name, data_type, udt_schema, udt_name)| {
                    DestinationColumn::new(name, column_type(&data_type, &udt_schema, &udt_name))
                })
                .collect(),
        }))
    }

    async fn insert_rows(
        &mut self,
        schema: &DestinationSchema,
        rows: &[Row],
    ) -> Result<u64, EtlError> {
        let sql = insert_statement(schema);
        tracing::debug!("Insert statement for {}: {}", schema.table, sql);

        let mut tx = self
            .pool
            .begin()
            .await
            .with_context(|| format!("starting transaction for {}", schema.table))?;

        let mut inserted = 0u64;
        for (idx, row) in rows.iter().enumerate() {
            let mut query = sqlx::query(&sql);
            for cell in row {
                query = query.bind(cell.render());
            }

            match query.execute(&mut *tx).await {
                Ok(result) => inserted += result.rows_affected(),
                Err(e) => {
                    tracing::error!(
                        "Insert into {} failed at row {}: {}",
                        schema.table,
                        idx + 1,
                        e
                    );
                    // Transaction rolls back on drop
                    return Err(EtlError::Sink(e)).with_context(|| {
                        format!("inserting row {} into {}", idx + 1, schema.table)
                    });
                }
            }
        }

        tx.commit()
            .await
            .with_context(|| format!("committing {}", schema.table))?;

        Ok(inserted)
    }
}

/// Types without a portable `data_type` name are identified by their
/// underlying type, e.g. `public.mood` or `pg_catalog._text`.
fn column_type(data_type: &str, udt_schema: &str, udt_name: &str) -> ColumnType {
    match ColumnType::from_data_type(data_type) {
        ColumnType::Other(_) => ColumnType::Other(format!("{}.{}", udt_schema, udt_name)),
        known => known,
    }
}

/// Positional insert built from the validated destination schema.
///
/// Every value is bound as text and cast to the column type.
pub fn insert_statement(schema: &DestinationSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let values = schema
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| cast_placeholder(i + 1, &c.column_type))
        .collect::<Vec<_>>()
        .join(", ");

    format!("INSERT INTO {} ({}) VALUES ({})", schema.table, columns, values)
}

fn cast_placeholder(position: usize, column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Text => format!("${}", position),
        ColumnType::Other(name) => {
            let qualified = name.split('.').map(quote_ident).collect::<Vec<_>>().join(".");
            format!("CAST(${} AS {})", position, qualified)
        }
        other => format!("CAST(${} AS {})", position, other.sql_name()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
