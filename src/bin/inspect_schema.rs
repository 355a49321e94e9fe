//! Utility to inspect the destination tables and print their column layout.

use rust_subscription_etl::config::Config;
use rust_subscription_etl::db::Database;
use rust_subscription_etl::db_storage::PgSink;
use rust_subscription_etl::pipeline::{ACTIVE_FINAL, ORDER_FINAL};
use rust_subscription_etl::sink::BulkSink;

/// Connects to the warehouse and lists the columns of each destination table,
/// in the positional order inserts rely on.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let db = Database::connect(&config.sink).await?;
    let mut sink = PgSink::new(db.pool.clone());

    for table in [ACTIVE_FINAL, ORDER_FINAL] {
        match sink.describe(table).await? {
            Some(schema) => {
                println!("{}:", table);
                for (pos, column) in schema.columns.iter().enumerate() {
                    println!(
                        "  {}. {}: {}",
                        pos + 1,
                        column.name,
                        column.column_type.sql_name()
                    );
                }
            }
            None => println!("{}: (missing)", table),
        }
        println!();
    }

    Ok(())
}
