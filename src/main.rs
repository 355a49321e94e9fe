use rust_subscription_etl::config::Config;
use rust_subscription_etl::db::Database;
use rust_subscription_etl::db_storage::PgSink;
use rust_subscription_etl::ingest::{harvest, DirectoryMailbox};
use rust_subscription_etl::pipeline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs one batch.
///
/// - Harvests attachments into the staging directory when `INBOX_DIR` is set.
/// - Loads the four extracts and builds `active_final` and `order_final`.
/// - Appends both tables to the warehouse and prints the run report as JSON.
///
/// Exits with an error if any step or either load fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_subscription_etl=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    if let Some(ref inbox) = config.inbox_dir {
        let mailbox = DirectoryMailbox::new(inbox);
        harvest(&mailbox, &config.staging_dir)?;
    }

    let reference_date = config
        .reference_date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let db = Database::connect(&config.sink).await?;
    tracing::info!("Database connection established");
    let mut sink = PgSink::new(db.pool.clone());

    let report = pipeline::run_from_staging(&config, &mut sink, reference_date).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.succeeded() {
        anyhow::bail!("run {} did not load every destination table", report.run_id);
    }

    tracing::info!("Run {} complete", report.run_id);
    Ok(())
}
