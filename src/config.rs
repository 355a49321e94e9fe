use crate::loader::ExtractFiles;
use chrono::NaiveDate;
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;

/// Connection options for the warehouse sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    /// Full connection URL; takes precedence over the individual options.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sink: SinkConfig,
    /// Directory the attachment ingestor writes into and the loader reads from.
    pub staging_dir: PathBuf,
    /// Filesystem mailbox to harvest attachments from; harvesting is skipped when unset.
    pub inbox_dir: Option<PathBuf>,
    /// Fixed reference date for the watermark; today when unset.
    pub reference_date: Option<NaiveDate>,
    pub files: ExtractFiles,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })
            .transpose()?;

        // Individual options are only mandatory without a full URL.
        let required = |key: &str| -> anyhow::Result<String> {
            match std::env::var(key) {
                Ok(value) if !value.trim().is_empty() => Ok(value),
                Ok(_) if database_url.is_some() => Ok(String::new()),
                Ok(_) => anyhow::bail!("{} cannot be empty", key),
                Err(_) if database_url.is_some() => Ok(String::new()),
                Err(_) => anyhow::bail!("{} or DATABASE_URL environment variable required", key),
            }
        };

        let sink = SinkConfig {
            host: required("DB_HOST")?,
            user: required("DB_USER")?,
            password: required("DB_PASSWORD")?,
            database: required("DB_NAME")?,
            port: std::env::var("DB_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_PORT must be a valid number between 1-65535"))?,
            database_url,
        };

        let defaults = ExtractFiles::default();
        let file = |key: &str, default: String| {
            std::env::var(key)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(default)
        };

        let config = Self {
            sink,
            staging_dir: std::env::var("STAGING_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("attachments")),
            inbox_dir: std::env::var("INBOX_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            reference_date: std::env::var("REFERENCE_DATE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
                        anyhow::anyhow!("REFERENCE_DATE must be a YYYY-MM-DD date, got '{}'", s)
                    })
                })
                .transpose()?,
            files: ExtractFiles {
                active: file("ACTIVE_FILE", defaults.active),
                customer: file("CUSTOMER_FILE", defaults.customer),
                order: file("ORDER_FILE", defaults.order),
                service: file("SERVICE_FILE", defaults.service),
            },
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match &config.sink.database_url {
            Some(url) => tracing::debug!("Database URL: {}", redacted_url(url)),
            None => tracing::debug!(
                "Database: {}@{}:{}/{}",
                config.sink.user,
                config.sink.host,
                config.sink.port,
                config.sink.database
            ),
        }
        tracing::debug!("Staging directory: {}", config.staging_dir.display());
        if let Some(ref inbox) = config.inbox_dir {
            tracing::info!("Attachment inbox configured: {}", inbox.display());
        }
        if let Some(date) = config.reference_date {
            tracing::info!("Reference date pinned to {}", date);
        }

        Ok(config)
    }
}

/// Connection target of a URL without its credentials.
fn redacted_url(url: &str) -> String {
    match url.parse::<PgConnectOptions>() {
        Ok(opts) => format!(
            "{}:{}/{}",
            opts.get_host(),
            opts.get_port(),
            opts.get_database().unwrap_or_default()
        ),
        Err(_) => "<unparseable>".to_string(),
    }
}
