use crate::config::SinkConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Opens the warehouse connection. The job is sequential, so one connection suffices.
    pub async fn connect(config: &SinkConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options(config)?)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens a pool straight from a connection URL (tests and utilities).
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }
}

pub fn connect_options(config: &SinkConfig) -> Result<PgConnectOptions, sqlx::Error> {
    match &config.database_url {
        Some(url) => url.parse(),
        None => Ok(PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_config(database_url: Option<&str>) -> SinkConfig {
        SinkConfig {
            host: "warehouse".into(),
            user: "etl".into(),
            password: "p@ss/word".into(),
            database: "analytics".into(),
            port: 5480,
            database_url: database_url.map(String::from),
        }
    }

    #[test]
    fn test_options_from_parts() {
        let opts = connect_options(&sink_config(None)).unwrap();
        assert_eq!(opts.get_host(), "warehouse");
        assert_eq!(opts.get_port(), 5480);
        assert_eq!(opts.get_username(), "etl");
        assert_eq!(opts.get_database(), Some("analytics"));
    }

    #[test]
    fn test_url_override_wins() {
        let opts = connect_options(&sink_config(Some("postgres://u:p@other:6000/db"))).unwrap();
        assert_eq!(opts.get_host(), "other");
        assert_eq!(opts.get_port(), 6000);
        assert_eq!(opts.get_database(), Some("db"));
    }
}
