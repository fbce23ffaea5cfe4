use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

/// Postgres connection pool for the stall store. Pool sizing and the acquire
/// deadline come from [`DatabaseConfig`]; the URL is passed separately since
/// an absent URL means the process runs on the in-memory store instead.
#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Postgres>,
}

impl Database {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(url)
            .await?;

        Ok(Database { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("applying stall schema migrations");
        sqlx::migrate!("./src/migrations").run(&self.pool).await?;
        info!("stall schema up to date");
        Ok(())
    }
}
