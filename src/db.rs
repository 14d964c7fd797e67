use crate::config::AppConfig;
use crate::errors::AppError;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Shared handle every service and command holds on to.
pub type DbPool = DatabaseConnection;

/// Pool sizing and timeouts derived from [`AppConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let db = &cfg.database;
        // an in-memory sqlite database lives inside a single connection
        let max_connections = if is_in_memory_sqlite(&db.url) {
            1
        } else {
            db.max_connections
        };
        Self {
            url: db.url.clone(),
            max_connections,
            min_connections: db.min_connections.min(max_connections),
            connect_timeout: Duration::from_secs(db.connect_timeout_secs),
            idle_timeout: Duration::from_secs(db.idle_timeout_secs),
            acquire_timeout: Duration::from_secs(db.acquire_timeout_secs),
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(self.url.clone());
        opt.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .sqlx_logging(false);
        opt
    }
}

fn is_in_memory_sqlite(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

/// Opens the tenant database described by `cfg`.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, AppError> {
    let settings = PoolSettings::from_config(cfg);
    debug!(?settings, "opening tenant database");
    gauge!("tenantdesk_db.max_connections", settings.max_connections as f64);

    match Database::connect(settings.connect_options()).await {
        Ok(pool) => {
            info!(max_connections = settings.max_connections, "tenant database ready");
            Ok(pool)
        }
        Err(e) => {
            counter!("tenantdesk_db.connection_failures", 1);
            error!(error = %e, "could not open tenant database");
            Err(AppError::DatabaseError(e))
        }
    }
}

/// Brings the schema up to date. Safe to call on every start.
pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    let started = Instant::now();
    let outcome = crate::migrator::Migrator::up(pool, None).await;
    let elapsed = started.elapsed();
    histogram!("tenantdesk_db.migration.duration", elapsed);

    match outcome {
        Ok(()) => {
            info!(?elapsed, "schema migrations applied");
            Ok(())
        }
        Err(e) => {
            error!(?elapsed, error = %e, "schema migrations failed");
            Err(AppError::DatabaseError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> AppConfig {
        AppConfig::new(url.to_string(), "k".repeat(32), "test".to_string())
    }

    #[test]
    fn in_memory_sqlite_gets_a_single_connection() {
        let mut cfg = config("sqlite::memory:");
        cfg.database.max_connections = 10;
        cfg.database.min_connections = 4;
        let settings = PoolSettings::from_config(&cfg);
        assert_eq!(settings.max_connections, 1);
        assert_eq!(settings.min_connections, 1);

        let mut cfg = config("postgres://localhost/tenantdesk");
        cfg.database.max_connections = 10;
        assert_eq!(PoolSettings::from_config(&cfg).max_connections, 10);
    }

    #[tokio::test]
    async fn opens_and_migrates_in_memory_sqlite() {
        let pool = establish_connection_from_app_config(&config("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        // second run finds nothing left to apply
        run_migrations(&pool).await.unwrap();
        pool.ping().await.unwrap();
    }
}
