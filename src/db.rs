use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    MySqlPool, PgPool,
};
use tracing::{info, instrument};

use crate::error::MigrateError;

/// Target store handle (normalized Postgres schema). Passed explicitly into
/// each stage; there are no global connection singletons.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).map_err(MigrateError::TargetUnavailable)?;

        // Be explicit about TLS when the DSN asks for it.
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        // PgBouncer txn mode safe: the app traffic that shares this store
        // commonly runs behind a pooler, and the pipeline's dynamic SQL
        // gains nothing from a statement cache.
        connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .map_err(MigrateError::TargetUnavailable)?;
        info!("connected to target db");
        Ok(Self { pool })
    }
}

/// Read-only handle on the legacy MySQL source. Shared across stages without
/// locking concerns; the pipeline never writes through it.
#[derive(Clone)]
pub struct LegacyDb {
    pub pool: MySqlPool,
}

impl LegacyDb {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let connect_options =
            MySqlConnectOptions::from_str(database_url).map_err(MigrateError::SourceUnavailable)?;

        // Snapshot reads are sequential; two connections cover the stream
        // plus the occasional information_schema probe.
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await
            .map_err(MigrateError::SourceUnavailable)?;
        info!("connected to legacy source");
        Ok(Self { pool })
    }

    /// Name of the database the DSN points at, needed for
    /// information_schema lookups.
    pub async fn current_database(&self) -> Result<String> {
        let name: String = sqlx::query_scalar("SELECT DATABASE()")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrateError::SourceUnavailable)?;
        Ok(name)
    }
}
