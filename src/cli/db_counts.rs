//! Row-count diagnostics for the migration target and the staging copy.
//!
//! Deliberately lenient: a table that does not exist yet simply counts as
//! zero, so the command is usable against a fresh database, a half-migrated
//! one, or one bootstrapped by an older build.

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::str::FromStr;

use crate::resolver::EntityKind;
use crate::stages::snapshot::LEGACY_TABLES;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
}

const ASSOCIATION_TABLES: &[&str] = &[
    "song_credits",
    "song_categories",
    "song_version_artists",
    "list_members",
    "list_group_members",
];

pub async fn run(cfg: DbCountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = match cfg.database_url {
        Some(url) => url,
        None => env_util::target_db_url()?,
    };
    let mut connect_options = PgConnectOptions::from_str(&db_url)?.statement_cache_capacity(0);
    if db_url.contains("sslmode=require") {
        connect_options = connect_options.ssl_mode(PgSslMode::Require);
    }
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(connect_options)
        .await?;

    fn is_undefined_table_error(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
            _ => false,
        }
    }

    macro_rules! count {
        ($sql:expr) => {
            match sqlx::query_scalar::<_, i64>(&$sql)
                .persistent(false)
                .fetch_one(&pool)
                .await
            {
                Ok(val) => val,
                Err(e) if is_undefined_table_error(&e) => 0,
                Err(e) => return Err(e.into()),
            }
        };
    }

    use std::fmt::Write as _;
    let mut out = String::new();

    writeln!(out, "TARGET ENTITY COUNTS:").ok();
    for kind in EntityKind::ALL {
        let (table, legacy_col) = kind.target();
        let total = count!(format!("SELECT count(*) FROM public.{table}"));
        let migrated =
            count!(format!("SELECT count(*) FROM public.{table} WHERE {legacy_col} IS NOT NULL"));
        writeln!(out, "  {table}: {total} (migrated: {migrated})").ok();
    }

    writeln!(out, "ASSOCIATION COUNTS:").ok();
    for table in ASSOCIATION_TABLES {
        let total = count!(format!("SELECT count(*) FROM public.{table}"));
        writeln!(out, "  {table}: {total}").ok();
    }

    writeln!(out, "STAGING COUNTS (legacy schema):").ok();
    for table in LEGACY_TABLES {
        let total = count!(format!("SELECT count(*) FROM legacy.{table}"));
        writeln!(out, "  legacy.{table}: {total}").ok();
    }

    let songs_without_creator = count!(
        "SELECT count(*) FROM public.songs WHERE legacy_song_id IS NOT NULL AND created_by IS NULL"
            .to_string()
    );
    let dangling_versions = count!(
        "SELECT count(*) FROM public.song_versions WHERE legacy_version_id IS NOT NULL AND song_id IS NULL"
            .to_string()
    );
    writeln!(out, "GAPS:").ok();
    writeln!(out, "  songs without created_by: {songs_without_creator}").ok();
    writeln!(out, "  versions without a song: {dangling_versions}").ok();

    println!("{}", out);
    Ok(())
}
