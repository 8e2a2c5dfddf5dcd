//! Target-schema bootstrap and staging-schema probes.
//!
//! The normalized tables are created with IF NOT EXISTS so a dev run against
//! an empty Postgres works; against the production store these statements
//! are no-ops. The staging probes let every transformer fail loud on schema
//! drift instead of guessing at the legacy shape.

use anyhow::Result;
use tracing::info;

use crate::db::Db;
use crate::error::MigrateError;

const TARGET_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        legacy_user_id BIGINT UNIQUE,
        login TEXT NOT NULL,
        email TEXT,
        display_name TEXT,
        registered_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id BIGSERIAL PRIMARY KEY,
        legacy_category_id BIGINT UNIQUE,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS rythms (
        id BIGSERIAL PRIMARY KEY,
        legacy_rythm_id BIGINT UNIQUE,
        title TEXT NOT NULL,
        measure TEXT,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS artists (
        id BIGSERIAL PRIMARY KEY,
        legacy_artist_id BIGINT UNIQUE,
        first_name TEXT,
        last_name TEXT NOT NULL,
        nickname TEXT,
        slug TEXT NOT NULL,
        status TEXT NOT NULL,
        notes TEXT,
        created_by BIGINT REFERENCES users(id)
    )",
    "CREATE TABLE IF NOT EXISTS songs (
        id BIGSERIAL PRIMARY KEY,
        legacy_song_id BIGINT UNIQUE,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        status TEXT NOT NULL,
        year INT,
        category_id BIGINT REFERENCES categories(id),
        rythm_id BIGINT REFERENCES rythms(id),
        based_on_song_id BIGINT REFERENCES songs(id),
        based_on_text TEXT,
        notes TEXT,
        created_by BIGINT REFERENCES users(id)
    )",
    "CREATE TABLE IF NOT EXISTS song_versions (
        id BIGSERIAL PRIMARY KEY,
        legacy_version_id BIGINT UNIQUE,
        song_id BIGINT REFERENCES songs(id),
        title TEXT,
        year INT,
        video_url TEXT,
        status TEXT NOT NULL,
        created_by BIGINT REFERENCES users(id)
    )",
    "CREATE TABLE IF NOT EXISTS lists (
        id BIGSERIAL PRIMARY KEY,
        legacy_list_id BIGINT UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        created_by BIGINT REFERENCES users(id)
    )",
    "CREATE TABLE IF NOT EXISTS list_groups (
        id BIGSERIAL PRIMARY KEY,
        legacy_group_id BIGINT UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        created_by BIGINT REFERENCES users(id)
    )",
    "CREATE TABLE IF NOT EXISTS list_items (
        id BIGSERIAL PRIMARY KEY,
        legacy_item_id BIGINT UNIQUE,
        list_id BIGINT REFERENCES lists(id),
        song_id BIGINT REFERENCES songs(id),
        song_version_id BIGINT REFERENCES song_versions(id),
        position INT NOT NULL DEFAULT 0,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS song_credits (
        song_id BIGINT NOT NULL REFERENCES songs(id),
        artist_id BIGINT NOT NULL REFERENCES artists(id),
        role TEXT NOT NULL,
        UNIQUE (song_id, artist_id, role)
    )",
    "CREATE TABLE IF NOT EXISTS song_categories (
        song_id BIGINT NOT NULL REFERENCES songs(id),
        category_id BIGINT NOT NULL REFERENCES categories(id),
        UNIQUE (song_id, category_id)
    )",
    "CREATE TABLE IF NOT EXISTS song_version_artists (
        song_version_id BIGINT NOT NULL REFERENCES song_versions(id),
        artist_id BIGINT NOT NULL REFERENCES artists(id),
        role TEXT NOT NULL,
        UNIQUE (song_version_id, artist_id, role)
    )",
    "CREATE TABLE IF NOT EXISTS list_members (
        list_id BIGINT NOT NULL REFERENCES lists(id),
        user_id BIGINT NOT NULL REFERENCES users(id),
        role TEXT NOT NULL,
        UNIQUE (list_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS list_group_members (
        group_id BIGINT NOT NULL REFERENCES list_groups(id),
        user_id BIGINT NOT NULL REFERENCES users(id),
        role TEXT NOT NULL,
        UNIQUE (group_id, user_id)
    )",
];

/// Create the staging schema and any missing target tables.
pub async fn bootstrap_target(db: &Db) -> Result<()> {
    sqlx::raw_sql("CREATE SCHEMA IF NOT EXISTS legacy")
        .execute(&db.pool)
        .await?;
    for ddl in TARGET_DDL {
        sqlx::raw_sql(ddl).execute(&db.pool).await?;
    }
    info!(tables = TARGET_DDL.len(), "target schema bootstrap complete");
    Ok(())
}

pub async fn table_exists(db: &Db, schema: &str, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2
        )",
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .fetch_one(&db.pool)
    .await?;
    Ok(exists)
}

pub async fn table_column_exists(db: &Db, schema: &str, table: &str, column: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
        )",
    )
    .persistent(false)
    .bind(schema)
    .bind(table)
    .bind(column)
    .fetch_one(&db.pool)
    .await?;
    Ok(exists)
}

/// Verify the staging copy of a legacy table carries every column the
/// calling stage reads. Missing table or column is a SchemaDrift hard stop
/// for that stage.
pub async fn require_staging_columns(db: &Db, table: &str, columns: &[&str]) -> Result<()> {
    if !table_exists(db, "legacy", table).await? {
        return Err(MigrateError::SchemaDrift {
            table: table.to_string(),
            column: "*".to_string(),
        }
        .into());
    }
    for column in columns {
        if !table_column_exists(db, "legacy", table, column).await? {
            return Err(MigrateError::SchemaDrift {
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }
    }
    Ok(())
}
