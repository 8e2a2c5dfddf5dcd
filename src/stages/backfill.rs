//! Deferred-reference backfill passes.
//!
//! Ownership (`created_by`) and the song self-reference (`based_on_song_id`)
//! cannot be set during the first transform pass because the referenced row
//! may not exist yet. Both passes run as set-based UPDATE ... FROM statements
//! over the staging copy, touch only rows where the column is still NULL, and
//! report how many references stayed unresolved.

use anyhow::Result;
use sqlx::Row;
use tracing::info;

use crate::db::Db;
use crate::schema;
use crate::stages::StageReport;

/// Target tables that carry a creator reference, with the staging table and
/// columns the reference is recovered from.
const CREATED_BY_SOURCES: &[(&str, &str, &str, &str)] = &[
    ("songs", "legacy_song_id", "songs", "song_id"),
    ("song_versions", "legacy_version_id", "songs_versions", "version_id"),
    ("lists", "legacy_list_id", "lists", "list_id"),
];

pub async fn backfill_created_by(db: &Db, dry_run: bool) -> Result<StageReport> {
    let mut report = StageReport::new("backfill-created-by");

    for &(target, legacy_col, staging, staging_id) in CREATED_BY_SOURCES {
        schema::require_staging_columns(db, staging, &[staging_id, "user_id"]).await?;

        let mut updated = 0;
        if !dry_run {
            updated = sqlx::query(&format!(
                "UPDATE {target} t
                 SET created_by = u.id
                 FROM legacy.{staging} ls
                 JOIN users u ON u.legacy_user_id = ls.user_id
                 WHERE t.{legacy_col} = ls.{staging_id}
                   AND t.created_by IS NULL"
            ))
            .persistent(false)
            .execute(&db.pool)
            .await?
            .rows_affected();
            report.updated += updated;
            info!(table = target, updated, "created_by backfilled");
        }

        let unmatched: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) FROM {target}
             WHERE {legacy_col} IS NOT NULL AND created_by IS NULL"
        ))
        .persistent(false)
        .fetch_one(&db.pool)
        .await?
        .try_get(0)?;
        report.skip_n("unmatched-creator", unmatched as u64);
        report.processed += updated + unmatched as u64;
    }
    Ok(report)
}

pub async fn backfill_based_on(db: &Db, dry_run: bool) -> Result<StageReport> {
    schema::require_staging_columns(db, "songs", &["song_id", "based_on"]).await?;
    let mut report = StageReport::new("backfill-based-on");

    // The legacy column mixes numeric references with free text; only
    // all-digit values join against migrated songs, guarded so the cast
    // can never fail mid-statement.
    if !dry_run {
        let updated = sqlx::query(
            "UPDATE songs t
             SET based_on_song_id = parent.id
             FROM legacy.songs ls
             JOIN songs parent ON parent.legacy_song_id =
                 CASE WHEN ls.based_on ~ '^[0-9]+$'
                      THEN ls.based_on::bigint
                      ELSE NULL END
             WHERE t.legacy_song_id = ls.song_id
               AND t.based_on_song_id IS NULL",
        )
        .persistent(false)
        .execute(&db.pool)
        .await?
        .rows_affected();
        report.updated += updated;
        info!(updated, "based_on_song_id backfilled");
    }

    let unmatched: i64 = sqlx::query(
        "SELECT COUNT(*)
         FROM legacy.songs ls
         JOIN songs t ON t.legacy_song_id = ls.song_id
         WHERE ls.based_on ~ '^[0-9]+$'
           AND t.based_on_song_id IS NULL",
    )
    .persistent(false)
    .fetch_one(&db.pool)
    .await?
    .try_get(0)?;
    report.skip_n("dangling-based-on", unmatched as u64);
    report.processed += report.updated + unmatched as u64;
    Ok(report)
}
