//! Relationship reconcilers for song credits, song-category mappings and
//! version-artist role assignments.
//!
//! Replace-set protocol: per owning entity the existing association rows are
//! deleted and the freshly computed set inserted inside one transaction, so
//! a concurrent reader never observes a half-replaced set and repeated runs
//! converge regardless of prior state. Exact duplicates are absorbed with
//! ON CONFLICT DO NOTHING; unresolvable legacy ids are counted and skipped.

use anyhow::Result;
use sqlx::{QueryBuilder, Row};

use crate::db::Db;
use crate::model::{CreditRole, VersionRole};
use crate::normalization::idlist::parse_legacy_id_list;
use crate::resolver::{EntityKind, IdResolver};
use crate::schema;
use crate::stages::{CancelFlag, StageReport};

/// Replace the role-tagged association set of one owner. Returns the number
/// of rows written.
pub(crate) async fn replace_role_set(
    db: &Db,
    table: &str,
    owner_col: &str,
    ref_col: &str,
    owner_id: i64,
    set: &[(i64, &'static str)],
) -> Result<u64> {
    let mut tx = db.pool.begin().await?;
    sqlx::query(&format!("DELETE FROM {table} WHERE {owner_col} = $1"))
        .persistent(false)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    let mut written = 0;
    if !set.is_empty() {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new(format!("INSERT INTO {table} ({owner_col}, {ref_col}, role) "));
        qb.push_values(set, |mut b, (target_id, role)| {
            b.push_bind(owner_id).push_bind(*target_id).push_bind(*role);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        written = qb.build().persistent(false).execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Replace a plain (role-less) association set of one owner.
pub(crate) async fn replace_plain_set(
    db: &Db,
    table: &str,
    owner_col: &str,
    ref_col: &str,
    owner_id: i64,
    set: &[i64],
) -> Result<u64> {
    let mut tx = db.pool.begin().await?;
    sqlx::query(&format!("DELETE FROM {table} WHERE {owner_col} = $1"))
        .persistent(false)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    let mut written = 0;
    if !set.is_empty() {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new(format!("INSERT INTO {table} ({owner_col}, {ref_col}) "));
        qb.push_values(set, |mut b, target_id| {
            b.push_bind(owner_id).push_bind(*target_id);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        written = qb.build().persistent(false).execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Resolve a delimited legacy id-list field into target ids, counting misses
/// on the report.
fn resolve_refs(
    resolver: &IdResolver,
    kind: EntityKind,
    raw: Option<&str>,
    report: &mut StageReport,
) -> Vec<i64> {
    let mut out = Vec::new();
    for legacy_id in parse_legacy_id_list(raw) {
        match resolver.resolve(kind, legacy_id) {
            Some(id) => out.push(id),
            None => report.skip("unresolved-reference"),
        }
    }
    out
}

pub async fn reconcile_song_credits(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    schema::require_staging_columns(db, "songs", &["song_id", "composer", "lyricist"]).await?;
    let mut report = StageReport::new("song-credits");

    let mut after = i64::MIN;
    loop {
        cancel.check("batch")?;
        let rows = sqlx::query(
            "SELECT song_id, composer, lyricist
             FROM legacy.songs
             WHERE song_id > $1
             ORDER BY song_id
             LIMIT $2",
        )
        .persistent(false)
        .bind(after)
        .bind(batch_size)
        .fetch_all(&db.pool)
        .await?;
        let Some(last) = rows.last() else { break };
        after = last.try_get::<i64, _>(0)?;

        for row in &rows {
            report.processed += 1;
            let legacy_song_id: i64 = row.try_get(0)?;
            let Some(song_id) = resolver.resolve(EntityKind::Song, legacy_song_id) else {
                report.skip("owner-unresolved");
                continue;
            };
            let composer: Option<String> = row.try_get(1)?;
            let lyricist: Option<String> = row.try_get(2)?;

            let mut set: Vec<(i64, &'static str)> = Vec::new();
            for artist_id in resolve_refs(resolver, EntityKind::Artist, composer.as_deref(), &mut report)
            {
                set.push((artist_id, CreditRole::Composer.as_str()));
            }
            for artist_id in resolve_refs(resolver, EntityKind::Artist, lyricist.as_deref(), &mut report)
            {
                set.push((artist_id, CreditRole::Lyricist.as_str()));
            }

            if !dry_run {
                report.created +=
                    replace_role_set(db, "song_credits", "song_id", "artist_id", song_id, &set)
                        .await?;
            } else {
                report.created += set.len() as u64;
            }
        }
    }
    Ok(report)
}

pub async fn reconcile_song_categories(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    schema::require_staging_columns(db, "songs", &["song_id", "category_id"]).await?;
    let mut report = StageReport::new("song-categories");

    let mut after = i64::MIN;
    loop {
        cancel.check("batch")?;
        let rows = sqlx::query(
            "SELECT song_id, category_id
             FROM legacy.songs
             WHERE song_id > $1
             ORDER BY song_id
             LIMIT $2",
        )
        .persistent(false)
        .bind(after)
        .bind(batch_size)
        .fetch_all(&db.pool)
        .await?;
        let Some(last) = rows.last() else { break };
        after = last.try_get::<i64, _>(0)?;

        for row in &rows {
            report.processed += 1;
            let legacy_song_id: i64 = row.try_get(0)?;
            let Some(song_id) = resolver.resolve(EntityKind::Song, legacy_song_id) else {
                report.skip("owner-unresolved");
                continue;
            };
            let categories: Option<String> = row.try_get(1)?;
            let set = resolve_refs(
                resolver,
                EntityKind::Category,
                categories.as_deref(),
                &mut report,
            );

            if !dry_run {
                report.created += replace_plain_set(
                    db,
                    "song_categories",
                    "song_id",
                    "category_id",
                    song_id,
                    &set,
                )
                .await?;
            } else {
                report.created += set.len() as u64;
            }
        }
    }
    Ok(report)
}

/// The role each version-level id-list column implies.
const VERSION_ROLE_COLUMNS: &[(&str, VersionRole)] = &[
    ("singers", VersionRole::SingerFront),
    ("singers_back", VersionRole::SingerBack),
    ("soloists", VersionRole::Soloist),
    ("musicians", VersionRole::Musician),
    ("composer", VersionRole::Composer),
    ("lyricist", VersionRole::Lyricist),
];

pub async fn reconcile_version_artists(
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    schema::require_staging_columns(
        db,
        "songs_versions",
        &["version_id", "singers", "singers_back", "soloists", "musicians", "composer", "lyricist"],
    )
    .await?;
    let mut report = StageReport::new("version-artists");

    let mut after = i64::MIN;
    loop {
        cancel.check("batch")?;
        let rows = sqlx::query(
            "SELECT version_id, singers, singers_back, soloists, musicians, composer, lyricist
             FROM legacy.songs_versions
             WHERE version_id > $1
             ORDER BY version_id
             LIMIT $2",
        )
        .persistent(false)
        .bind(after)
        .bind(batch_size)
        .fetch_all(&db.pool)
        .await?;
        let Some(last) = rows.last() else { break };
        after = last.try_get::<i64, _>(0)?;

        for row in &rows {
            report.processed += 1;
            let legacy_version_id: i64 = row.try_get(0)?;
            let Some(version_id) = resolver.resolve(EntityKind::SongVersion, legacy_version_id)
            else {
                report.skip("owner-unresolved");
                continue;
            };

            let mut set: Vec<(i64, &'static str)> = Vec::new();
            for (idx, (_, role)) in VERSION_ROLE_COLUMNS.iter().enumerate() {
                let raw: Option<String> = row.try_get(idx + 1)?;
                for artist_id in
                    resolve_refs(resolver, EntityKind::Artist, raw.as_deref(), &mut report)
                {
                    set.push((artist_id, role.as_str()));
                }
            }

            if !dry_run {
                report.created += replace_role_set(
                    db,
                    "song_version_artists",
                    "song_version_id",
                    "artist_id",
                    version_id,
                    &set,
                )
                .await?;
            } else {
                report.created += set.len() as u64;
            }
        }
    }
    Ok(report)
}
