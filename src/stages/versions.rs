//! Song-version transformer. The canonical linkage back to the legacy row
//! is the `legacy_version_id` column, applied uniformly; the target primary
//! key is never assumed equal to the legacy `Version_ID`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::db::Db;
use crate::model::EntryStatus;
use crate::normalization::{numeric::parse_year, trim_to_opt};
use crate::resolver::{EntityKind, IdResolver};
use crate::stages::transform::EntityTransform;

pub struct SongVersions;

pub struct VersionRow {
    song_id: Option<i64>,
    title: Option<String>,
    year: Option<String>,
    youtube: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl EntityTransform for SongVersions {
    type Row = VersionRow;

    fn stage_name(&self) -> &'static str {
        "song-versions"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::SongVersion
    }

    fn staging_table(&self) -> &'static str {
        "songs_versions"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["version_id", "song_id", "title", "year", "youtube", "status"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT version_id, song_id, title, year, youtube, status
             FROM legacy.songs_versions
             WHERE version_id > $1
             ORDER BY version_id
             LIMIT $2",
        )
        .persistent(false)
        .bind(after)
        .bind(limit)
        .fetch_all(&db.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    row.try_get::<i64, _>(0)?,
                    VersionRow {
                        song_id: row.try_get(1)?,
                        title: row.try_get(2)?,
                        year: row.try_get(3)?,
                        youtube: row.try_get(4)?,
                        status: row.try_get(5)?,
                    },
                ))
            })
            .collect()
    }

    fn validate(&self, _legacy_id: i64, _row: &Self::Row) -> Result<(), &'static str> {
        // A version with a dangling song reference is still migrated; the
        // song FK stays NULL until the reference resolves.
        Ok(())
    }

    async fn upsert(
        &self,
        db: &Db,
        resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        let song_id = row
            .song_id
            .and_then(|legacy| resolver.resolve(EntityKind::Song, legacy));

        sqlx::query(
            "INSERT INTO song_versions
                 (legacy_version_id, song_id, title, year, video_url, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (legacy_version_id) DO UPDATE
             SET song_id = EXCLUDED.song_id,
                 title = EXCLUDED.title,
                 year = EXCLUDED.year,
                 video_url = EXCLUDED.video_url,
                 status = EXCLUDED.status",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(song_id)
        .bind(trim_to_opt(row.title.as_deref()))
        .bind(parse_year(row.year.as_deref()))
        .bind(trim_to_opt(row.youtube.as_deref()))
        .bind(EntryStatus::from_legacy(row.status.as_deref()).as_str())
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}
