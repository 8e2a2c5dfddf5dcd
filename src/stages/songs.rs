//! Song transformer. The legacy row is heavily denormalized: the category
//! field is a comma-separated id list (first resolvable entry becomes the
//! primary category; the full set is reconciled into `song_categories`
//! later), `Based_On` holds either a legacy song id or free text, and year
//! is a loose varchar.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::db::Db;
use crate::model::EntryStatus;
use crate::normalization::{
    idlist::parse_legacy_id_list,
    numeric::{is_numeric_id, parse_year},
    slug::slug_with_id,
    trim_to_opt,
};
use crate::resolver::{EntityKind, IdResolver};
use crate::stages::transform::EntityTransform;

pub struct Songs;

pub struct SongRow {
    title: Option<String>,
    category_ids: Option<String>,
    rythm_id: Option<i64>,
    based_on: Option<String>,
    status: Option<String>,
    notes: Option<String>,
    year: Option<String>,
}

impl SongRow {
    /// Non-numeric `Based_On` is free text; the structured self-reference
    /// stays NULL and is linked by the backfill pass for numeric values.
    fn based_on_text(&self) -> Option<String> {
        let text = trim_to_opt(self.based_on.as_deref())?;
        if is_numeric_id(&text) {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl EntityTransform for Songs {
    type Row = SongRow;

    fn stage_name(&self) -> &'static str {
        "songs"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::Song
    }

    fn staging_table(&self) -> &'static str {
        "songs"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["song_id", "title", "category_id", "rythm_id", "based_on", "status", "notes", "year"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT song_id, title, category_id, rythm_id, based_on, status, notes, year
             FROM legacy.songs
             WHERE song_id > $1
             ORDER BY song_id
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
                    SongRow {
                        title: row.try_get(1)?,
                        category_ids: row.try_get(2)?,
                        rythm_id: row.try_get(3)?,
                        based_on: row.try_get(4)?,
                        status: row.try_get(5)?,
                        notes: row.try_get(6)?,
                        year: row.try_get(7)?,
                    },
                ))
            })
            .collect()
    }

    fn validate(&self, _legacy_id: i64, row: &Self::Row) -> Result<(), &'static str> {
        trim_to_opt(row.title.as_deref())
            .map(|_| ())
            .ok_or("missing-title")
    }

    async fn upsert(
        &self,
        db: &Db,
        resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        let title = trim_to_opt(row.title.as_deref()).unwrap_or_default();

        // First resolvable category is the primary one; unresolvable ids
        // simply leave the FK NULL (never a blocker).
        let category_id = parse_legacy_id_list(row.category_ids.as_deref())
            .into_iter()
            .find_map(|legacy| resolver.resolve(EntityKind::Category, legacy));
        let rythm_id = row
            .rythm_id
            .and_then(|legacy| resolver.resolve(EntityKind::Rythm, legacy));

        // created_by and based_on_song_id are deliberately absent from the
        // update set: they are backfilled and must survive re-runs.
        sqlx::query(
            "INSERT INTO songs
                 (legacy_song_id, title, slug, status, year, category_id, rythm_id,
                  based_on_text, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (legacy_song_id) DO UPDATE
             SET title = EXCLUDED.title,
                 slug = EXCLUDED.slug,
                 status = EXCLUDED.status,
                 year = EXCLUDED.year,
                 category_id = EXCLUDED.category_id,
                 rythm_id = EXCLUDED.rythm_id,
                 based_on_text = EXCLUDED.based_on_text,
                 notes = EXCLUDED.notes",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(&title)
        .bind(slug_with_id(legacy_id, &title))
        .bind(EntryStatus::from_legacy(row.status.as_deref()).as_str())
        .bind(parse_year(row.year.as_deref()))
        .bind(category_id)
        .bind(rythm_id)
        .bind(row.based_on_text())
        .bind(trim_to_opt(row.notes.as_deref()))
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(based_on: Option<&str>) -> SongRow {
        SongRow {
            title: Some("X".into()),
            category_ids: None,
            rythm_id: None,
            based_on: based_on.map(str::to_string),
            status: None,
            notes: None,
            year: None,
        }
    }

    #[test]
    fn numeric_based_on_is_not_free_text() {
        assert_eq!(row(Some(" 57 ")).based_on_text(), None);
    }

    #[test]
    fn textual_based_on_is_kept_verbatim() {
        assert_eq!(
            row(Some(" παραδοσιακό ")).based_on_text(),
            Some("παραδοσιακό".to_string())
        );
        assert_eq!(row(Some("  ")).based_on_text(), None);
        assert_eq!(row(None).based_on_text(), None);
    }
}
