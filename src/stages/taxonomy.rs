//! Transformers for the small taxonomy entities: song categories and
//! rythms. Both are keyed by their legacy numeric id and carry a slug
//! derived from the title.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::db::Db;
use crate::normalization::{slug::slugify, trim_to_opt};
use crate::resolver::{EntityKind, IdResolver};
use crate::stages::transform::EntityTransform;

/// Slug for taxonomy entities; these are few enough that the bare title slug
/// is unique, with the legacy id as a last resort for junk titles.
fn taxonomy_slug(legacy_id: i64, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        legacy_id.to_string()
    } else {
        slug
    }
}

pub struct Categories;

pub struct CategoryRow {
    title: Option<String>,
    description: Option<String>,
}

#[async_trait]
impl EntityTransform for Categories {
    type Row = CategoryRow;

    fn stage_name(&self) -> &'static str {
        "categories"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::Category
    }

    fn staging_table(&self) -> &'static str {
        "songs_categories"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["category_id", "title", "description"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT category_id, title, description
             FROM legacy.songs_categories
             WHERE category_id > $1
             ORDER BY category_id
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
                    CategoryRow {
                        title: row.try_get(1)?,
                        description: row.try_get(2)?,
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
        _resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        let title = trim_to_opt(row.title.as_deref()).unwrap_or_default();
        sqlx::query(
            "INSERT INTO categories (legacy_category_id, title, slug, description)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (legacy_category_id) DO UPDATE
             SET title = EXCLUDED.title,
                 slug = EXCLUDED.slug,
                 description = EXCLUDED.description",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(&title)
        .bind(taxonomy_slug(legacy_id, &title))
        .bind(trim_to_opt(row.description.as_deref()))
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

pub struct Rythms;

pub struct RythmRow {
    title: Option<String>,
    measure: Option<String>,
    notes: Option<String>,
}

#[async_trait]
impl EntityTransform for Rythms {
    type Row = RythmRow;

    fn stage_name(&self) -> &'static str {
        "rythms"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::Rythm
    }

    fn staging_table(&self) -> &'static str {
        "rythms"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["rythm_id", "title", "measure", "notes"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT rythm_id, title, measure, notes
             FROM legacy.rythms
             WHERE rythm_id > $1
             ORDER BY rythm_id
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
                    RythmRow {
                        title: row.try_get(1)?,
                        measure: row.try_get(2)?,
                        notes: row.try_get(3)?,
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
        _resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO rythms (legacy_rythm_id, title, measure, notes)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (legacy_rythm_id) DO UPDATE
             SET title = EXCLUDED.title,
                 measure = EXCLUDED.measure,
                 notes = EXCLUDED.notes",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(trim_to_opt(row.title.as_deref()).unwrap_or_default())
        .bind(trim_to_opt(row.measure.as_deref()))
        .bind(trim_to_opt(row.notes.as_deref()))
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_slug_falls_back_to_id() {
        assert_eq!(taxonomy_slug(3, "Λαϊκό"), "λαικο");
        assert_eq!(taxonomy_slug(3, "???"), "3");
    }
}
