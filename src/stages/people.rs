//! Transformers for people: migrated WordPress accounts and artists.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::Row;

use crate::db::Db;
use crate::model::EntryStatus;
use crate::normalization::{slug::slug_with_id, trim_to_opt};
use crate::resolver::{EntityKind, IdResolver};
use crate::stages::transform::EntityTransform;

pub struct Users;

pub struct UserRow {
    login: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    registered: Option<NaiveDateTime>,
}

#[async_trait]
impl EntityTransform for Users {
    type Row = UserRow;

    fn stage_name(&self) -> &'static str {
        "users"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::User
    }

    fn staging_table(&self) -> &'static str {
        "wp_users"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["id", "user_login", "user_email", "display_name", "user_registered"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT id, user_login, user_email, display_name, user_registered
             FROM legacy.wp_users
             WHERE id > $1
             ORDER BY id
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
                    UserRow {
                        login: row.try_get(1)?,
                        email: row.try_get(2)?,
                        display_name: row.try_get(3)?,
                        registered: row.try_get(4)?,
                    },
                ))
            })
            .collect()
    }

    fn validate(&self, _legacy_id: i64, row: &Self::Row) -> Result<(), &'static str> {
        trim_to_opt(row.login.as_deref())
            .map(|_| ())
            .ok_or("missing-login")
    }

    async fn upsert(
        &self,
        db: &Db,
        _resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (legacy_user_id, login, email, display_name, registered_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (legacy_user_id) DO UPDATE
             SET login = EXCLUDED.login,
                 email = EXCLUDED.email,
                 display_name = EXCLUDED.display_name,
                 registered_at = EXCLUDED.registered_at",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(trim_to_opt(row.login.as_deref()).unwrap_or_default())
        .bind(trim_to_opt(row.email.as_deref()))
        .bind(trim_to_opt(row.display_name.as_deref()))
        .bind(row.registered)
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

pub struct Artists;

pub struct ArtistRow {
    first_name: Option<String>,
    last_name: Option<String>,
    nickname: Option<String>,
    status: Option<String>,
    notes: Option<String>,
}

impl ArtistRow {
    /// Display name the slug derives from; artists are collision-prone
    /// (several share a surname) so the slug is prefixed with the legacy id.
    fn full_name(&self) -> String {
        let first = trim_to_opt(self.first_name.as_deref()).unwrap_or_default();
        let last = trim_to_opt(self.last_name.as_deref()).unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }
}

#[async_trait]
impl EntityTransform for Artists {
    type Row = ArtistRow;

    fn stage_name(&self) -> &'static str {
        "artists"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::Artist
    }

    fn staging_table(&self) -> &'static str {
        "artists"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["artist_id", "name", "surname", "nickname", "status", "notes"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT artist_id, name, surname, nickname, status, notes
             FROM legacy.artists
             WHERE artist_id > $1
             ORDER BY artist_id
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
                    ArtistRow {
                        first_name: row.try_get(1)?,
                        last_name: row.try_get(2)?,
                        nickname: row.try_get(3)?,
                        status: row.try_get(4)?,
                        notes: row.try_get(5)?,
                    },
                ))
            })
            .collect()
    }

    fn validate(&self, _legacy_id: i64, row: &Self::Row) -> Result<(), &'static str> {
        trim_to_opt(row.last_name.as_deref())
            .map(|_| ())
            .ok_or("missing-surname")
    }

    async fn upsert(
        &self,
        db: &Db,
        _resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO artists
                 (legacy_artist_id, first_name, last_name, nickname, slug, status, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (legacy_artist_id) DO UPDATE
             SET first_name = EXCLUDED.first_name,
                 last_name = EXCLUDED.last_name,
                 nickname = EXCLUDED.nickname,
                 slug = EXCLUDED.slug,
                 status = EXCLUDED.status,
                 notes = EXCLUDED.notes",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(trim_to_opt(row.first_name.as_deref()))
        .bind(trim_to_opt(row.last_name.as_deref()).unwrap_or_default())
        .bind(trim_to_opt(row.nickname.as_deref()))
        .bind(slug_with_id(legacy_id, &row.full_name()))
        .bind(EntryStatus::from_legacy(row.status.as_deref()).as_str())
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
    fn artist_full_name_handles_missing_parts() {
        let row = ArtistRow {
            first_name: Some("Μάρκος".into()),
            last_name: Some(" Βαμβακάρης ".into()),
            nickname: None,
            status: None,
            notes: None,
        };
        assert_eq!(row.full_name(), "Μάρκος Βαμβακάρης");

        let only_last = ArtistRow {
            first_name: None,
            last_name: Some("Τσιτσάνης".into()),
            nickname: None,
            status: None,
            notes: None,
        };
        assert_eq!(only_last.full_name(), "Τσιτσάνης");
    }
}
