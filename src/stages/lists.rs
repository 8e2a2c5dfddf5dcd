//! Transformers for lists, list groups and list items. The ACL fields on
//! lists and groups are reconciled separately (see `members`); the
//! transformers here only migrate the entities themselves.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::db::Db;
use crate::model::EntryStatus;
use crate::normalization::trim_to_opt;
use crate::resolver::{EntityKind, IdResolver};
use crate::stages::transform::EntityTransform;

pub struct Lists;

pub struct ListRow {
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl EntityTransform for Lists {
    type Row = ListRow;

    fn stage_name(&self) -> &'static str {
        "lists"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::List
    }

    fn staging_table(&self) -> &'static str {
        "lists"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["list_id", "title", "description", "status"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT list_id, title, description, status
             FROM legacy.lists
             WHERE list_id > $1
             ORDER BY list_id
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
                    ListRow {
                        title: row.try_get(1)?,
                        description: row.try_get(2)?,
                        status: row.try_get(3)?,
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
            "INSERT INTO lists (legacy_list_id, title, description, status)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (legacy_list_id) DO UPDATE
             SET title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 status = EXCLUDED.status",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(trim_to_opt(row.title.as_deref()).unwrap_or_default())
        .bind(trim_to_opt(row.description.as_deref()))
        .bind(EntryStatus::from_legacy(row.status.as_deref()).as_str())
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

pub struct ListGroups;

pub struct GroupRow {
    title: Option<String>,
    description: Option<String>,
}

#[async_trait]
impl EntityTransform for ListGroups {
    type Row = GroupRow;

    fn stage_name(&self) -> &'static str {
        "list-groups"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::ListGroup
    }

    fn staging_table(&self) -> &'static str {
        "group_lists"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["group_id", "title", "description"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT group_id, title, description
             FROM legacy.group_lists
             WHERE group_id > $1
             ORDER BY group_id
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
                    GroupRow {
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
        sqlx::query(
            "INSERT INTO list_groups (legacy_group_id, title, description)
             VALUES ($1, $2, $3)
             ON CONFLICT (legacy_group_id) DO UPDATE
             SET title = EXCLUDED.title,
                 description = EXCLUDED.description",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(trim_to_opt(row.title.as_deref()).unwrap_or_default())
        .bind(trim_to_opt(row.description.as_deref()))
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}

pub struct ListItems;

pub struct ItemRow {
    list_id: Option<i64>,
    song_id: Option<i64>,
    version_id: Option<i64>,
    position: Option<i64>,
    notes: Option<String>,
}

#[async_trait]
impl EntityTransform for ListItems {
    type Row = ItemRow;

    fn stage_name(&self) -> &'static str {
        "list-items"
    }

    fn entity(&self) -> EntityKind {
        EntityKind::ListItem
    }

    fn staging_table(&self) -> &'static str {
        "lists_items"
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["item_id", "list_id", "song_id", "version_id", "position", "notes"]
    }

    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>> {
        let rows = sqlx::query(
            "SELECT item_id, list_id, song_id, version_id, position, notes
             FROM legacy.lists_items
             WHERE item_id > $1
             ORDER BY item_id
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
                    ItemRow {
                        list_id: row.try_get(1)?,
                        song_id: row.try_get(2)?,
                        version_id: row.try_get(3)?,
                        position: row.try_get(4)?,
                        notes: row.try_get(5)?,
                    },
                ))
            })
            .collect()
    }

    fn validate(&self, _legacy_id: i64, _row: &Self::Row) -> Result<(), &'static str> {
        Ok(())
    }

    async fn upsert(
        &self,
        db: &Db,
        resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()> {
        let list_id = row
            .list_id
            .and_then(|legacy| resolver.resolve(EntityKind::List, legacy));
        let song_id = row
            .song_id
            .and_then(|legacy| resolver.resolve(EntityKind::Song, legacy));
        let version_id = row
            .version_id
            .and_then(|legacy| resolver.resolve(EntityKind::SongVersion, legacy));

        sqlx::query(
            "INSERT INTO list_items
                 (legacy_item_id, list_id, song_id, song_version_id, position, notes)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (legacy_item_id) DO UPDATE
             SET list_id = EXCLUDED.list_id,
                 song_id = EXCLUDED.song_id,
                 song_version_id = EXCLUDED.song_version_id,
                 position = EXCLUDED.position,
                 notes = EXCLUDED.notes",
        )
        .persistent(false)
        .bind(legacy_id)
        .bind(list_id)
        .bind(song_id)
        .bind(version_id)
        // Bound as i64: an out-of-range position fails the INT column
        // loudly instead of wrapping in a narrowing cast here.
        .bind(row.position.unwrap_or(0))
        .bind(trim_to_opt(row.notes.as_deref()))
        .execute(&db.pool)
        .await?;
        Ok(())
    }
}
