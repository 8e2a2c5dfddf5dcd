//! In-memory legacy-id → target-id lookups.
//!
//! One bulk SELECT per entity type instead of one round trip per row; legacy
//! scale is tens of thousands of rows per entity, comfortably in memory.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;
use tracing::debug;

use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Category,
    Rythm,
    Artist,
    Song,
    SongVersion,
    List,
    ListGroup,
    ListItem,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::User,
        EntityKind::Category,
        EntityKind::Rythm,
        EntityKind::Artist,
        EntityKind::Song,
        EntityKind::SongVersion,
        EntityKind::List,
        EntityKind::ListGroup,
        EntityKind::ListItem,
    ];

    /// Target table and legacy-identifier column for this entity.
    pub fn target(self) -> (&'static str, &'static str) {
        match self {
            EntityKind::User => ("users", "legacy_user_id"),
            EntityKind::Category => ("categories", "legacy_category_id"),
            EntityKind::Rythm => ("rythms", "legacy_rythm_id"),
            EntityKind::Artist => ("artists", "legacy_artist_id"),
            EntityKind::Song => ("songs", "legacy_song_id"),
            EntityKind::SongVersion => ("song_versions", "legacy_version_id"),
            EntityKind::List => ("lists", "legacy_list_id"),
            EntityKind::ListGroup => ("list_groups", "legacy_group_id"),
            EntityKind::ListItem => ("list_items", "legacy_item_id"),
        }
    }

    pub fn name(self) -> &'static str {
        self.target().0
    }
}

/// Lookup structures built once per run and refreshed after each transformer
/// stage inserts new rows.
#[derive(Debug, Default)]
pub struct IdResolver {
    maps: HashMap<EntityKind, HashMap<i64, i64>>,
}

impl IdResolver {
    pub async fn load_all(db: &Db) -> Result<Self> {
        let mut resolver = Self::default();
        for kind in EntityKind::ALL {
            resolver.reload(db, kind).await?;
        }
        Ok(resolver)
    }

    /// Refresh one entity's map by re-querying already-migrated rows.
    pub async fn reload(&mut self, db: &Db, kind: EntityKind) -> Result<()> {
        let (table, legacy_col) = kind.target();
        let sql = format!("SELECT {legacy_col}, id FROM {table} WHERE {legacy_col} IS NOT NULL");
        let rows = sqlx::query(&sql)
            .persistent(false)
            .fetch_all(&db.pool)
            .await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let legacy_id: i64 = row.try_get(0)?;
            let id: i64 = row.try_get(1)?;
            map.insert(legacy_id, id);
        }
        debug!(entity = table, entries = map.len(), "resolver map loaded");
        self.maps.insert(kind, map);
        Ok(())
    }

    /// Translate a legacy id; `None` means unmigrated or dangling, and the
    /// caller decides whether that is fatal, skip-worthy or loggable.
    pub fn resolve(&self, kind: EntityKind, legacy_id: i64) -> Option<i64> {
        self.maps.get(&kind)?.get(&legacy_id).copied()
    }

    /// Snapshot of the known legacy ids for one entity, used by the
    /// transformer driver to decide created-vs-updated.
    pub fn known(&self, kind: EntityKind) -> HashMap<i64, i64> {
        self.maps.get(&kind).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_resolve_to_none() {
        let resolver = IdResolver::default();
        assert_eq!(resolver.resolve(EntityKind::Song, 42), None);
    }

    #[test]
    fn every_entity_has_a_distinct_legacy_column() {
        let mut seen = std::collections::HashSet::new();
        for kind in EntityKind::ALL {
            let (table, col) = kind.target();
            assert!(seen.insert((table, col)), "duplicate mapping for {table}");
            assert!(col.starts_with("legacy_"));
        }
    }
}
