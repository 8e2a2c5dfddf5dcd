//! Generic entity-transformer driver.
//!
//! The legacy migration scripts each carried their own copy of the
//! batching/upsert control flow; here it lives once, and each entity type
//! supplies only its staging query, its mandatory-field validation and its
//! upsert statement. The legacy identifier is always the idempotency key.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::db::Db;
use crate::resolver::{EntityKind, IdResolver};
use crate::schema;
use crate::stages::{CancelFlag, StageReport};

#[async_trait]
pub trait EntityTransform: Sync {
    /// Staging row shape, decoded from `legacy.<staging_table>`.
    type Row: Send + Sync;

    fn stage_name(&self) -> &'static str;
    fn entity(&self) -> EntityKind;
    fn staging_table(&self) -> &'static str;
    /// Columns this transformer reads; absence is a SchemaDrift hard stop.
    fn required_columns(&self) -> &'static [&'static str];

    /// Keyset-paginated batch of `(legacy_id, row)` with legacy ids strictly
    /// ascending, starting after `after`.
    async fn fetch_batch(&self, db: &Db, after: i64, limit: i64) -> Result<Vec<(i64, Self::Row)>>;

    /// Mandatory-field validation; `Err` is a counted, logged skip.
    fn validate(&self, legacy_id: i64, row: &Self::Row) -> Result<(), &'static str>;

    /// Upsert keyed on the legacy identifier; must never duplicate on
    /// re-run. Unresolvable optional references become NULL here, they are
    /// not errors.
    async fn upsert(
        &self,
        db: &Db,
        resolver: &IdResolver,
        legacy_id: i64,
        row: &Self::Row,
    ) -> Result<()>;
}

pub async fn run_transform<T: EntityTransform>(
    transformer: &T,
    db: &Db,
    resolver: &IdResolver,
    batch_size: i64,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<StageReport> {
    schema::require_staging_columns(db, transformer.staging_table(), transformer.required_columns())
        .await?;

    // Snapshot of already-migrated legacy ids, for created-vs-updated
    // accounting; the upsert itself never consults it.
    let known = resolver.known(transformer.entity());

    let mut report = StageReport::new(transformer.stage_name());
    let mut after = i64::MIN;
    loop {
        cancel.check("batch")?;
        let rows = transformer.fetch_batch(db, after, batch_size).await?;
        let Some((last_id, _)) = rows.last() else {
            break;
        };
        after = *last_id;

        for (legacy_id, row) in &rows {
            report.processed += 1;
            if let Err(reason) = transformer.validate(*legacy_id, row) {
                debug!(
                    stage = transformer.stage_name(),
                    legacy_id, reason, "row skipped"
                );
                report.skip(reason);
                continue;
            }
            if !dry_run {
                transformer.upsert(db, resolver, *legacy_id, row).await?;
            }
            if known.contains_key(legacy_id) {
                report.updated += 1;
            } else {
                report.created += 1;
            }
        }
        debug!(
            stage = transformer.stage_name(),
            after,
            batch = rows.len(),
            "batch processed"
        );
    }
    Ok(report)
}
