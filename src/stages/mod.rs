//! Stage registry and pipeline runner.
//!
//! The legacy scripts ordered themselves by filename prefixes; here the
//! ordering is a declared dependency graph validated at startup, so a
//! misordered registry fails fast instead of silently producing dangling
//! references.

pub mod backfill;
pub mod credits;
pub mod lists;
pub mod members;
pub mod people;
pub mod snapshot;
pub mod songs;
pub mod taxonomy;
pub mod transform;
pub mod versions;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Db, LegacyDb};
use crate::error::MigrateError;
use crate::resolver::{EntityKind, IdResolver};
use crate::schema;
use crate::stages::transform::run_transform;

const MAX_STAGE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Phase of a pipeline run; `Failed` is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    NotStarted,
    Importing,
    Resolving,
    Transforming,
    Reconciling,
    Backfilling,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::NotStarted => "not-started",
            RunState::Importing => "importing",
            RunState::Resolving => "resolving",
            RunState::Transforming => "transforming",
            RunState::Reconciling => "reconciling",
            RunState::Backfilling => "backfilling",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Snapshot,
    Users,
    Categories,
    Rythms,
    Artists,
    Songs,
    SongVersions,
    Lists,
    ListGroups,
    ListItems,
    SongCredits,
    SongCategories,
    VersionArtists,
    ListMembers,
    GroupMembers,
    BackfillCreatedBy,
    BackfillBasedOn,
}

impl Stage {
    /// Full ordered sequence; `validate_order` checks it against `deps`.
    pub const ORDERED: [Stage; 17] = [
        Stage::Snapshot,
        Stage::Users,
        Stage::Categories,
        Stage::Rythms,
        Stage::Artists,
        Stage::Songs,
        Stage::SongVersions,
        Stage::Lists,
        Stage::ListGroups,
        Stage::ListItems,
        Stage::SongCredits,
        Stage::SongCategories,
        Stage::VersionArtists,
        Stage::ListMembers,
        Stage::GroupMembers,
        Stage::BackfillCreatedBy,
        Stage::BackfillBasedOn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Snapshot => "snapshot",
            Stage::Users => "users",
            Stage::Categories => "categories",
            Stage::Rythms => "rythms",
            Stage::Artists => "artists",
            Stage::Songs => "songs",
            Stage::SongVersions => "song-versions",
            Stage::Lists => "lists",
            Stage::ListGroups => "list-groups",
            Stage::ListItems => "list-items",
            Stage::SongCredits => "song-credits",
            Stage::SongCategories => "song-categories",
            Stage::VersionArtists => "version-artists",
            Stage::ListMembers => "list-members",
            Stage::GroupMembers => "group-members",
            Stage::BackfillCreatedBy => "backfill-created-by",
            Stage::BackfillBasedOn => "backfill-based-on",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ORDERED.into_iter().find(|s| s.name() == name)
    }

    /// Stages whose output this stage reads. Foreign-key targets must exist
    /// before relationships referencing them are created.
    pub fn deps(self) -> &'static [Stage] {
        match self {
            Stage::Snapshot => &[],
            Stage::Users | Stage::Categories | Stage::Rythms | Stage::Artists => {
                &[Stage::Snapshot]
            }
            Stage::Songs => &[Stage::Snapshot, Stage::Categories, Stage::Rythms],
            Stage::SongVersions => &[Stage::Songs],
            Stage::Lists | Stage::ListGroups => &[Stage::Snapshot],
            Stage::ListItems => &[Stage::Lists, Stage::Songs, Stage::SongVersions],
            Stage::SongCredits => &[Stage::Songs, Stage::Artists],
            Stage::SongCategories => &[Stage::Songs, Stage::Categories],
            Stage::VersionArtists => &[Stage::SongVersions, Stage::Artists],
            Stage::ListMembers => &[Stage::Lists, Stage::Users],
            Stage::GroupMembers => &[Stage::ListGroups, Stage::Users],
            Stage::BackfillCreatedBy => {
                &[Stage::Songs, Stage::SongVersions, Stage::Lists, Stage::Users]
            }
            Stage::BackfillBasedOn => &[Stage::Songs],
        }
    }

    pub fn phase(self) -> RunState {
        match self {
            Stage::Snapshot => RunState::Importing,
            Stage::Users
            | Stage::Categories
            | Stage::Rythms
            | Stage::Artists
            | Stage::Songs
            | Stage::SongVersions
            | Stage::Lists
            | Stage::ListGroups
            | Stage::ListItems => RunState::Transforming,
            Stage::SongCredits
            | Stage::SongCategories
            | Stage::VersionArtists
            | Stage::ListMembers
            | Stage::GroupMembers => RunState::Reconciling,
            Stage::BackfillCreatedBy | Stage::BackfillBasedOn => RunState::Backfilling,
        }
    }

    /// Entity whose resolver map must be refreshed after this stage writes.
    fn written_entity(self) -> Option<EntityKind> {
        match self {
            Stage::Users => Some(EntityKind::User),
            Stage::Categories => Some(EntityKind::Category),
            Stage::Rythms => Some(EntityKind::Rythm),
            Stage::Artists => Some(EntityKind::Artist),
            Stage::Songs => Some(EntityKind::Song),
            Stage::SongVersions => Some(EntityKind::SongVersion),
            Stage::Lists => Some(EntityKind::List),
            Stage::ListGroups => Some(EntityKind::ListGroup),
            Stage::ListItems => Some(EntityKind::ListItem),
            _ => None,
        }
    }
}

/// Every stage's dependencies must precede it in `ORDERED`, and phases must
/// be monotonic so the state machine only moves forward.
pub fn validate_order() -> Result<()> {
    for (idx, stage) in Stage::ORDERED.iter().enumerate() {
        for dep in stage.deps() {
            let dep_idx = Stage::ORDERED
                .iter()
                .position(|s| s == dep)
                .ok_or_else(|| anyhow::anyhow!("stage {} has unregistered dep", stage.name()))?;
            if dep_idx >= idx {
                anyhow::bail!(
                    "stage ordering broken: {} must run before {}",
                    dep.name(),
                    stage.name()
                );
            }
        }
        if idx > 0 && Stage::ORDERED[idx - 1].phase() > stage.phase() {
            anyhow::bail!("stage {} regresses the run phase", stage.name());
        }
    }
    Ok(())
}

/// Per-stage counters, logged at completion. Row-level failures only ever
/// show up here, as named skip reasons.
#[derive(Debug, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: BTreeMap<String, u64>,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn skip(&mut self, reason: &str) {
        *self.skipped.entry(reason.to_string()).or_default() += 1;
    }

    pub fn skip_n(&mut self, reason: &str, n: u64) {
        if n > 0 {
            *self.skipped.entry(reason.to_string()).or_default() += n;
        }
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn log(&self) {
        info!(
            stage = %self.stage,
            processed = self.processed,
            created = self.created,
            updated = self.updated,
            skipped = self.skipped_total(),
            skip_reasons = ?self.skipped,
            "stage complete"
        );
    }
}

/// Cooperative cancellation, checked at stage and batch boundaries only; a
/// batch either fully commits or fully rolls back.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, boundary: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(MigrateError::Cancelled(boundary).into())
        } else {
            Ok(())
        }
    }
}

/// One migration run. Connections are scoped to the run and passed into each
/// stage explicitly; dropping the pipeline releases them on every exit path.
pub struct Pipeline {
    pub db: Db,
    pub legacy: Option<LegacyDb>,
    pub batch_size: i64,
    pub dry_run: bool,
    pub cancel: CancelFlag,
}

impl Pipeline {
    /// Run the full ordered sequence. Returns the per-stage reports; any
    /// error means the run ended in `Failed`.
    pub async fn run_all(&self) -> Result<Vec<StageReport>> {
        validate_order()?;
        schema::bootstrap_target(&self.db).await?;

        let mut state = RunState::NotStarted;
        let mut resolver = IdResolver::load_all(&self.db).await?;
        let mut reports = Vec::with_capacity(Stage::ORDERED.len());

        for stage in Stage::ORDERED {
            self.cancel.check("stage")?;
            let phase = stage.phase();
            if phase > state {
                // The resolver phase sits between importing and transforming:
                // rebuild the maps once the staging data is final.
                if state <= RunState::Importing && phase >= RunState::Transforming {
                    state = RunState::Resolving;
                    info!(state = %state, "run state");
                    resolver = IdResolver::load_all(&self.db).await?;
                }
                state = phase;
                info!(state = %state, "run state");
            }
            let report = self.run_stage_with_retry(stage, &mut resolver).await?;
            report.log();
            reports.push(report);
        }

        info!(state = %RunState::Done, "run state");
        Ok(reports)
    }

    /// Run a single named stage (its dependencies are assumed satisfied by
    /// earlier runs — the idempotency keys in the target store are the
    /// durable checkpoint).
    pub async fn run_one(&self, stage: Stage) -> Result<StageReport> {
        validate_order()?;
        schema::bootstrap_target(&self.db).await?;
        let mut resolver = IdResolver::load_all(&self.db).await?;
        let report = self.run_stage_with_retry(stage, &mut resolver).await?;
        report.log();
        Ok(report)
    }

    async fn run_stage_with_retry(
        &self,
        stage: Stage,
        resolver: &mut IdResolver,
    ) -> Result<StageReport> {
        let mut attempt = 0;
        let report = loop {
            attempt += 1;
            match self.execute(stage, resolver).await {
                Ok(report) => break report,
                Err(err)
                    if attempt < MAX_STAGE_ATTEMPTS
                        && MigrateError::is_transient(&err)
                        && !self.cancel.is_cancelled() =>
                {
                    warn!(
                        stage = stage.name(),
                        attempt,
                        error = %err,
                        "transient stage failure; retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(MigrateError::stage(stage.name(), err).into()),
            }
        };
        if let Some(kind) = stage.written_entity() {
            if !self.dry_run {
                resolver.reload(&self.db, kind).await?;
            }
        }
        Ok(report)
    }

    async fn execute(&self, stage: Stage, resolver: &IdResolver) -> Result<StageReport> {
        match stage {
            Stage::Snapshot => {
                let legacy = self.legacy.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("snapshot stage requires a legacy source connection")
                })?;
                snapshot::import_all(legacy, &self.db, self.batch_size as usize, &self.cancel).await
            }
            Stage::Users => self.transform(&people::Users, resolver).await,
            Stage::Categories => self.transform(&taxonomy::Categories, resolver).await,
            Stage::Rythms => self.transform(&taxonomy::Rythms, resolver).await,
            Stage::Artists => self.transform(&people::Artists, resolver).await,
            Stage::Songs => self.transform(&songs::Songs, resolver).await,
            Stage::SongVersions => self.transform(&versions::SongVersions, resolver).await,
            Stage::Lists => self.transform(&lists::Lists, resolver).await,
            Stage::ListGroups => self.transform(&lists::ListGroups, resolver).await,
            Stage::ListItems => self.transform(&lists::ListItems, resolver).await,
            Stage::SongCredits => {
                credits::reconcile_song_credits(&self.db, resolver, self.batch_size, &self.cancel, self.dry_run)
                    .await
            }
            Stage::SongCategories => {
                credits::reconcile_song_categories(&self.db, resolver, self.batch_size, &self.cancel, self.dry_run)
                    .await
            }
            Stage::VersionArtists => {
                credits::reconcile_version_artists(&self.db, resolver, self.batch_size, &self.cancel, self.dry_run)
                    .await
            }
            Stage::ListMembers => {
                members::reconcile_list_members(&self.db, resolver, self.batch_size, &self.cancel, self.dry_run)
                    .await
            }
            Stage::GroupMembers => {
                members::reconcile_group_members(&self.db, resolver, self.batch_size, &self.cancel, self.dry_run)
                    .await
            }
            Stage::BackfillCreatedBy => {
                backfill::backfill_created_by(&self.db, self.dry_run).await
            }
            Stage::BackfillBasedOn => backfill::backfill_based_on(&self.db, self.dry_run).await,
        }
    }

    async fn transform<T: transform::EntityTransform>(
        &self,
        transformer: &T,
        resolver: &IdResolver,
    ) -> Result<StageReport> {
        run_transform(
            transformer,
            &self.db,
            resolver,
            self.batch_size,
            &self.cancel,
            self.dry_run,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_order_satisfies_deps() {
        validate_order().expect("registry must be well ordered");
    }

    #[test]
    fn phases_are_monotonic() {
        let mut last = RunState::NotStarted;
        for stage in Stage::ORDERED {
            assert!(stage.phase() >= last, "{} regresses phase", stage.name());
            last = stage.phase();
        }
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ORDERED {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
        assert_eq!(Stage::from_name("nope"), None);
    }

    #[test]
    fn cancel_flag_trips_at_boundaries() {
        let flag = CancelFlag::default();
        assert!(flag.check("stage").is_ok());
        flag.cancel();
        assert!(flag.check("batch").is_err());
    }

    #[test]
    fn reports_aggregate_skip_reasons() {
        let mut report = StageReport::new("songs");
        report.skip("missing-title");
        report.skip("missing-title");
        report.skip_n("unresolved-category", 3);
        assert_eq!(report.skipped_total(), 5);
        assert_eq!(report.skipped.get("missing-title"), Some(&2));
    }
}
