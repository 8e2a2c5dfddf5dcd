use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use repertoire_migrate::cli::db_counts;
use repertoire_migrate::db::{Db, LegacyDb};
use repertoire_migrate::schema;
use repertoire_migrate::stages::{snapshot, CancelFlag, Pipeline, Stage, StageReport};
use repertoire_migrate::tracing::init_tracing;
use repertoire_migrate::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "rmig", version, about = "Repertoire migration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run the full pipeline: snapshot import, transforms, reconciliation,
    /// backfills
    Run {
        /// Optional override for the target (Postgres) database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Optional override for the legacy (MySQL) database URL
        #[arg(long)]
        legacy_db_url: Option<String>,
        /// Rows fetched per batch (defaults to MIGRATE_BATCH_SIZE, then 500)
        #[arg(long)]
        batch_size: Option<i64>,
        /// Count and log without writing to the target
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Reuse the existing staging copy instead of re-importing
        #[arg(long, default_value_t = false)]
        skip_import: bool,
        /// Write the per-stage report summary as JSON to this path
        #[arg(long)]
        summary_json: Option<std::path::PathBuf>,
    },
    /// Run a single named stage against the existing staging copy
    Stage {
        /// Stage name (kebab-case, e.g. "songs", "backfill-created-by")
        name: String,
        /// Optional override for the target database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Optional override for the legacy database URL (snapshot only)
        #[arg(long)]
        legacy_db_url: Option<String>,
        /// Rows fetched per batch (defaults to MIGRATE_BATCH_SIZE, then 500)
        #[arg(long)]
        batch_size: Option<i64>,
        /// Count and log without writing to the target
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Import one legacy table into the staging schema
    Import {
        /// Legacy table name (as it appears in the source database)
        table: String,
        /// Optional override for the target database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Optional override for the legacy database URL
        #[arg(long)]
        legacy_db_url: Option<String>,
        /// Rows copied per insert batch (defaults to MIGRATE_BATCH_SIZE, then 500)
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// List the registered stages in execution order
    Stages,
    /// Print row counts for target, association and staging tables
    DbCounts {
        /// Optional override for the target database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("info")?;
    // Either DSN form (full URL or components) satisfies configuration and
    // the CLI can override both, so nothing is hard-required here; the
    // snapshot still shows the operator what the process actually sees.
    env_util::preflight_check(
        "rmig",
        &[],
        &[
            "DATABASE_URL",
            "DB_HOST",
            "DB_DATABASE",
            "LEGACY_DATABASE_URL",
            "LEGACY_DB_HOST",
            "LEGACY_DB_NAME",
            "MIGRATE_BATCH_SIZE",
            "MIGRATE_MAX_CONNECTIONS",
        ],
    )?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db_url,
            legacy_db_url,
            batch_size,
            dry_run,
            skip_import,
            summary_json,
        } => {
            let pipeline = build_pipeline(db_url, legacy_db_url, batch_size, dry_run, !skip_import)
                .await?;
            install_cancel_handler(pipeline.cancel.clone());

            let result = if skip_import {
                info!("skipping snapshot import; using existing staging copy");
                run_without_import(&pipeline).await
            } else {
                pipeline.run_all().await
            };
            let reports = match result {
                Ok(reports) => reports,
                Err(err) => {
                    error!(error = %err, "migration run failed");
                    bail!(err);
                }
            };
            if let Some(path) = summary_json {
                std::fs::write(&path, serde_json::to_string_pretty(&reports)?)
                    .with_context(|| format!("writing summary to {}", path.display()))?;
                info!(path = %path.display(), "run summary written");
            }
            info!(stages = reports.len(), "migration run complete");
        }
        Commands::Stage {
            name,
            db_url,
            legacy_db_url,
            batch_size,
            dry_run,
        } => {
            let stage = Stage::from_name(&name).with_context(|| {
                let names: Vec<&str> = Stage::ORDERED.iter().map(|s| s.name()).collect();
                format!("unknown stage '{name}'; expected one of {names:?}")
            })?;
            let needs_legacy = stage == Stage::Snapshot;
            let pipeline =
                build_pipeline(db_url, legacy_db_url, batch_size, dry_run, needs_legacy).await?;
            install_cancel_handler(pipeline.cancel.clone());

            if let Err(err) = pipeline.run_one(stage).await {
                error!(stage = stage.name(), error = %err, "stage failed");
                bail!(err);
            }
        }
        Commands::Import {
            table,
            db_url,
            legacy_db_url,
            batch_size,
        } => {
            if !snapshot::LEGACY_TABLES.contains(&table.as_str()) {
                bail!(
                    "unknown legacy table '{table}'; expected one of {:?}",
                    snapshot::LEGACY_TABLES
                );
            }
            let pipeline = build_pipeline(db_url, legacy_db_url, batch_size, false, true).await?;
            install_cancel_handler(pipeline.cancel.clone());
            schema::bootstrap_target(&pipeline.db).await?;

            let legacy = pipeline
                .legacy
                .as_ref()
                .context("import requires a legacy source connection")?;
            let copied = snapshot::import_table(
                legacy,
                &pipeline.db,
                &table,
                pipeline.batch_size as usize,
                &pipeline.cancel,
            )
            .await?;
            info!(table = %table, rows = copied, "staging import complete");
        }
        Commands::Stages => {
            for stage in Stage::ORDERED {
                println!("{}", stage.name());
            }
        }
        Commands::DbCounts { db_url } => {
            db_counts::run(db_counts::DbCountsConfig {
                database_url: db_url,
            })
            .await?;
        }
    }

    Ok(())
}

async fn build_pipeline(
    db_url: Option<String>,
    legacy_db_url: Option<String>,
    batch_size: Option<i64>,
    dry_run: bool,
    needs_legacy: bool,
) -> Result<Pipeline> {
    let target_url = match db_url {
        Some(url) => url,
        None => env_util::target_db_url()?,
    };
    info!(url = %env_util::redact_dsn(&target_url), "connecting to target");
    let db = Db::connect(&target_url, env_util::max_connections()).await?;

    let legacy = if needs_legacy {
        let legacy_url = match legacy_db_url {
            Some(url) => url,
            None => env_util::legacy_db_url()?,
        };
        info!(url = %env_util::redact_dsn(&legacy_url), "connecting to legacy source");
        let legacy = LegacyDb::connect(&legacy_url).await?;
        info!(database = %legacy.current_database().await?, "legacy source ready");
        Some(legacy)
    } else {
        None
    };

    Ok(Pipeline {
        db,
        legacy,
        batch_size: batch_size.unwrap_or_else(env_util::batch_size).max(1),
        dry_run,
        cancel: CancelFlag::default(),
    })
}

/// First Ctrl-C requests a clean stop at the next batch boundary; a second
/// one aborts the process.
fn install_cancel_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current batch then stopping");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second interrupt; aborting immediately");
                std::process::exit(130);
            }
        }
    });
}

async fn run_without_import(pipeline: &Pipeline) -> Result<Vec<StageReport>> {
    let mut reports = Vec::new();
    for stage in Stage::ORDERED {
        if stage == Stage::Snapshot {
            continue;
        }
        reports.push(pipeline.run_one(stage).await?);
    }
    Ok(reports)
}
