use thiserror::Error;

/// Run-terminating failures. Row-level problems (bad titles, dangling legacy
/// ids, duplicate associations) never surface here; they are absorbed into
/// the per-stage skip counters.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("legacy source unavailable: {0}")]
    SourceUnavailable(#[source] sqlx::Error),

    #[error("target store unavailable: {0}")]
    TargetUnavailable(#[source] sqlx::Error),

    /// The staging copy of a legacy table is missing a column a downstream
    /// stage depends on. Fatal for that table's stage only; we fail loud
    /// rather than guess at the legacy schema.
    #[error("schema drift in staging table legacy.{table}: missing column \"{column}\"")]
    SchemaDrift { table: String, column: String },

    #[error("stage {stage} failed")]
    Stage {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("run cancelled at a {0} boundary")]
    Cancelled(&'static str),
}

impl MigrateError {
    pub fn stage(stage: &'static str, source: anyhow::Error) -> Self {
        // Keep the original taxonomy if the inner error already carries one.
        match source.downcast::<MigrateError>() {
            Ok(inner) => inner,
            Err(source) => MigrateError::Stage { stage, source },
        }
    }

    /// Transient connectivity problems are worth a bounded retry before the
    /// run escalates to Failed. Everything else is either permanent (schema
    /// drift, SQL errors) or deliberate (cancellation).
    pub fn is_transient(err: &anyhow::Error) -> bool {
        if let Some(sql) = err.downcast_ref::<sqlx::Error>() {
            return matches!(sql, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
        }
        match err.downcast_ref::<MigrateError>() {
            Some(MigrateError::SourceUnavailable(_)) | Some(MigrateError::TargetUnavailable(_)) => {
                true
            }
            Some(MigrateError::Stage { source, .. }) => Self::is_transient(source),
            _ => false,
        }
    }
}
