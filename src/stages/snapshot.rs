//! Legacy snapshot importer: verbatim table copies from the WordPress MySQL
//! source into the quarantined `legacy` schema on the target store. No
//! business meaning is interpreted here; later stages read the staging
//! copies instead of holding the source connection open.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use futures::TryStreamExt;
use sqlx::mysql::MySqlRow;
use sqlx::{QueryBuilder, Row};
use tracing::info;

use crate::db::{Db, LegacyDb};
use crate::error::MigrateError;
use crate::stages::{CancelFlag, StageReport};

/// Tables copied per run, in no particular dependency order; staging copies
/// are independent of each other.
pub const LEGACY_TABLES: &[&str] = &[
    "songs",
    "artists",
    "songs_categories",
    "rythms",
    "songs_versions",
    "lists",
    "group_lists",
    "lists_items",
    "wp_users",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColKind {
    Int,
    Float,
    Timestamp,
    Date,
    Text,
}

#[derive(Debug, Clone)]
struct ColumnSpec {
    /// Original MySQL column name, used in the source SELECT.
    source_name: String,
    /// Lowercased staging name (Postgres folds unquoted identifiers anyway;
    /// we fold explicitly so transformers can rely on it).
    staging_name: String,
    kind: ColKind,
    not_null: bool,
}

impl ColumnSpec {
    fn pg_type(&self) -> &'static str {
        match self.kind {
            ColKind::Int => "BIGINT",
            ColKind::Float => "DOUBLE PRECISION",
            ColKind::Timestamp => "TIMESTAMP",
            ColKind::Date => "DATE",
            ColKind::Text => "TEXT",
        }
    }
}

/// One staged value, already coerced to the staging column type.
#[derive(Debug, Clone)]
enum StagedValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Timestamp(Option<NaiveDateTime>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
}

fn map_kind(data_type: &str) -> ColKind {
    match data_type {
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" | "year" => ColKind::Int,
        "decimal" | "float" | "double" => ColKind::Float,
        "datetime" | "timestamp" => ColKind::Timestamp,
        "date" => ColKind::Date,
        _ => ColKind::Text,
    }
}

async fn describe_table(legacy: &LegacyDb, table: &str) -> Result<Vec<ColumnSpec>> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE
         FROM information_schema.columns
         WHERE table_schema = DATABASE() AND table_name = ?
         ORDER BY ORDINAL_POSITION",
    )
    .bind(table)
    .fetch_all(&legacy.pool)
    .await
    .map_err(MigrateError::SourceUnavailable)?;

    let mut specs = Vec::with_capacity(rows.len());
    for row in rows {
        let source_name: String = row.try_get(0)?;
        let data_type: String = row.try_get(1)?;
        let is_nullable: String = row.try_get(2)?;
        let kind = map_kind(&data_type.to_lowercase());
        // Zero-dates ('0000-00-00') show up in NOT NULL legacy columns and
        // stage as NULL, so temporal staging columns are always nullable.
        let not_null = is_nullable.eq_ignore_ascii_case("NO")
            && !matches!(kind, ColKind::Timestamp | ColKind::Date);
        specs.push(ColumnSpec {
            staging_name: source_name.to_lowercase(),
            source_name,
            kind,
            not_null,
        });
    }
    if specs.is_empty() {
        return Err(MigrateError::SchemaDrift {
            table: table.to_string(),
            column: "*".to_string(),
        }
        .into());
    }
    Ok(specs)
}

// Lenient decoders: the legacy data holds zero-dates, unsigned overflows and
// numbers-in-varchars; a value that cannot be represented stages as NULL
// rather than failing the whole table.
fn decode_int(row: &MySqlRow, idx: usize) -> Option<i64> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.and_then(narrow_unsigned);
    }
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .and_then(|s| s.trim().parse().ok())
}

// An unsigned id above i64::MAX has no staging representation; NULL, not a
// clamped sentinel.
fn narrow_unsigned(v: u64) -> Option<i64> {
    i64::try_from(v).ok()
}

fn decode_float(row: &MySqlRow, idx: usize) -> Option<f64> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(f64::from);
    }
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .and_then(|s| s.trim().parse().ok())
}

fn decode_timestamp(row: &MySqlRow, idx: usize) -> Option<NaiveDateTime> {
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v;
    }
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok())
}

fn decode_date(row: &MySqlRow, idx: usize) -> Option<NaiveDate> {
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v;
    }
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn decode_text(row: &MySqlRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v;
    }
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn stage_row(row: &MySqlRow, specs: &[ColumnSpec]) -> Vec<StagedValue> {
    specs
        .iter()
        .enumerate()
        .map(|(idx, spec)| match spec.kind {
            ColKind::Int => StagedValue::Int(decode_int(row, idx)),
            ColKind::Float => StagedValue::Float(decode_float(row, idx)),
            ColKind::Timestamp => StagedValue::Timestamp(decode_timestamp(row, idx)),
            ColKind::Date => StagedValue::Date(decode_date(row, idx)),
            ColKind::Text => StagedValue::Text(decode_text(row, idx)),
        })
        .collect()
}

fn create_table_sql(table: &str, specs: &[ColumnSpec]) -> String {
    let cols = specs
        .iter()
        .map(|spec| {
            let null = if spec.not_null { " NOT NULL" } else { "" };
            format!("\"{}\" {}{}", spec.staging_name, spec.pg_type(), null)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE legacy.\"{table}\" ({cols})")
}

fn insert_prefix(table: &str, specs: &[ColumnSpec]) -> String {
    let cols = specs
        .iter()
        .map(|spec| format!("\"{}\"", spec.staging_name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO legacy.\"{table}\" ({cols}) ")
}

fn select_sql(table: &str, specs: &[ColumnSpec]) -> String {
    let cols = specs
        .iter()
        .map(|spec| format!("`{}`", spec.source_name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {cols} FROM `{table}`")
}

async fn flush_batch(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    prefix: &str,
    batch: &[Vec<StagedValue>],
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(prefix);
    qb.push_values(batch, |mut b, values| {
        for value in values {
            match value {
                StagedValue::Int(v) => b.push_bind(*v),
                StagedValue::Float(v) => b.push_bind(*v),
                StagedValue::Timestamp(v) => b.push_bind(*v),
                StagedValue::Date(v) => b.push_bind(*v),
                StagedValue::Text(v) => b.push_bind(v.clone()),
            };
        }
    });
    qb.build().persistent(false).execute(&mut **tx).await?;
    Ok(())
}

/// Copy one legacy table into `legacy.<table>`, drop-and-recreate, inside a
/// single transaction: a failed import leaves the previous staging copy
/// untouched, a cancelled one rolls back entirely. Retry is a full
/// re-import; that is cheap and idempotent by construction.
pub async fn import_table(
    legacy: &LegacyDb,
    db: &Db,
    table: &str,
    batch_size: usize,
    cancel: &CancelFlag,
) -> Result<u64> {
    let specs = describe_table(legacy, table).await?;

    let mut tx = db.pool.begin().await?;
    sqlx::raw_sql(&format!("DROP TABLE IF EXISTS legacy.\"{table}\""))
        .execute(&mut *tx)
        .await?;
    sqlx::raw_sql(&create_table_sql(table, &specs))
        .execute(&mut *tx)
        .await?;

    let prefix = insert_prefix(table, &specs);
    let select = select_sql(table, &specs);
    let mut stream = sqlx::query(&select).fetch(&legacy.pool);

    let mut buffer: Vec<Vec<StagedValue>> = Vec::with_capacity(batch_size);
    let mut copied: u64 = 0;
    while let Some(row) = stream
        .try_next()
        .await
        .map_err(MigrateError::SourceUnavailable)?
    {
        buffer.push(stage_row(&row, &specs));
        if buffer.len() >= batch_size {
            cancel.check("batch")?;
            flush_batch(&mut tx, &prefix, &buffer).await?;
            copied += buffer.len() as u64;
            buffer.clear();
        }
    }
    flush_batch(&mut tx, &prefix, &buffer).await?;
    copied += buffer.len() as u64;

    tx.commit().await?;
    info!(table, rows = copied, "staging table imported");
    Ok(copied)
}

/// Import every legacy table. A schema-drift failure names the offending
/// table and terminates the stage; staging copies already committed for
/// earlier tables remain valid.
pub async fn import_all(
    legacy: &LegacyDb,
    db: &Db,
    batch_size: usize,
    cancel: &CancelFlag,
) -> Result<StageReport> {
    let mut report = StageReport::new("snapshot");
    for table in LEGACY_TABLES {
        cancel.check("stage")?;
        let copied = import_table(legacy, db, table, batch_size, cancel).await?;
        report.processed += copied;
        report.created += copied;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, kind: ColKind, not_null: bool) -> ColumnSpec {
        ColumnSpec {
            source_name: name.to_string(),
            staging_name: name.to_lowercase(),
            kind,
            not_null,
        }
    }

    #[test]
    fn staging_ddl_preserves_shape() {
        let specs = vec![
            spec("Song_ID", ColKind::Int, true),
            spec("Title", ColKind::Text, false),
            spec("Created", ColKind::Timestamp, false),
        ];
        assert_eq!(
            create_table_sql("songs", &specs),
            "CREATE TABLE legacy.\"songs\" (\"song_id\" BIGINT NOT NULL, \
             \"title\" TEXT, \"created\" TIMESTAMP)"
        );
    }

    #[test]
    fn source_select_uses_original_names() {
        let specs = vec![spec("Song_ID", ColKind::Int, true)];
        assert_eq!(select_sql("songs", &specs), "SELECT `Song_ID` FROM `songs`");
    }

    #[test]
    fn unsigned_overflow_stages_as_null() {
        assert_eq!(narrow_unsigned(42), Some(42));
        assert_eq!(narrow_unsigned(i64::MAX as u64), Some(i64::MAX));
        assert_eq!(narrow_unsigned(i64::MAX as u64 + 1), None);
        assert_eq!(narrow_unsigned(u64::MAX), None);
    }

    #[test]
    fn mysql_types_map_to_staging_types() {
        assert_eq!(map_kind("int"), ColKind::Int);
        assert_eq!(map_kind("year"), ColKind::Int);
        assert_eq!(map_kind("decimal"), ColKind::Float);
        assert_eq!(map_kind("datetime"), ColKind::Timestamp);
        assert_eq!(map_kind("varchar"), ColKind::Text);
        assert_eq!(map_kind("enum"), ColKind::Text);
    }
}
