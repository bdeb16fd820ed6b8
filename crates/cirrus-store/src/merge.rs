//! Consolidates independently produced SQLite stores into one.
//!
//! Each source is attached to the target connection and copied with one
//! `INSERT OR REPLACE` per table inside a single transaction, so a failing
//! source leaves every previously merged source committed and memory use is
//! independent of total data volume. The source is detached after the
//! transaction ends. Re-running a merge with the same or overlapping sources
//! leaves the target unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sqlx::Connection;
use tracing::{info, warn};

use cirrus_core::{Error, Result};

use crate::sqlite::{connect, db_error, TABLES};

const SOURCE_ALIAS: &str = "merge_source";

/// Summary of a completed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Sources merged, in order.
    pub sources: Vec<PathBuf>,
    /// Rows written per table, summed over all sources.
    pub rows: BTreeMap<&'static str, u64>,
}

impl MergeReport {
    /// Total rows written.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.rows.values().sum()
    }
}

/// Merges every store in `sources` into the store at `target`.
///
/// The target (and its schema) is created if missing.
///
/// # Errors
///
/// Returns an error if a source does not exist or a copy fails. Sources
/// merged before the failing one remain committed.
pub async fn merge_databases(target: impl AsRef<Path>, sources: &[PathBuf]) -> Result<MergeReport> {
    let target = target.as_ref();
    let pool = connect(target, 1).await?;
    let mut conn = pool.acquire().await.map_err(|e| db_error("acquire", e))?;
    let mut report = MergeReport::default();

    for source in sources {
        if !source.is_file() {
            return Err(Error::InvalidInput(format!(
                "merge source does not exist: {}",
                source.display()
            )));
        }
        if same_file(target, source) {
            warn!(source = %source.display(), "skipping merge of target into itself");
            continue;
        }

        sqlx::query(&format!("ATTACH DATABASE ? AS {SOURCE_ALIAS}"))
            .bind(source.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error("attach", e))?;

        let copied = copy_source(&mut conn).await;

        // Detach outside the transaction, whether or not the copy succeeded.
        let detached = sqlx::query(&format!("DETACH DATABASE {SOURCE_ALIAS}"))
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error("detach", e));

        let rows = copied?;
        detached?;

        let merged: u64 = rows.iter().map(|(_, n)| n).sum();
        info!(source = %source.display(), rows = merged, "merged source");
        for (table, n) in rows {
            *report.rows.entry(table).or_default() += n;
        }
        report.sources.push(source.clone());
    }

    drop(conn);
    pool.close().await;
    Ok(report)
}

async fn copy_source(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
) -> Result<Vec<(&'static str, u64)>> {
    let mut tx = conn.begin().await.map_err(|e| db_error("begin", e))?;
    let mut rows = Vec::with_capacity(TABLES.len());
    for (table, columns) in TABLES {
        let sql = format!(
            "INSERT OR REPLACE INTO main.{table} ({columns}) \
             SELECT {columns} FROM {SOURCE_ALIAS}.{table}"
        );
        let result = sqlx::query(&sql).execute(&mut *tx).await;
        match result {
            Ok(result) => rows.push((*table, result.rows_affected())),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback of failed merge source failed");
                }
                return Err(db_error(&format!("copy {table}"), e));
            }
        }
    }
    tx.commit().await.map_err(|e| db_error("commit", e))?;
    Ok(rows)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
