//! Background reclamation of superseded revisions.
//!
//! One compactor runs per opened table. Each cycle advances the watermark
//! to the highest id that already has a successor, deletes superseded
//! revisions at or below it, and publishes the new watermark so clients
//! resuming from reclaimed revisions get a well-defined `Expired` error.
//! The current revision of every chain survives unconditionally, as does
//! the newest tombstone of a chain that has not been re-created.
use crate::{
    error::{Error, Result},
    table::TableState,
};
use sqlx::{AnyPool, Row};
use std::sync::Arc;
use tracing::{debug, warn};

/// Run one compaction cycle, returning the published watermark.
///
/// Safe to invoke at any time; the periodic task calls exactly this.
pub(crate) async fn compact_once(pool: &AnyPool, table: &TableState) -> Result<i64> {
    let templates = &table.templates;
    let mut tx = pool.begin().await?;

    let row = templates
        .compaction_candidate()
        .query()
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::from)?;
    let candidate: i64 = row.try_get("id").map_err(Error::Database)?;

    let current = match templates
        .watermark_get()
        .query()
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::from)?
    {
        Some(row) => row.try_get::<i64, _>("id").map_err(Error::Database)?,
        None => 0,
    };
    // the watermark never decreases
    let watermark = candidate.max(current);

    if watermark > 0 {
        let superseded = templates
            .delete_superseded(watermark)
            .query()
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?
            .rows_affected();
        let tombstones = templates
            .delete_reclaimed_tombstones(watermark)
            .query()
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?
            .rows_affected();
        templates
            .watermark_upsert(watermark)
            .query()
            .execute(&mut *tx)
            .await
            .map_err(Error::from)?;
        if superseded + tombstones > 0 {
            debug!(
                table = %table.def.table_name(),
                watermark, superseded, tombstones, "compacted"
            );
        }
    }
    tx.commit().await?;
    Ok(watermark)
}

/// Spawn the periodic compaction task for a table.
///
/// Errors are logged and never surfaced; a failed cycle simply defers
/// reclamation to the next interval. The task ends when the table shuts
/// down.
pub(crate) fn spawn(pool: AnyPool, table: Arc<TableState>, interval: std::time::Duration) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = table.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(err) = compact_once(&pool, &table).await {
                warn!(table = %table.def.table_name(), error = %err, "compaction cycle failed");
            }
        }
    });
}
