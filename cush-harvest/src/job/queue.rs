//! Pending-work queue entries
//!
//! One row per harvest at most, enforced by the unique constraint.
//! Workers list entries and claim the harvest itself; the entry only
//! marks "there is work" and carries the replace-data flag.

use cush_common::db::models::QueueEntry;
use cush_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Create the queue entry for a harvest; a duplicate is a no-op
pub async fn ensure_entry(pool: &SqlitePool, harvest_id: &str, replace: bool) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO harvest_queue (guid, harvest_id, replace_data) VALUES (?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(harvest_id)
    .bind(replace as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove the queue entry for a harvest, if any
pub async fn remove_entry(pool: &SqlitePool, harvest_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM harvest_queue WHERE harvest_id = ?")
        .bind(harvest_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace-data flag of a harvest's queue entry (false when absent)
pub async fn replace_flag(pool: &SqlitePool, harvest_id: &str) -> Result<bool> {
    let flag: Option<i64> =
        sqlx::query_scalar("SELECT replace_data FROM harvest_queue WHERE harvest_id = ?")
            .bind(harvest_id)
            .fetch_optional(pool)
            .await?;
    Ok(flag.unwrap_or(0) != 0)
}

/// All queue entries, oldest first; consumed by external workers
pub async fn pending_entries(pool: &SqlitePool) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query(
        "SELECT guid, harvest_id, replace_data, created_at FROM harvest_queue ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| QueueEntry {
            guid: row.get("guid"),
            harvest_id: row.get("harvest_id"),
            replace_data: row.get::<i64, _>("replace_data") != 0,
            created_at: row.get("created_at"),
        })
        .collect())
}
