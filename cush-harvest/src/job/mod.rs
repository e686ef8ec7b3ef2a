//! Harvest job state machine
//!
//! The only code that mutates a harvest's status, attempts and failure
//! history. States: New, Queued, Pending, Harvesting, Waiting, Paused,
//! ReQueued, Success, Fail. Claiming is a compare-and-swap at the
//! storage layer so two workers can never execute the same harvest.

pub mod queue;

use cush_common::db::models::{CredentialStatus, HarvestStatus, Release};
use cush_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::facts::fact_table;
use crate::db::harvests::{load_context, load_harvest};
use crate::db::providers::provider_has_release;
use crate::sushi::HarvestStep;

/// Classified failure to append to a harvest's history
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub error_code: i64,
    pub detail: String,
    pub help_url: Option<String>,
    pub step: HarvestStep,
}

/// Why a restart request did not restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDisposition {
    Restarted,
    /// Credential is not Enabled
    SkippedCredential,
    /// Owning provider or institution is inactive
    SkippedInactive,
    /// Forced release not present in the provider's registry
    SkippedUnknownRelease,
}

/// Queue a harvest for execution
///
/// Attempts reset to zero and a queue entry is created; enqueueing an
/// already-queued harvest is a no-op, not an error.
pub async fn enqueue(pool: &SqlitePool, harvest_id: &str, replace: bool) -> Result<()> {
    sqlx::query(
        "UPDATE harvests SET status = ?, attempts = 0, updated_at = CURRENT_TIMESTAMP
         WHERE guid = ?",
    )
    .bind(HarvestStatus::Queued.as_str())
    .bind(harvest_id)
    .execute(pool)
    .await?;

    queue::ensure_entry(pool, harvest_id, replace).await?;

    info!(harvest_id, replace, "harvest queued");
    Ok(())
}

/// Claim a queued harvest for execution (Queued -> Harvesting)
///
/// Atomic compare-and-swap: returns false when another worker already
/// claimed it (or it is not queued at all).
pub async fn claim(pool: &SqlitePool, harvest_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE harvests SET status = ?, updated_at = CURRENT_TIMESTAMP
         WHERE guid = ? AND status = ?",
    )
    .bind(HarvestStatus::Harvesting.as_str())
    .bind(harvest_id)
    .bind(HarvestStatus::Queued.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a successful harvest
///
/// Status becomes Success, the error pointer is cleared, the queue entry
/// removed and the credential's last-success marker updated.
pub async fn record_success(pool: &SqlitePool, harvest_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE harvests SET status = ?, last_error_id = NULL, updated_at = CURRENT_TIMESTAMP
         WHERE guid = ?",
    )
    .bind(HarvestStatus::Success.as_str())
    .bind(harvest_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM harvest_queue WHERE harvest_id = ?")
        .bind(harvest_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE credentials SET last_success_id = ?, updated_at = CURRENT_TIMESTAMP
         WHERE guid = (SELECT credential_id FROM harvests WHERE guid = ?)",
    )
    .bind(harvest_id)
    .bind(harvest_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(harvest_id, "harvest succeeded");
    Ok(())
}

/// Record a failed harvest attempt
///
/// Appends a failure-history row, bumps the attempt counter, points the
/// harvest at the new failure and clears the queue entry. Returns the
/// failure row's guid.
pub async fn record_fail(
    pool: &SqlitePool,
    harvest_id: &str,
    record: &FailureRecord,
) -> Result<String> {
    let failure_id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO failed_harvests (guid, harvest_id, error_code, detail, help_url, process_step)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&failure_id)
    .bind(harvest_id)
    .bind(record.error_code)
    .bind(&record.detail)
    .bind(&record.help_url)
    .bind(record.step.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE harvests SET status = ?, attempts = attempts + 1, last_error_id = ?,
                updated_at = CURRENT_TIMESTAMP
         WHERE guid = ?",
    )
    .bind(HarvestStatus::Fail.as_str())
    .bind(&failure_id)
    .bind(harvest_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM harvest_queue WHERE harvest_id = ?")
        .bind(harvest_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    warn!(
        harvest_id,
        error_code = record.error_code,
        step = record.step.as_str(),
        "harvest failed: {}",
        record.detail
    );
    Ok(failure_id)
}

/// Record a vendor "still processing" outcome
///
/// Only the status moves (Pending, or whatever the code table mapped);
/// attempts are not incremented, no failure row is appended, and the
/// queue entry stays so the scheduler retries later.
pub async fn record_pending(
    pool: &SqlitePool,
    harvest_id: &str,
    next_status: HarvestStatus,
) -> Result<()> {
    sqlx::query("UPDATE harvests SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?")
        .bind(next_status.as_str())
        .bind(harvest_id)
        .execute(pool)
        .await?;

    info!(harvest_id, status = next_status.as_str(), "harvest pending");
    Ok(())
}

/// Pause a harvest; terminal harvests are left alone
///
/// Returns whether the harvest was actually paused.
pub async fn pause(pool: &SqlitePool, harvest_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE harvests SET status = ?, updated_at = CURRENT_TIMESTAMP
         WHERE guid = ? AND status NOT IN (?, ?)",
    )
    .bind(HarvestStatus::Paused.as_str())
    .bind(harvest_id)
    .bind(HarvestStatus::Success.as_str())
    .bind(HarvestStatus::Fail.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Restart a harvest: back to Queued with attempts reset
///
/// Skipped (harvest left unmodified) when the credential is not Enabled,
/// the provider or institution is inactive, or a forced release is not
/// in the provider's registry.
pub async fn restart(
    pool: &SqlitePool,
    harvest_id: &str,
    forced_release: Option<Release>,
) -> Result<RestartDisposition> {
    let context = load_context(pool, harvest_id).await?;

    if context.credential.status != CredentialStatus::Enabled {
        warn!(harvest_id, "restart skipped: credential not enabled");
        return Ok(RestartDisposition::SkippedCredential);
    }
    if !context.provider.is_active || !context.institution.is_active {
        warn!(harvest_id, "restart skipped: provider or institution inactive");
        return Ok(RestartDisposition::SkippedInactive);
    }

    if let Some(release) = forced_release {
        if !provider_has_release(pool, &context.provider.guid, release).await? {
            warn!(
                harvest_id,
                release = release.as_str(),
                "restart skipped: release not in provider registry"
            );
            return Ok(RestartDisposition::SkippedUnknownRelease);
        }
        sqlx::query("UPDATE harvests SET release = ? WHERE guid = ?")
            .bind(release.as_str())
            .bind(harvest_id)
            .execute(pool)
            .await?;
    }

    enqueue(pool, harvest_id, false).await?;
    Ok(RestartDisposition::Restarted)
}

/// Delete a harvest and everything it produced
///
/// Removes the queue entry and failure history (FK cascade), deletes the
/// fact rows for its (provider, institution, yearmon) triple, and
/// recomputes the credential's last-success marker if this harvest held
/// it.
pub async fn delete_harvest(pool: &SqlitePool, harvest_id: &str) -> Result<()> {
    let context = load_context(pool, harvest_id).await?;
    let harvest = &context.harvest;

    let mut tx = pool.begin().await?;

    let delete_facts = format!(
        "DELETE FROM {} WHERE provider_id = ? AND institution_id = ? AND yearmon = ?",
        fact_table(harvest.report)
    );
    sqlx::query(&delete_facts)
        .bind(&context.credential.provider_id)
        .bind(&context.credential.institution_id)
        .bind(&harvest.yearmon)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM harvests WHERE guid = ?")
        .bind(harvest_id)
        .execute(&mut *tx)
        .await?;

    if context.credential.last_success_id.as_deref() == Some(harvest_id) {
        let replacement: Option<String> = sqlx::query_scalar(
            "SELECT guid FROM harvests
             WHERE credential_id = ? AND status = ?
             ORDER BY updated_at DESC, yearmon DESC LIMIT 1",
        )
        .bind(&harvest.credential_id)
        .bind(HarvestStatus::Success.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE credentials SET last_success_id = ?, updated_at = CURRENT_TIMESTAMP
             WHERE guid = ?",
        )
        .bind(&replacement)
        .bind(&harvest.credential_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(harvest_id, "harvest deleted");
    Ok(())
}

/// Fetch the current status of a harvest
pub async fn current_status(pool: &SqlitePool, harvest_id: &str) -> Result<HarvestStatus> {
    let harvest = load_harvest(pool, harvest_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("harvest {}", harvest_id)))?;
    Ok(harvest.status)
}

/// Failure history of a harvest, oldest first
pub async fn failure_history(
    pool: &SqlitePool,
    harvest_id: &str,
) -> Result<Vec<cush_common::db::models::FailedHarvest>> {
    use sqlx::Row;

    let rows = sqlx::query(
        "SELECT guid, harvest_id, error_code, detail, help_url, process_step, created_at
         FROM failed_harvests WHERE harvest_id = ? ORDER BY created_at, guid",
    )
    .bind(harvest_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| cush_common::db::models::FailedHarvest {
            guid: row.get("guid"),
            harvest_id: row.get("harvest_id"),
            error_code: row.get("error_code"),
            detail: row.get("detail"),
            help_url: row.get("help_url"),
            process_step: row.get("process_step"),
            created_at: row.get("created_at"),
        })
        .collect())
}
