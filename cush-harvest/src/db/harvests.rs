//! Harvest, credential and party loading

use std::str::FromStr;

use cush_common::db::models::{
    Credential, CredentialStatus, Harvest, HarvestStatus, Institution, Provider, Release,
    ReportKind,
};
use cush_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Everything one harvest attempt needs to know about who it runs for
#[derive(Debug, Clone)]
pub struct HarvestContext {
    pub harvest: Harvest,
    pub credential: Credential,
    pub provider: Provider,
    pub institution: Institution,
}

/// Load a harvest row by guid
pub async fn load_harvest(pool: &SqlitePool, harvest_id: &str) -> Result<Option<Harvest>> {
    let row = sqlx::query(
        r#"
        SELECT guid, credential_id, report, yearmon, release, status, attempts, last_error_id
        FROM harvests
        WHERE guid = ?
        "#,
    )
    .bind(harvest_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(harvest_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Load a harvest together with its credential, provider and institution
pub async fn load_context(pool: &SqlitePool, harvest_id: &str) -> Result<HarvestContext> {
    let harvest = load_harvest(pool, harvest_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("harvest {}", harvest_id)))?;

    let row = sqlx::query(
        r#"
        SELECT c.guid AS cred_guid, c.institution_id, c.provider_id, c.release AS cred_release,
               c.status AS cred_status, c.customer_id, c.requestor_id, c.api_key,
               c.extra_args, c.platform, c.last_success_id,
               p.name AS provider_name, p.server_url, p.is_active AS provider_active,
               i.name AS institution_name, i.is_active AS institution_active
        FROM credentials c
        JOIN providers p ON p.guid = c.provider_id
        JOIN institutions i ON i.guid = c.institution_id
        WHERE c.guid = ?
        "#,
    )
    .bind(&harvest.credential_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("credential {}", harvest.credential_id)))?;

    let credential = Credential {
        guid: row.get("cred_guid"),
        institution_id: row.get("institution_id"),
        provider_id: row.get("provider_id"),
        release: Release::from_str(row.get::<String, _>("cred_release").as_str())?,
        status: CredentialStatus::from_str(row.get::<String, _>("cred_status").as_str())?,
        customer_id: row.get("customer_id"),
        requestor_id: row.get("requestor_id"),
        api_key: row.get("api_key"),
        extra_args: row.get("extra_args"),
        platform: row.get("platform"),
        last_success_id: row.get("last_success_id"),
    };

    let provider = Provider {
        guid: credential.provider_id.clone(),
        name: row.get("provider_name"),
        server_url: row.get("server_url"),
        is_active: row.get::<i64, _>("provider_active") != 0,
    };

    let institution = Institution {
        guid: credential.institution_id.clone(),
        name: row.get("institution_name"),
        is_active: row.get::<i64, _>("institution_active") != 0,
    };

    Ok(HarvestContext {
        harvest,
        credential,
        provider,
        institution,
    })
}

fn harvest_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Harvest> {
    Ok(Harvest {
        guid: row.get("guid"),
        credential_id: row.get("credential_id"),
        report: ReportKind::from_str(row.get::<String, _>("report").as_str())?,
        yearmon: row.get("yearmon"),
        release: Release::from_str(row.get::<String, _>("release").as_str())?,
        status: HarvestStatus::from_str(row.get::<String, _>("status").as_str())?,
        attempts: row.get("attempts"),
        last_error_id: row.get("last_error_id"),
    })
}
