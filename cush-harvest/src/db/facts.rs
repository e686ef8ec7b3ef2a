//! Fact row persistence
//!
//! One insert path per report family. Fact rows are always fresh inserts
//! within a run; a replace run deletes the prior rows for its (provider,
//! institution, yearmon) triple inside the same transaction as the
//! inserts, so a crash can never leave the triple straddling two runs.

use cush_common::db::models::ReportKind;
use cush_common::{Result, YearMon};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Fact table backing a report family
pub fn fact_table(report: ReportKind) -> &'static str {
    match report {
        ReportKind::Tr => "title_report_facts",
        ReportKind::Dr => "database_report_facts",
        ReportKind::Pr => "platform_report_facts",
        ReportKind::Ir => "item_report_facts",
    }
}

/// Scope shared by every fact row of one normalization run
#[derive(Debug, Clone)]
pub struct FactScope {
    pub provider_id: String,
    pub institution_id: String,
    pub yearmon: YearMon,
    pub replace: bool,
}

// ============================================================================
// Title report (TR)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleCounters {
    pub total_item_investigations: i64,
    pub total_item_requests: i64,
    pub unique_item_investigations: i64,
    pub unique_item_requests: i64,
    pub unique_title_investigations: i64,
    pub unique_title_requests: i64,
    pub limit_exceeded: i64,
    pub no_license: i64,
}

impl TitleCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct TitleFactRow {
    pub title_id: String,
    pub platform_id: Option<String>,
    pub publisher_id: Option<String>,
    pub data_type_id: Option<String>,
    pub section_type_id: Option<String>,
    pub access_type_id: Option<String>,
    pub access_method_id: Option<String>,
    pub yop: Option<String>,
    pub counters: TitleCounters,
}

pub async fn insert_title_facts(
    pool: &SqlitePool,
    scope: &FactScope,
    rows: &[TitleFactRow],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let yearmon = scope.yearmon.to_string();

    if scope.replace {
        sqlx::query(
            "DELETE FROM title_report_facts
             WHERE provider_id = ? AND institution_id = ? AND yearmon = ?",
        )
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&yearmon)
        .execute(&mut *tx)
        .await?;
    }

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO title_report_facts (
                guid, title_id, provider_id, institution_id,
                platform_id, publisher_id, data_type_id, section_type_id,
                access_type_id, access_method_id, yop, yearmon,
                total_item_investigations, total_item_requests,
                unique_item_investigations, unique_item_requests,
                unique_title_investigations, unique_title_requests,
                limit_exceeded, no_license
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.title_id)
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&row.platform_id)
        .bind(&row.publisher_id)
        .bind(&row.data_type_id)
        .bind(&row.section_type_id)
        .bind(&row.access_type_id)
        .bind(&row.access_method_id)
        .bind(&row.yop)
        .bind(&yearmon)
        .bind(row.counters.total_item_investigations)
        .bind(row.counters.total_item_requests)
        .bind(row.counters.unique_item_investigations)
        .bind(row.counters.unique_item_requests)
        .bind(row.counters.unique_title_investigations)
        .bind(row.counters.unique_title_requests)
        .bind(row.counters.limit_exceeded)
        .bind(row.counters.no_license)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Column sums for one (provider, institution, yearmon) triple
pub async fn title_fact_sums(
    pool: &SqlitePool,
    provider_id: &str,
    institution_id: &str,
    yearmon: &str,
) -> Result<TitleCounters> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(total_item_investigations), 0) AS tii,
               COALESCE(SUM(total_item_requests), 0) AS tir,
               COALESCE(SUM(unique_item_investigations), 0) AS uii,
               COALESCE(SUM(unique_item_requests), 0) AS uir,
               COALESCE(SUM(unique_title_investigations), 0) AS uti,
               COALESCE(SUM(unique_title_requests), 0) AS utr,
               COALESCE(SUM(limit_exceeded), 0) AS le,
               COALESCE(SUM(no_license), 0) AS nl
        FROM title_report_facts
        WHERE provider_id = ? AND institution_id = ? AND yearmon = ?
        "#,
    )
    .bind(provider_id)
    .bind(institution_id)
    .bind(yearmon)
    .fetch_one(pool)
    .await?;

    Ok(TitleCounters {
        total_item_investigations: row.get("tii"),
        total_item_requests: row.get("tir"),
        unique_item_investigations: row.get("uii"),
        unique_item_requests: row.get("uir"),
        unique_title_investigations: row.get("uti"),
        unique_title_requests: row.get("utr"),
        limit_exceeded: row.get("le"),
        no_license: row.get("nl"),
    })
}

// ============================================================================
// Database report (DR)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseCounters {
    pub searches_automated: i64,
    pub searches_federated: i64,
    pub searches_regular: i64,
    pub total_item_investigations: i64,
    pub total_item_requests: i64,
    pub unique_item_investigations: i64,
    pub unique_item_requests: i64,
    pub limit_exceeded: i64,
    pub no_license: i64,
}

impl DatabaseCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseFactRow {
    pub database_id: String,
    pub platform_id: Option<String>,
    pub publisher_id: Option<String>,
    pub data_type_id: Option<String>,
    pub access_method_id: Option<String>,
    pub counters: DatabaseCounters,
}

pub async fn insert_database_facts(
    pool: &SqlitePool,
    scope: &FactScope,
    rows: &[DatabaseFactRow],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let yearmon = scope.yearmon.to_string();

    if scope.replace {
        sqlx::query(
            "DELETE FROM database_report_facts
             WHERE provider_id = ? AND institution_id = ? AND yearmon = ?",
        )
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&yearmon)
        .execute(&mut *tx)
        .await?;
    }

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO database_report_facts (
                guid, database_id, provider_id, institution_id,
                platform_id, publisher_id, data_type_id, access_method_id, yearmon,
                searches_automated, searches_federated, searches_regular,
                total_item_investigations, total_item_requests,
                unique_item_investigations, unique_item_requests,
                limit_exceeded, no_license
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.database_id)
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&row.platform_id)
        .bind(&row.publisher_id)
        .bind(&row.data_type_id)
        .bind(&row.access_method_id)
        .bind(&yearmon)
        .bind(row.counters.searches_automated)
        .bind(row.counters.searches_federated)
        .bind(row.counters.searches_regular)
        .bind(row.counters.total_item_investigations)
        .bind(row.counters.total_item_requests)
        .bind(row.counters.unique_item_investigations)
        .bind(row.counters.unique_item_requests)
        .bind(row.counters.limit_exceeded)
        .bind(row.counters.no_license)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn database_fact_sums(
    pool: &SqlitePool,
    provider_id: &str,
    institution_id: &str,
    yearmon: &str,
) -> Result<DatabaseCounters> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(searches_automated), 0) AS sa,
               COALESCE(SUM(searches_federated), 0) AS sf,
               COALESCE(SUM(searches_regular), 0) AS sr,
               COALESCE(SUM(total_item_investigations), 0) AS tii,
               COALESCE(SUM(total_item_requests), 0) AS tir,
               COALESCE(SUM(unique_item_investigations), 0) AS uii,
               COALESCE(SUM(unique_item_requests), 0) AS uir,
               COALESCE(SUM(limit_exceeded), 0) AS le,
               COALESCE(SUM(no_license), 0) AS nl
        FROM database_report_facts
        WHERE provider_id = ? AND institution_id = ? AND yearmon = ?
        "#,
    )
    .bind(provider_id)
    .bind(institution_id)
    .bind(yearmon)
    .fetch_one(pool)
    .await?;

    Ok(DatabaseCounters {
        searches_automated: row.get("sa"),
        searches_federated: row.get("sf"),
        searches_regular: row.get("sr"),
        total_item_investigations: row.get("tii"),
        total_item_requests: row.get("tir"),
        unique_item_investigations: row.get("uii"),
        unique_item_requests: row.get("uir"),
        limit_exceeded: row.get("le"),
        no_license: row.get("nl"),
    })
}

// ============================================================================
// Platform report (PR)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformCounters {
    pub searches_platform: i64,
    pub total_item_investigations: i64,
    pub total_item_requests: i64,
    pub unique_item_investigations: i64,
    pub unique_item_requests: i64,
    pub unique_title_investigations: i64,
    pub unique_title_requests: i64,
}

impl PlatformCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct PlatformFactRow {
    pub platform_id: String,
    pub data_type_id: Option<String>,
    pub access_method_id: Option<String>,
    pub counters: PlatformCounters,
}

pub async fn insert_platform_facts(
    pool: &SqlitePool,
    scope: &FactScope,
    rows: &[PlatformFactRow],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let yearmon = scope.yearmon.to_string();

    if scope.replace {
        sqlx::query(
            "DELETE FROM platform_report_facts
             WHERE provider_id = ? AND institution_id = ? AND yearmon = ?",
        )
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&yearmon)
        .execute(&mut *tx)
        .await?;
    }

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO platform_report_facts (
                guid, platform_id, provider_id, institution_id,
                data_type_id, access_method_id, yearmon,
                searches_platform,
                total_item_investigations, total_item_requests,
                unique_item_investigations, unique_item_requests,
                unique_title_investigations, unique_title_requests
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.platform_id)
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&row.data_type_id)
        .bind(&row.access_method_id)
        .bind(&yearmon)
        .bind(row.counters.searches_platform)
        .bind(row.counters.total_item_investigations)
        .bind(row.counters.total_item_requests)
        .bind(row.counters.unique_item_investigations)
        .bind(row.counters.unique_item_requests)
        .bind(row.counters.unique_title_investigations)
        .bind(row.counters.unique_title_requests)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn platform_fact_sums(
    pool: &SqlitePool,
    provider_id: &str,
    institution_id: &str,
    yearmon: &str,
) -> Result<PlatformCounters> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(searches_platform), 0) AS sp,
               COALESCE(SUM(total_item_investigations), 0) AS tii,
               COALESCE(SUM(total_item_requests), 0) AS tir,
               COALESCE(SUM(unique_item_investigations), 0) AS uii,
               COALESCE(SUM(unique_item_requests), 0) AS uir,
               COALESCE(SUM(unique_title_investigations), 0) AS uti,
               COALESCE(SUM(unique_title_requests), 0) AS utr
        FROM platform_report_facts
        WHERE provider_id = ? AND institution_id = ? AND yearmon = ?
        "#,
    )
    .bind(provider_id)
    .bind(institution_id)
    .bind(yearmon)
    .fetch_one(pool)
    .await?;

    Ok(PlatformCounters {
        searches_platform: row.get("sp"),
        total_item_investigations: row.get("tii"),
        total_item_requests: row.get("tir"),
        unique_item_investigations: row.get("uii"),
        unique_item_requests: row.get("uir"),
        unique_title_investigations: row.get("uti"),
        unique_title_requests: row.get("utr"),
    })
}

// ============================================================================
// Item report (IR)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemCounters {
    pub total_item_investigations: i64,
    pub total_item_requests: i64,
    pub unique_item_investigations: i64,
    pub unique_item_requests: i64,
    pub limit_exceeded: i64,
    pub no_license: i64,
}

impl ItemCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ItemFactRow {
    pub item_id: String,
    pub platform_id: Option<String>,
    pub publisher_id: Option<String>,
    pub data_type_id: Option<String>,
    pub access_type_id: Option<String>,
    pub access_method_id: Option<String>,
    pub yop: Option<String>,
    pub counters: ItemCounters,
}

pub async fn insert_item_facts(
    pool: &SqlitePool,
    scope: &FactScope,
    rows: &[ItemFactRow],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let yearmon = scope.yearmon.to_string();

    if scope.replace {
        sqlx::query(
            "DELETE FROM item_report_facts
             WHERE provider_id = ? AND institution_id = ? AND yearmon = ?",
        )
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&yearmon)
        .execute(&mut *tx)
        .await?;
    }

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO item_report_facts (
                guid, item_id, provider_id, institution_id,
                platform_id, publisher_id, data_type_id,
                access_type_id, access_method_id, yop, yearmon,
                total_item_investigations, total_item_requests,
                unique_item_investigations, unique_item_requests,
                limit_exceeded, no_license
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.item_id)
        .bind(&scope.provider_id)
        .bind(&scope.institution_id)
        .bind(&row.platform_id)
        .bind(&row.publisher_id)
        .bind(&row.data_type_id)
        .bind(&row.access_type_id)
        .bind(&row.access_method_id)
        .bind(&row.yop)
        .bind(&yearmon)
        .bind(row.counters.total_item_investigations)
        .bind(row.counters.total_item_requests)
        .bind(row.counters.unique_item_investigations)
        .bind(row.counters.unique_item_requests)
        .bind(row.counters.limit_exceeded)
        .bind(row.counters.no_license)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

pub async fn item_fact_sums(
    pool: &SqlitePool,
    provider_id: &str,
    institution_id: &str,
    yearmon: &str,
) -> Result<ItemCounters> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(total_item_investigations), 0) AS tii,
               COALESCE(SUM(total_item_requests), 0) AS tir,
               COALESCE(SUM(unique_item_investigations), 0) AS uii,
               COALESCE(SUM(unique_item_requests), 0) AS uir,
               COALESCE(SUM(limit_exceeded), 0) AS le,
               COALESCE(SUM(no_license), 0) AS nl
        FROM item_report_facts
        WHERE provider_id = ? AND institution_id = ? AND yearmon = ?
        "#,
    )
    .bind(provider_id)
    .bind(institution_id)
    .bind(yearmon)
    .fetch_one(pool)
    .await?;

    Ok(ItemCounters {
        total_item_investigations: row.get("tii"),
        total_item_requests: row.get("tir"),
        unique_item_investigations: row.get("uii"),
        unique_item_requests: row.get("uir"),
        limit_exceeded: row.get("le"),
        no_license: row.get("nl"),
    })
}
