//! Report normalization
//!
//! Turns a validated COUNTER report into fact rows. The two wire
//! generations are reduced to one shape before anything touches the
//! database: release 5 carries `Performance` period/instance blocks, of
//! which only the block matching the requested date range counts;
//! release 5.1 carries `Attribute_Performance` maps addressed directly
//! by the target month. Both paths converge on [`MetricDeltas`], the
//! metric contributions for exactly one fact row, so each family's
//! insert logic exists once.

pub mod database;
pub mod item;
pub mod platform;
pub mod title;

use cush_common::db::models::{Release, ReportKind};
use cush_common::{Error, Result, YearMon};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::facts::FactScope;
use crate::resolver::DimensionResolver;

/// Everything a normalization run needs to know about its scope
///
/// Passed explicitly to every helper so runs are re-entrant and testable
/// in isolation; nothing about the current provider, institution or date
/// range lives in process-wide state.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub provider_id: String,
    pub institution_id: String,
    pub yearmon: YearMon,
    pub release: Release,
    pub replace: bool,
}

impl NormalizeContext {
    pub fn scope(&self) -> FactScope {
        FactScope {
            provider_id: self.provider_id.clone(),
            institution_id: self.institution_id.clone(),
            yearmon: self.yearmon,
            replace: self.replace,
        }
    }
}

/// Metric contributions for one fact row, keyed by wire metric name
///
/// Names are matched against each family's vocabulary afterwards;
/// carrying them as strings here keeps the two release decoders free of
/// per-family knowledge.
#[derive(Debug, Clone, Default)]
pub struct MetricDeltas {
    entries: Vec<(String, i64)>,
}

impl MetricDeltas {
    pub fn push(&mut self, metric: String, count: i64) {
        self.entries.push((metric, count));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

/// Decode release-5 `Performance` blocks for one report item
///
/// Only the block whose `Period` exactly matches the requested
/// begin/end range contributes counts.
pub fn deltas_release5(item: &Value, yearmon: &YearMon) -> MetricDeltas {
    let begin = yearmon.begin_date().to_string();
    let end = yearmon.end_date().to_string();
    let mut deltas = MetricDeltas::default();

    let Some(blocks) = item.get("Performance").and_then(Value::as_array) else {
        return deltas;
    };

    for block in blocks {
        let period = block.get("Period");
        let block_begin = period
            .and_then(|p| p.get("Begin_Date"))
            .and_then(Value::as_str);
        let block_end = period
            .and_then(|p| p.get("End_Date"))
            .and_then(Value::as_str);
        if block_begin != Some(begin.as_str()) || block_end != Some(end.as_str()) {
            continue;
        }

        let Some(instances) = block.get("Instance").and_then(Value::as_array) else {
            continue;
        };
        for instance in instances {
            let Some(metric) = instance.get("Metric_Type").and_then(Value::as_str) else {
                continue;
            };
            if let Some(count) = as_count(instance.get("Count")) {
                deltas.push(metric.to_string(), count);
            }
        }
    }

    deltas
}

/// Decode a release-5.1 `Performance` map for one attribute block
///
/// The map goes metric name -> month -> count and is addressed directly
/// by the target yearmon; no period-range matching exists in 5.1.
pub fn deltas_release51(performance: &Value, yearmon: &YearMon) -> MetricDeltas {
    let month = yearmon.to_string();
    let mut deltas = MetricDeltas::default();

    let Some(metrics) = performance.as_object() else {
        return deltas;
    };

    for (metric, months) in metrics {
        if let Some(count) = as_count(months.get(&month)) {
            deltas.push(metric.clone(), count);
        }
    }

    deltas
}

fn as_count(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Normalize one validated report into its family's fact table
///
/// Returns the number of fact rows inserted. Malformed individual items
/// are skipped; they never abort the report.
pub async fn normalize_report(
    pool: &SqlitePool,
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    report: &Value,
    kind: ReportKind,
) -> Result<u64> {
    let items = report
        .get("Report_Items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Validation("Report_Items missing".to_string()))?;

    let inserted = match kind {
        ReportKind::Tr => title::normalize(pool, resolver, context, items).await?,
        ReportKind::Dr => database::normalize(pool, resolver, context, items).await?,
        ReportKind::Pr => platform::normalize(pool, resolver, context, items).await?,
        ReportKind::Ir => item::normalize(pool, resolver, context, items).await?,
    };

    info!(
        report = kind.as_str(),
        provider_id = %context.provider_id,
        institution_id = %context.institution_id,
        yearmon = %context.yearmon,
        rows = inserted,
        "report normalized"
    );

    Ok(inserted)
}
