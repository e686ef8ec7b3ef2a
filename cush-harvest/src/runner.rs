//! One harvest attempt, end to end
//!
//! Claim the queued harvest, call the vendor, classify, and either
//! validate + normalize (Success), park the job (Pending), or append a
//! failure record (Fail). Validator and normalizer errors are caught at
//! this boundary and recorded as failures; they never propagate as
//! panics into the worker.

use std::str::FromStr;

use anyhow::Result;
use cush_common::db::models::HarvestStatus;
use cush_common::YearMon;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::harvests::{load_context, HarvestContext};
use crate::db::providers::required_connectors;
use crate::job::{self, queue, FailureRecord};
use crate::normalize::{normalize_report, NormalizeContext};
use crate::resolver::{DimensionResolver, TextLimits};
use crate::sushi::client::build_report_uri;
use crate::sushi::codes::{CODE_NORMALIZATION, CODE_VALIDATION};
use crate::sushi::{
    ErrorCodeRegistry, HarvestStep, Outcome, PayloadOutcome, RawResponseStore, SushiClient,
};
use crate::validator::ReportValidator;

/// What one attempt did to the harvest record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Another worker holds the harvest (or it was not queued)
    NotClaimed,
    Success,
    Pending,
    Fail,
}

/// Executes single harvest attempts
pub struct HarvestRunner {
    pool: SqlitePool,
    client: SushiClient,
    registry: ErrorCodeRegistry,
    validator: ReportValidator,
    raw_store: Option<RawResponseStore>,
    limits: TextLimits,
}

impl HarvestRunner {
    pub fn new(
        pool: SqlitePool,
        client: SushiClient,
        registry: ErrorCodeRegistry,
        validator: ReportValidator,
        raw_store: Option<RawResponseStore>,
        limits: TextLimits,
    ) -> Self {
        Self {
            pool,
            client,
            registry,
            validator,
            raw_store,
            limits,
        }
    }

    /// Run one attempt for a queued harvest
    pub async fn run(&self, harvest_id: &str) -> Result<AttemptOutcome> {
        if !job::claim(&self.pool, harvest_id).await? {
            debug!(harvest_id, "harvest not claimable");
            return Ok(AttemptOutcome::NotClaimed);
        }

        let context = load_context(&self.pool, harvest_id).await?;
        let replace = queue::replace_flag(&self.pool, harvest_id).await?;

        info!(
            harvest_id,
            report = context.harvest.report.as_str(),
            yearmon = %context.harvest.yearmon,
            provider = %context.provider.name,
            institution = %context.institution.name,
            "harvest attempt started"
        );

        let required = required_connectors(&self.pool, &context.provider.guid).await?;
        let yearmon = YearMon::from_str(&context.harvest.yearmon)?;
        let url = build_report_uri(
            &context.provider.server_url,
            &context.credential,
            &required,
            context.harvest.report,
            context.harvest.release,
            yearmon,
        )?;

        let payload = self.client.request(url, &self.registry).await;
        self.settle(&context, yearmon, replace, payload).await
    }

    /// Apply a classified payload to the job record
    ///
    /// Public for the benefit of tests and replay tooling: it is the
    /// whole attempt minus the network call.
    pub async fn settle(
        &self,
        context: &HarvestContext,
        yearmon: YearMon,
        replace: bool,
        payload: PayloadOutcome,
    ) -> Result<AttemptOutcome> {
        let harvest_id = context.harvest.guid.as_str();

        // Keep the exact vendor bytes for audit before anything else can
        // go wrong; shape failures arrive here with payload.raw == None
        let stored_raw = match (&self.raw_store, &payload.raw) {
            (Some(store), Some(raw)) => Some(store.save(
                &context.institution.guid,
                &context.provider.guid,
                harvest_id,
                context.harvest.report,
                &context.harvest.yearmon,
                raw,
            )?),
            _ => None,
        };

        match payload.outcome.outcome {
            Outcome::Fail => {
                job::record_fail(
                    &self.pool,
                    harvest_id,
                    &FailureRecord {
                        error_code: payload.outcome.error_code.unwrap_or_default(),
                        detail: failure_detail(&payload.outcome.message, &payload.outcome.detail),
                        help_url: payload.outcome.help_url.clone(),
                        step: payload.outcome.step,
                    },
                )
                .await?;
                Ok(AttemptOutcome::Fail)
            }

            Outcome::Pending => {
                let next = payload.outcome.next_status.unwrap_or(HarvestStatus::Pending);
                if next == HarvestStatus::Success {
                    // e.g. "no usage for these dates": an empty month
                    job::record_success(&self.pool, harvest_id).await?;
                    return Ok(AttemptOutcome::Success);
                }
                job::record_pending(&self.pool, harvest_id, next).await?;
                Ok(AttemptOutcome::Pending)
            }

            Outcome::Success => {
                let body = match payload.body {
                    Some(body) => body,
                    None => {
                        job::record_fail(
                            &self.pool,
                            harvest_id,
                            &FailureRecord {
                                error_code: CODE_VALIDATION,
                                detail: "successful outcome without a body".to_string(),
                                help_url: None,
                                step: HarvestStep::Validation,
                            },
                        )
                        .await?;
                        return Ok(AttemptOutcome::Fail);
                    }
                };

                let release = match self.validator.validate(&body) {
                    Ok(release) => release,
                    Err(e) => {
                        // a copy that failed validation is not worth keeping
                        if let (Some(store), Some(stored)) = (&self.raw_store, &stored_raw) {
                            store.delete(&stored.path)?;
                        }
                        job::record_fail(
                            &self.pool,
                            harvest_id,
                            &FailureRecord {
                                error_code: CODE_VALIDATION,
                                detail: e.to_string(),
                                help_url: None,
                                step: HarvestStep::Validation,
                            },
                        )
                        .await?;
                        return Ok(AttemptOutcome::Fail);
                    }
                };

                let mut resolver = DimensionResolver::load(&self.pool, self.limits).await?;
                let normalize_context = NormalizeContext {
                    provider_id: context.provider.guid.clone(),
                    institution_id: context.institution.guid.clone(),
                    yearmon,
                    // trust the body, not the request: some vendors answer
                    // a 5 request with a 5.1 payload
                    release,
                    replace,
                };

                match normalize_report(
                    &self.pool,
                    &mut resolver,
                    &normalize_context,
                    &body,
                    context.harvest.report,
                )
                .await
                {
                    Ok(rows) => {
                        job::record_success(&self.pool, harvest_id).await?;
                        info!(harvest_id, rows, "harvest attempt succeeded");
                        Ok(AttemptOutcome::Success)
                    }
                    Err(e) => {
                        job::record_fail(
                            &self.pool,
                            harvest_id,
                            &FailureRecord {
                                error_code: CODE_NORMALIZATION,
                                detail: e.to_string(),
                                help_url: None,
                                step: HarvestStep::Normalization,
                            },
                        )
                        .await?;
                        Ok(AttemptOutcome::Fail)
                    }
                }
            }
        }
    }
}

fn failure_detail(message: &str, detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!("{} ({})", message, detail),
        _ => message.to_string(),
    }
}
