//! cush-harvest - one-shot harvest attempt runner
//!
//! Executes exactly one attempt for a queued harvest and records the
//! outcome on the job record. Deciding *when* to run lives with the
//! scheduler; this binary is what the scheduler's workers invoke.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cush_common::config;
use cush_harvest::resolver::TextLimits;
use cush_harvest::runner::{AttemptOutcome, HarvestRunner};
use cush_harvest::sushi::{ErrorCodeRegistry, RawResponseStore, SushiClient, SushiClientConfig};
use cush_harvest::validator::ReportValidator;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cush-harvest", about = "Run one COUNTER harvest attempt")]
struct Args {
    /// Config file path (falls back to CUSH_CONFIG, then platform dirs)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(long)]
    db: Option<PathBuf>,

    /// Guid of the harvest to execute
    #[arg(long)]
    harvest: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = config::load_config(args.config.as_deref())?;

    let db_path = args
        .db
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(config::default_database_path);
    info!("Database: {}", db_path.display());
    let pool = cush_common::db::init_database(&db_path).await?;

    let registry = match &config.error_codes_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            ErrorCodeRegistry::from_toml_str(&content)?
        }
        None => ErrorCodeRegistry::with_defaults(),
    };

    let raw_store = if config.save_raw_responses {
        match &config.raw_response_key {
            Some(hex) => {
                let key = RawResponseStore::key_from_hex(hex)?;
                let root = config
                    .storage_root
                    .clone()
                    .unwrap_or_else(config::default_storage_root);
                Some(RawResponseStore::new(root, config.consortium_id.clone(), &key))
            }
            None => {
                warn!("save_raw_responses is set but raw_response_key is missing; raw responses will not be kept");
                None
            }
        }
    } else {
        None
    };

    let runner = HarvestRunner::new(
        pool,
        SushiClient::new(SushiClientConfig::from_config(&config)),
        registry,
        ReportValidator::with_schema_checker()?,
        raw_store,
        TextLimits {
            short: config.short_field_max,
            long: config.long_field_max,
        },
    );

    match runner.run(&args.harvest).await? {
        AttemptOutcome::Success => info!("harvest {} succeeded", args.harvest),
        AttemptOutcome::Pending => info!("harvest {} pending at the vendor", args.harvest),
        AttemptOutcome::Fail => warn!("harvest {} failed; see its failure history", args.harvest),
        AttemptOutcome::NotClaimed => warn!("harvest {} was not claimable", args.harvest),
    }

    Ok(())
}
