//! SUSHI error-code registry
//!
//! Maps vendor exception codes to a severity and the harvest status that
//! should follow. The table is configuration, not logic: the built-in
//! defaults cover the canonical COUNTER codes and a deployment can
//! replace or extend individual entries from a TOML file.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use cush_common::db::models::HarvestStatus;
use cush_common::{Error, Result};
use serde::Deserialize;

use super::{HarvestStep, Outcome, SushiException, SushiOutcome};

/// Internal code for transport-level failures (connection, timeout, DNS)
pub const CODE_NETWORK_ERROR: i64 = 9000;
/// Internal code for bodies that are not a JSON object
pub const CODE_BAD_PAYLOAD: i64 = 9010;
/// Internal code for reports rejected by the validator
pub const CODE_VALIDATION: i64 = 9020;
/// Internal code for normalization failures
pub const CODE_NORMALIZATION: i64 = 9030;

/// Severity attached to a known exception code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Informational severities are not failures
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Debug | Self::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(Error::InvalidInput(format!(
                "unknown severity: {:?}",
                other
            ))),
        }
    }
}

/// Registry entry for one exception code
#[derive(Debug, Clone, Copy)]
pub struct CodeEntry {
    pub severity: Severity,
    pub next_status: Option<HarvestStatus>,
}

/// Injected code-to-severity table
#[derive(Debug, Clone)]
pub struct ErrorCodeRegistry {
    entries: HashMap<i64, CodeEntry>,
}

#[derive(Debug, Deserialize)]
struct CodeFile {
    #[serde(default)]
    codes: Vec<CodeFileEntry>,
}

#[derive(Debug, Deserialize)]
struct CodeFileEntry {
    code: i64,
    severity: String,
    next_status: Option<String>,
}

impl ErrorCodeRegistry {
    /// Registry preloaded with the canonical COUNTER exception codes
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };

        // Service-level codes
        registry.insert(1000, Severity::Fatal, Some(HarvestStatus::Fail));
        registry.insert(1010, Severity::Warning, Some(HarvestStatus::Fail));
        // Report queued / processing: try again later, not a failure
        registry.insert(1011, Severity::Info, Some(HarvestStatus::Pending));
        registry.insert(1020, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(1030, Severity::Error, Some(HarvestStatus::Fail));

        // Authorization codes
        registry.insert(2000, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(2010, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(2020, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(2030, Severity::Error, Some(HarvestStatus::Fail));

        // Report-level codes
        registry.insert(3000, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3010, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3020, Severity::Error, Some(HarvestStatus::Fail));
        // No usage for the requested dates: an empty month, not an error
        registry.insert(3030, Severity::Info, Some(HarvestStatus::Success));
        // Usage not ready yet: park the harvest until the vendor catches up
        registry.insert(3031, Severity::Info, Some(HarvestStatus::Waiting));
        registry.insert(3040, Severity::Warning, Some(HarvestStatus::Fail));
        registry.insert(3050, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3060, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3061, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3062, Severity::Error, Some(HarvestStatus::Fail));
        registry.insert(3070, Severity::Error, Some(HarvestStatus::Fail));

        registry
    }

    /// Defaults overridden/extended by a TOML table
    ///
    /// ```toml
    /// [[codes]]
    /// code = 4010
    /// severity = "info"
    /// next_status = "Waiting"
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CodeFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("cannot parse error-code table: {}", e)))?;

        let mut registry = Self::with_defaults();
        for entry in file.codes {
            let severity: Severity = entry.severity.parse()?;
            let next_status = entry
                .next_status
                .as_deref()
                .map(HarvestStatus::from_str)
                .transpose()?;
            registry.entries.insert(
                entry.code,
                CodeEntry {
                    severity,
                    next_status,
                },
            );
        }
        Ok(registry)
    }

    pub fn insert(&mut self, code: i64, severity: Severity, next_status: Option<HarvestStatus>) {
        self.entries.insert(
            code,
            CodeEntry {
                severity,
                next_status,
            },
        );
    }

    pub fn get(&self, code: i64) -> Option<&CodeEntry> {
        self.entries.get(&code)
    }

    /// Classify a vendor exception into an outcome bundle
    ///
    /// Informational and debug severities are not failures; everything
    /// else, including codes absent from the table, fails the harvest.
    pub fn classify(&self, exception: &SushiException) -> SushiOutcome {
        match self.entries.get(&exception.code) {
            Some(entry) if entry.severity.is_informational() => SushiOutcome {
                outcome: Outcome::Pending,
                error_code: Some(exception.code),
                message: exception.message.clone(),
                detail: exception.data.clone(),
                severity: Some(entry.severity),
                help_url: exception.help_url.clone(),
                next_status: Some(entry.next_status.unwrap_or(HarvestStatus::Pending)),
                step: HarvestStep::Request,
            },
            Some(entry) => SushiOutcome {
                outcome: Outcome::Fail,
                error_code: Some(exception.code),
                message: exception.message.clone(),
                detail: exception.data.clone(),
                severity: Some(entry.severity),
                help_url: exception.help_url.clone(),
                next_status: Some(entry.next_status.unwrap_or(HarvestStatus::Fail)),
                step: HarvestStep::Request,
            },
            None => SushiOutcome {
                outcome: Outcome::Fail,
                error_code: Some(exception.code),
                message: exception.message.clone(),
                detail: exception.data.clone(),
                severity: Some(Severity::Error),
                help_url: exception.help_url.clone(),
                next_status: Some(HarvestStatus::Fail),
                step: HarvestStep::Request,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception(code: i64, message: &str) -> SushiException {
        SushiException {
            code,
            message: message.to_string(),
            data: None,
            help_url: None,
        }
    }

    #[test]
    fn test_report_queued_is_pending() {
        let registry = ErrorCodeRegistry::with_defaults();
        let outcome = registry.classify(&exception(1011, "Report Queued for Processing"));
        assert_eq!(outcome.outcome, Outcome::Pending);
        assert_eq!(outcome.next_status, Some(HarvestStatus::Pending));
    }

    #[test]
    fn test_no_usage_maps_to_success() {
        let registry = ErrorCodeRegistry::with_defaults();
        let outcome = registry.classify(&exception(3030, "No Usage Available"));
        assert_eq!(outcome.outcome, Outcome::Pending);
        assert_eq!(outcome.next_status, Some(HarvestStatus::Success));
    }

    #[test]
    fn test_authorization_error_fails() {
        let registry = ErrorCodeRegistry::with_defaults();
        let outcome = registry.classify(&exception(2000, "Requestor Not Authorized"));
        assert_eq!(outcome.outcome, Outcome::Fail);
        assert_eq!(outcome.severity, Some(Severity::Error));
    }

    #[test]
    fn test_unknown_code_fails_generically() {
        let registry = ErrorCodeRegistry::with_defaults();
        let outcome = registry.classify(&exception(8123, "mystery"));
        assert_eq!(outcome.outcome, Outcome::Fail);
        assert_eq!(outcome.error_code, Some(8123));
        assert_eq!(outcome.next_status, Some(HarvestStatus::Fail));
    }

    #[test]
    fn test_toml_override() {
        let registry = ErrorCodeRegistry::from_toml_str(
            r#"
            [[codes]]
            code = 3040
            severity = "info"
            next_status = "Success"

            [[codes]]
            code = 7001
            severity = "fatal"
            "#,
        )
        .unwrap();

        let partial = registry.classify(&exception(3040, "Partial Data Returned"));
        assert_eq!(partial.outcome, Outcome::Pending);
        assert_eq!(partial.next_status, Some(HarvestStatus::Success));

        let vendor = registry.classify(&exception(7001, "vendor specific"));
        assert_eq!(vendor.outcome, Outcome::Fail);
        assert_eq!(vendor.severity, Some(Severity::Fatal));

        // untouched defaults survive
        assert_eq!(
            registry.classify(&exception(1011, "queued")).outcome,
            Outcome::Pending
        );
    }

    #[test]
    fn test_bad_toml_is_rejected() {
        assert!(ErrorCodeRegistry::from_toml_str("codes = 3").is_err());
        assert!(ErrorCodeRegistry::from_toml_str(
            "[[codes]]\ncode = 1\nseverity = \"loud\"\n"
        )
        .is_err());
    }
}
