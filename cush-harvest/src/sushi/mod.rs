//! SUSHI protocol client and outcome classification
//!
//! The client talks to vendor COUNTER endpoints and reduces every call to
//! a classified [`SushiOutcome`]: Success (a report body worth
//! validating), Pending (the vendor is still preparing the report), or
//! Fail (transport error, unusable body, or a vendor exception).

pub mod client;
pub mod codes;
pub mod raw_store;

pub use client::{PayloadOutcome, SushiClient, SushiClientConfig};
pub use codes::{ErrorCodeRegistry, Severity, CODE_BAD_PAYLOAD, CODE_NETWORK_ERROR};
pub use raw_store::{RawResponseStore, StoredRaw};

use cush_common::db::models::HarvestStatus;
use serde_json::Value;

/// SUSHI service methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SushiMethod {
    Status,
    Members,
    Reports,
}

impl SushiMethod {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Members => "members",
            Self::Reports => "reports",
        }
    }
}

/// Classified result of one SUSHI call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
    Pending,
}

/// Pipeline step a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestStep {
    Request,
    Decode,
    Validation,
    Normalization,
}

impl HarvestStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Decode => "Decode",
            Self::Validation => "Validation",
            Self::Normalization => "Normalization",
        }
    }
}

/// Classified result bundle returned at the client boundary
#[derive(Debug, Clone)]
pub struct SushiOutcome {
    pub outcome: Outcome,
    pub error_code: Option<i64>,
    pub message: String,
    pub detail: Option<String>,
    pub severity: Option<Severity>,
    pub help_url: Option<String>,
    /// Status the job should move to, from the injected code table
    pub next_status: Option<HarvestStatus>,
    pub step: HarvestStep,
}

impl SushiOutcome {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            error_code: None,
            message: String::new(),
            detail: None,
            severity: None,
            help_url: None,
            next_status: Some(HarvestStatus::Success),
            step: HarvestStep::Request,
        }
    }

    pub fn fail(code: i64, message: impl Into<String>, step: HarvestStep) -> Self {
        Self {
            outcome: Outcome::Fail,
            error_code: Some(code),
            message: message.into(),
            detail: None,
            severity: Some(Severity::Error),
            help_url: None,
            next_status: Some(HarvestStatus::Fail),
            step,
        }
    }
}

/// Vendor exception object as found in a COUNTER payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SushiException {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
    pub help_url: Option<String>,
}

/// Scan a decoded body for a COUNTER exception
///
/// Priority order: a bare `{Code, Message}` at the root, then root
/// `Exception`/`Exceptions`, then `Report_Header.Exception`/`Exceptions`.
/// Only the first exception found is surfaced.
pub fn extract_exception(body: &Value) -> Option<SushiException> {
    if let Some(exception) = parse_exception(body) {
        return Some(exception);
    }

    if let Some(exception) = exception_member(body) {
        return Some(exception);
    }

    if let Some(header) = body.get("Report_Header") {
        if let Some(exception) = exception_member(header) {
            return Some(exception);
        }
    }

    None
}

/// Check `Exception` (object) and `Exceptions` (array or singleton)
fn exception_member(value: &Value) -> Option<SushiException> {
    if let Some(exception) = value.get("Exception").and_then(parse_exception) {
        return Some(exception);
    }

    match value.get("Exceptions") {
        Some(Value::Array(list)) => list.first().and_then(parse_exception),
        Some(single) => parse_exception(single),
        None => None,
    }
}

fn parse_exception(value: &Value) -> Option<SushiException> {
    let code = match value.get("Code")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };

    let message = value
        .get("Message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Some(SushiException {
        code,
        message,
        data: value.get("Data").and_then(Value::as_str).map(String::from),
        help_url: value
            .get("Help_URL")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_code_message_wins() {
        let body = json!({
            "Code": 1011,
            "Message": "Report Queued for Processing",
            "Exceptions": [{"Code": 2000, "Message": "shadowed"}]
        });
        let exception = extract_exception(&body).unwrap();
        assert_eq!(exception.code, 1011);
        assert_eq!(exception.message, "Report Queued for Processing");
    }

    #[test]
    fn test_exceptions_array_takes_first() {
        let body = json!({
            "Exceptions": [
                {"Code": 3030, "Message": "No Usage Available", "Help_URL": "https://e.example/3030"},
                {"Code": 2000, "Message": "second"}
            ]
        });
        let exception = extract_exception(&body).unwrap();
        assert_eq!(exception.code, 3030);
        assert_eq!(exception.help_url.as_deref(), Some("https://e.example/3030"));
    }

    #[test]
    fn test_singleton_exceptions_object() {
        let body = json!({"Exceptions": {"Code": 2010, "Message": "Not Authorized"}});
        assert_eq!(extract_exception(&body).unwrap().code, 2010);
    }

    #[test]
    fn test_header_exception_found_last() {
        let body = json!({
            "Report_Header": {
                "Release": "5",
                "Exception": {"Code": 3040, "Message": "Partial Data Returned", "Data": "truncated"}
            },
            "Report_Items": []
        });
        let exception = extract_exception(&body).unwrap();
        assert_eq!(exception.code, 3040);
        assert_eq!(exception.data.as_deref(), Some("truncated"));
    }

    #[test]
    fn test_string_code_accepted() {
        let body = json!({"Code": "2020", "Message": "APIKey Invalid"});
        assert_eq!(extract_exception(&body).unwrap().code, 2020);
    }

    #[test]
    fn test_clean_report_has_no_exception() {
        let body = json!({
            "Report_Header": {"Release": "5"},
            "Report_Items": [{"Title": "X"}]
        });
        assert!(extract_exception(&body).is_none());
    }
}
