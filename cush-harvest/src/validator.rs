//! COUNTER report validation
//!
//! Structural gatekeeping plus delegated conformance checking. The policy
//! is fail-closed: a report that cannot be proven conformant is never
//! normalized. Validation errors propagate to the runner, which records
//! them as a failed harvest without retrying.

use cush_common::db::models::Release;
use cush_common::{Error, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;

/// Structural schema applied to release 5 reports. Performance is typed
/// but not required per item; items without it are skipped during
/// normalization rather than failing the report.
const SCHEMA_R5: &str = r#"
{
    "type": "object",
    "required": ["Report_Header", "Report_Items"],
    "properties": {
        "Report_Header": {
            "type": "object",
            "required": ["Report_ID", "Release"],
            "properties": {
                "Report_ID": {"type": "string"},
                "Release": {"type": ["string", "number"]}
            }
        },
        "Report_Items": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "Performance": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["Period", "Instance"],
                            "properties": {
                                "Period": {
                                    "type": "object",
                                    "required": ["Begin_Date", "End_Date"]
                                },
                                "Instance": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "required": ["Metric_Type", "Count"]
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
"#;

/// Structural schema applied to release 5.1 reports
const SCHEMA_R51: &str = r#"
{
    "type": "object",
    "required": ["Report_Header", "Report_Items"],
    "properties": {
        "Report_Header": {
            "type": "object",
            "required": ["Report_ID", "Release"],
            "properties": {
                "Report_ID": {"type": "string"},
                "Release": {"type": ["string", "number"]}
            }
        },
        "Report_Items": {
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "Attribute_Performance": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "Performance": {"type": "object"}
                            }
                        }
                    }
                }
            }
        }
    }
}
"#;

/// Delegated COUNTER conformance checking
///
/// Implementations prove (or fail to prove) that a structurally plausible
/// report conforms to the standard. An error means "not proven", which
/// the validator treats as a failure.
pub trait ConformanceChecker: Send + Sync {
    fn check(&self, report: &Value, release: Release) -> Result<()>;
}

/// Conformance checker backed by compiled JSON schemas
pub struct SchemaChecker {
    r5: Validator,
    r51: Validator,
}

impl SchemaChecker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            r5: compile_schema(SCHEMA_R5)?,
            r51: compile_schema(SCHEMA_R51)?,
        })
    }
}

fn compile_schema(schema: &str) -> Result<Validator> {
    let schema_json: Value = serde_json::from_str(schema)
        .map_err(|e| Error::Internal(format!("embedded schema is not JSON: {}", e)))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema_json)
        .map_err(|e| Error::Internal(format!("embedded schema failed to compile: {}", e)))
}

impl ConformanceChecker for SchemaChecker {
    fn check(&self, report: &Value, release: Release) -> Result<()> {
        let validator = match release {
            Release::R5 => &self.r5,
            Release::R5_1 => &self.r51,
        };
        validator
            .validate(report)
            .map_err(|e| Error::Validation(format!("conformance check failed: {}", e)))
    }
}

/// Report validator: structural gatekeeping plus delegation
pub struct ReportValidator {
    checker: Box<dyn ConformanceChecker>,
}

impl ReportValidator {
    pub fn new(checker: Box<dyn ConformanceChecker>) -> Self {
        Self { checker }
    }

    /// Validator using the built-in schema checker
    pub fn with_schema_checker() -> Result<Self> {
        Ok(Self::new(Box::new(SchemaChecker::new()?)))
    }

    /// Validate a decoded report and return its declared release
    pub fn validate(&self, report: &Value) -> Result<Release> {
        let header = report
            .get("Report_Header")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Validation("Report_Header missing or not an object".to_string()))?;

        let release = match header.get("Release") {
            Some(Value::String(s)) => s.parse::<Release>().map_err(|_| {
                Error::Validation(format!("unsupported Release: {:?}", s))
            })?,
            Some(Value::Number(n)) if n.as_i64() == Some(5) => Release::R5,
            Some(other) => {
                return Err(Error::Validation(format!(
                    "unsupported Release: {}",
                    other
                )))
            }
            None => return Err(Error::Validation("Report_Header.Release missing".to_string())),
        };

        let items = report
            .get("Report_Items")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Validation("Report_Items missing".to_string()))?;
        if items.is_empty() {
            return Err(Error::Validation("Report_Items is empty".to_string()));
        }

        self.checker.check(report, release)?;

        Ok(release)
    }
}
