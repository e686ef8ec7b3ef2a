//! Shared database models
//!
//! Row structs and the status/report enums stored as TEXT columns. The
//! admin and scheduling layers read these; the harvesting core mutates
//! harvest state exclusively through the job module.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle states of a harvest record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HarvestStatus {
    New,
    Queued,
    Pending,
    Harvesting,
    Waiting,
    Paused,
    ReQueued,
    Success,
    Fail,
}

impl HarvestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Queued => "Queued",
            Self::Pending => "Pending",
            Self::Harvesting => "Harvesting",
            Self::Waiting => "Waiting",
            Self::Paused => "Paused",
            Self::ReQueued => "ReQueued",
            Self::Success => "Success",
            Self::Fail => "Fail",
        }
    }

    /// Terminal states do not change without an explicit restart
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarvestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "New" => Ok(Self::New),
            "Queued" => Ok(Self::Queued),
            "Pending" => Ok(Self::Pending),
            "Harvesting" => Ok(Self::Harvesting),
            "Waiting" => Ok(Self::Waiting),
            "Paused" => Ok(Self::Paused),
            "ReQueued" => Ok(Self::ReQueued),
            "Success" => Ok(Self::Success),
            "Fail" => Ok(Self::Fail),
            other => Err(Error::InvalidInput(format!(
                "unknown harvest status: {:?}",
                other
            ))),
        }
    }
}

/// Credential availability as set by the admin layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    Enabled,
    Suspended,
    Incomplete,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
            Self::Incomplete => "Incomplete",
        }
    }
}

impl FromStr for CredentialStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Enabled" => Ok(Self::Enabled),
            "Suspended" => Ok(Self::Suspended),
            "Incomplete" => Ok(Self::Incomplete),
            other => Err(Error::InvalidInput(format!(
                "unknown credential status: {:?}",
                other
            ))),
        }
    }
}

/// COUNTER master report families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportKind {
    /// Title report
    Tr,
    /// Database report
    Dr,
    /// Platform report
    Pr,
    /// Item report
    Ir,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tr => "TR",
            Self::Dr => "DR",
            Self::Pr => "PR",
            Self::Ir => "IR",
        }
    }

    /// Report identifier as it appears in the SUSHI path (`/reports/tr`)
    pub fn path_id(&self) -> &'static str {
        match self {
            Self::Tr => "tr",
            Self::Dr => "dr",
            Self::Pr => "pr",
            Self::Ir => "ir",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TR" => Ok(Self::Tr),
            "DR" => Ok(Self::Dr),
            "PR" => Ok(Self::Pr),
            "IR" => Ok(Self::Ir),
            other => Err(Error::InvalidInput(format!(
                "unknown report kind: {:?}",
                other
            ))),
        }
    }
}

/// COUNTER wire-format generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Release {
    R5,
    R5_1,
}

impl Release {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R5 => "5",
            Self::R5_1 => "5.1",
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Release {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "5" => Ok(Self::R5),
            "5.1" => Ok(Self::R5_1),
            other => Err(Error::InvalidInput(format!(
                "unknown COUNTER release: {:?}",
                other
            ))),
        }
    }
}

/// Connector query parameters a provider may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connector {
    CustomerId,
    RequestorId,
    ApiKey,
    ExtraArgs,
    Platform,
}

impl Connector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerId => "customer_id",
            Self::RequestorId => "requestor_id",
            Self::ApiKey => "api_key",
            Self::ExtraArgs => "extra_args",
            Self::Platform => "platform",
        }
    }
}

impl FromStr for Connector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "customer_id" => Ok(Self::CustomerId),
            "requestor_id" => Ok(Self::RequestorId),
            "api_key" => Ok(Self::ApiKey),
            "extra_args" => Ok(Self::ExtraArgs),
            "platform" => Ok(Self::Platform),
            other => Err(Error::InvalidInput(format!(
                "unknown connector: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Institution {
    pub guid: String,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub guid: String,
    pub name: String,
    pub server_url: String,
    pub is_active: bool,
}

/// SUSHI connection values for one (institution, provider) pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub guid: String,
    pub institution_id: String,
    pub provider_id: String,
    pub release: Release,
    pub status: CredentialStatus,
    pub customer_id: Option<String>,
    pub requestor_id: Option<String>,
    pub api_key: Option<String>,
    pub extra_args: Option<String>,
    pub platform: Option<String>,
    /// Guid of the most recent successful harvest for this credential
    pub last_success_id: Option<String>,
}

/// One (credential, report, yearmon) harvest record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Harvest {
    pub guid: String,
    pub credential_id: String,
    pub report: ReportKind,
    pub yearmon: String,
    pub release: Release,
    pub status: HarvestStatus,
    pub attempts: i64,
    pub last_error_id: Option<String>,
}

/// Append-only failure history entry for a harvest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedHarvest {
    pub guid: String,
    pub harvest_id: String,
    pub error_code: i64,
    pub detail: String,
    pub help_url: Option<String>,
    pub process_step: String,
    pub created_at: String,
}

/// Pending-work entry; at most one per harvest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub guid: String,
    pub harvest_id: String,
    pub replace_data: bool,
    pub created_at: String,
}
