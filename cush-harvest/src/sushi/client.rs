//! SUSHI HTTP client
//!
//! Builds request URIs from stored credentials, executes the call, and
//! classifies the payload. HTTP error statuses are not failures by
//! themselves: several vendors put a perfectly usable COUNTER exception
//! body behind a 4xx status, so classification always looks at the body.

use std::num::NonZeroU32;
use std::time::Duration;

use cush_common::db::models::{Connector, Credential, Release, ReportKind};
use cush_common::{config, Error, Result, YearMon};
use governor::{Quota, RateLimiter};
use reqwest::header::USER_AGENT;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::codes::{ErrorCodeRegistry, CODE_BAD_PAYLOAD, CODE_NETWORK_ERROR};
use super::{extract_exception, HarvestStep, SushiMethod, SushiOutcome};

/// Bytes of decode headroom assumed per body byte; an empirical
/// multiplier covering the parse buffer plus the resulting object graph
const DECODE_OVERHEAD_FACTOR: u64 = 8;

/// Client construction parameters
#[derive(Debug, Clone)]
pub struct SushiClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub decode_memory_budget: u64,
}

impl Default for SushiClientConfig {
    fn default() -> Self {
        Self {
            user_agent: config::get_user_agent(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            decode_memory_budget: 1 << 30,
        }
    }
}

impl SushiClientConfig {
    /// Derive client parameters from the loaded TOML configuration
    pub fn from_config(toml_config: &config::TomlConfig) -> Self {
        Self {
            user_agent: config::get_user_agent(),
            timeout: Duration::from_secs(toml_config.request_timeout_secs),
            connect_timeout: Duration::from_secs(toml_config.connect_timeout_secs),
            decode_memory_budget: toml_config.decode_memory_budget_bytes,
        }
    }
}

/// Classified payload plus the raw bytes worth keeping
#[derive(Debug)]
pub struct PayloadOutcome {
    pub outcome: SushiOutcome,
    /// Decoded body; present for Success and for classified exceptions
    pub body: Option<Value>,
    /// Original response bytes; None when the body failed shape checks,
    /// so an unusable payload is never persisted
    pub raw: Option<Vec<u8>>,
}

/// SUSHI protocol client
pub struct SushiClient {
    client: Client,
    user_agent: String,
    decode_memory_budget: u64,
    /// One request per second per client instance; SUSHI endpoints
    /// throttle (or ban) faster callers
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SushiClient {
    /// Create a client with the caller-supplied timeouts
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid config)
    pub fn new(config: SushiClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to build HTTP client");

        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(1).expect("1 is non-zero")));

        Self {
            client,
            user_agent: config.user_agent,
            decode_memory_budget: config.decode_memory_budget,
            rate_limiter,
        }
    }

    /// Execute a GET against a SUSHI URI and classify the result
    pub async fn request(&self, url: Url, registry: &ErrorCodeRegistry) -> PayloadOutcome {
        self.rate_limiter.until_ready().await;

        debug!("SUSHI request: {}", url);

        // Identify ourselves explicitly; several vendors reject default
        // client agents with HTTP 403
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return PayloadOutcome {
                    outcome: SushiOutcome::fail(
                        CODE_NETWORK_ERROR,
                        format!("SUSHI request failed: {}", e),
                        HarvestStep::Request,
                    ),
                    body: None,
                    raw: None,
                }
            }
        };

        let http_status = response.status().as_u16();

        // reqwest does not turn 4xx/5xx into errors unless asked to; the
        // body is read regardless so vendor exception payloads survive
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return PayloadOutcome {
                    outcome: SushiOutcome::fail(
                        CODE_NETWORK_ERROR,
                        format!("SUSHI response read failed: {}", e),
                        HarvestStep::Request,
                    ),
                    body: None,
                    raw: None,
                }
            }
        };

        self.classify_payload(&bytes, http_status, registry)
    }

    /// Classify a response body into an outcome bundle
    ///
    /// Split out from [`request`](Self::request) so the full decision
    /// table is testable without a network.
    pub fn classify_payload(
        &self,
        bytes: &[u8],
        http_status: u16,
        registry: &ErrorCodeRegistry,
    ) -> PayloadOutcome {
        let estimated = bytes.len() as u64 * DECODE_OVERHEAD_FACTOR;
        if estimated > self.decode_memory_budget {
            warn!(
                body_bytes = bytes.len(),
                estimated, "response body may exceed the decode memory budget"
            );
        }

        let decoded: Value = match serde_json::from_slice(bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                return PayloadOutcome {
                    outcome: SushiOutcome::fail(
                        CODE_BAD_PAYLOAD,
                        format!("response is not JSON (HTTP {}): {}", http_status, e),
                        HarvestStep::Decode,
                    ),
                    body: None,
                    raw: None,
                }
            }
        };

        // Some endpoints wrap the report in a one-element array
        let body = match decoded {
            Value::Array(mut list) if !list.is_empty() => list.remove(0),
            other => other,
        };

        if !body.is_object() {
            return PayloadOutcome {
                outcome: SushiOutcome::fail(
                    CODE_BAD_PAYLOAD,
                    format!("response body is not a JSON object (HTTP {})", http_status),
                    HarvestStep::Decode,
                ),
                body: None,
                raw: None,
            };
        }

        let outcome = match extract_exception(&body) {
            Some(exception) => {
                debug!(
                    code = exception.code,
                    message = %exception.message,
                    "SUSHI exception in response"
                );
                registry.classify(&exception)
            }
            None => SushiOutcome::success(),
        };

        PayloadOutcome {
            outcome,
            body: Some(body),
            raw: Some(bytes.to_vec()),
        }
    }
}

/// Normalize a stored service URL and append a SUSHI method segment
///
/// Admins paste service URLs with and without the `/reports`, `/status`
/// or `/members` suffix; both forms must yield the same request URI.
pub fn method_base(server_url: &str, method: SushiMethod) -> String {
    let mut base = server_url.trim_end_matches('/');
    for suffix in ["/reports", "/status", "/members"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped;
            break;
        }
    }
    format!("{}/{}", base, method.path_segment())
}

fn append_connectors(
    query: &mut url::form_urlencoded::Serializer<'_, url::UrlQuery<'_>>,
    credential: &Credential,
    required: &[Connector],
) {
    for connector in required {
        match connector {
            Connector::CustomerId => {
                query.append_pair("customer_id", credential.customer_id.as_deref().unwrap_or(""));
            }
            Connector::RequestorId => {
                query.append_pair(
                    "requestor_id",
                    credential.requestor_id.as_deref().unwrap_or(""),
                );
            }
            Connector::ApiKey => {
                query.append_pair("api_key", credential.api_key.as_deref().unwrap_or(""));
            }
            Connector::Platform => {
                query.append_pair("platform", credential.platform.as_deref().unwrap_or(""));
            }
            Connector::ExtraArgs => {
                // Free-form `a=1&b=2` string maintained by admins
                if let Some(extra) = credential.extra_args.as_deref() {
                    for pair in extra.trim_start_matches('&').split('&') {
                        if pair.is_empty() {
                            continue;
                        }
                        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                        query.append_pair(key, value);
                    }
                }
            }
        }
    }
}

/// Build a `/status` or `/members` URI with the required connectors
pub fn build_service_uri(
    server_url: &str,
    credential: &Credential,
    required: &[Connector],
    method: SushiMethod,
) -> Result<Url> {
    let base = method_base(server_url, method);
    let mut url = Url::parse(&base)
        .map_err(|e| Error::InvalidInput(format!("bad service URL {:?}: {}", server_url, e)))?;

    {
        let mut query = url.query_pairs_mut();
        append_connectors(&mut query, credential, required);
    }

    Ok(url)
}

/// Build the full report request URI for one harvest
///
/// Only the connector parameters the provider declares as required are
/// appended; `begin_date`/`end_date` cover the whole target month, and
/// `attributes_to_show` varies by family and release.
pub fn build_report_uri(
    server_url: &str,
    credential: &Credential,
    required: &[Connector],
    report: ReportKind,
    release: Release,
    yearmon: YearMon,
) -> Result<Url> {
    let base = format!(
        "{}/{}",
        method_base(server_url, SushiMethod::Reports),
        report.path_id()
    );

    let mut url = Url::parse(&base)
        .map_err(|e| Error::InvalidInput(format!("bad service URL {:?}: {}", server_url, e)))?;

    {
        let mut query = url.query_pairs_mut();
        append_connectors(&mut query, credential, required);

        query.append_pair("begin_date", &yearmon.begin_date().to_string());
        query.append_pair("end_date", &yearmon.end_date().to_string());

        if let Some(attributes) = crate::report::attributes_to_show(report, release) {
            query.append_pair("attributes_to_show", attributes);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cush_common::db::models::CredentialStatus;
    use serde_json::json;

    fn test_credential() -> Credential {
        Credential {
            guid: "cred-1".to_string(),
            institution_id: "inst-1".to_string(),
            provider_id: "prov-1".to_string(),
            release: Release::R5,
            status: CredentialStatus::Enabled,
            customer_id: Some("c123".to_string()),
            requestor_id: Some("r456".to_string()),
            api_key: Some("k789".to_string()),
            extra_args: Some("foo=bar&baz=qux".to_string()),
            platform: Some("hub".to_string()),
            last_success_id: None,
        }
    }

    fn yearmon() -> YearMon {
        "2024-03".parse().unwrap()
    }

    #[test]
    fn test_method_base_strips_known_suffixes() {
        for stored in [
            "https://sushi.example.com/r5",
            "https://sushi.example.com/r5/",
            "https://sushi.example.com/r5/reports",
            "https://sushi.example.com/r5/status",
            "https://sushi.example.com/r5/members/",
        ] {
            assert_eq!(
                method_base(stored, SushiMethod::Reports),
                "https://sushi.example.com/r5/reports",
                "stored URL: {}",
                stored
            );
        }
        assert_eq!(
            method_base("https://sushi.example.com/r5/reports", SushiMethod::Status),
            "https://sushi.example.com/r5/status"
        );
    }

    #[test]
    fn test_status_uri_carries_connectors() {
        let url = build_service_uri(
            "https://sushi.example.com/r5/reports",
            &test_credential(),
            &[Connector::CustomerId, Connector::RequestorId],
            SushiMethod::Status,
        )
        .unwrap();

        assert!(url.path().ends_with("/status"));
        let query = url.query().unwrap();
        assert!(query.contains("customer_id=c123"));
        assert!(query.contains("requestor_id=r456"));
    }

    #[test]
    fn test_report_uri_only_required_connectors() {
        let url = build_report_uri(
            "https://sushi.example.com/r5",
            &test_credential(),
            &[Connector::CustomerId, Connector::ApiKey],
            ReportKind::Tr,
            Release::R5,
            yearmon(),
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(query.contains("customer_id=c123"));
        assert!(query.contains("api_key=k789"));
        assert!(!query.contains("requestor_id"));
        assert!(!query.contains("platform="));
        assert!(url.path().ends_with("/reports/tr"));
    }

    #[test]
    fn test_report_uri_dates_and_attributes() {
        let url = build_report_uri(
            "https://sushi.example.com/r5/reports",
            &test_credential(),
            &[Connector::CustomerId],
            ReportKind::Tr,
            Release::R5,
            yearmon(),
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(query.contains("begin_date=2024-03-01"));
        assert!(query.contains("end_date=2024-03-31"));
        assert!(query.contains("attributes_to_show="));
        assert!(query.contains("Section_Type"));
    }

    #[test]
    fn test_report_uri_extra_args_expanded() {
        let url = build_report_uri(
            "https://sushi.example.com/r5",
            &test_credential(),
            &[Connector::ExtraArgs],
            ReportKind::Dr,
            Release::R5,
            yearmon(),
        )
        .unwrap();

        let query = url.query().unwrap();
        assert!(query.contains("foo=bar"));
        assert!(query.contains("baz=qux"));
    }

    #[test]
    fn test_classify_clean_report() {
        let client = SushiClient::new(SushiClientConfig::default());
        let registry = ErrorCodeRegistry::with_defaults();
        let body = json!({
            "Report_Header": {"Release": "5", "Report_ID": "TR"},
            "Report_Items": [{"Title": "X"}]
        });
        let bytes = serde_json::to_vec(&body).unwrap();

        let result = client.classify_payload(&bytes, 200, &registry);
        assert_eq!(result.outcome.outcome, crate::sushi::Outcome::Success);
        assert!(result.body.is_some());
        assert!(result.raw.is_some());
    }

    #[test]
    fn test_classify_queued_report_is_pending() {
        let client = SushiClient::new(SushiClientConfig::default());
        let registry = ErrorCodeRegistry::with_defaults();
        let bytes = br#"{"Code": 1011, "Message": "Report Queued for Processing"}"#;

        let result = client.classify_payload(bytes, 202, &registry);
        assert_eq!(result.outcome.outcome, crate::sushi::Outcome::Pending);
        assert_eq!(result.outcome.error_code, Some(1011));
        // Exception payloads are still retained for audit
        assert!(result.raw.is_some());
    }

    #[test]
    fn test_classify_html_login_page_is_shape_failure() {
        let client = SushiClient::new(SushiClientConfig::default());
        let registry = ErrorCodeRegistry::with_defaults();
        let bytes = b"<html><body>Please sign in</body></html>";

        let result = client.classify_payload(bytes, 200, &registry);
        assert_eq!(result.outcome.outcome, crate::sushi::Outcome::Fail);
        assert_eq!(result.outcome.error_code, Some(CODE_BAD_PAYLOAD));
        // Unusable bodies are never kept
        assert!(result.raw.is_none());
        assert!(result.body.is_none());
    }

    #[test]
    fn test_classify_array_body_takes_first_element() {
        let client = SushiClient::new(SushiClientConfig::default());
        let registry = ErrorCodeRegistry::with_defaults();
        let bytes =
            br#"[{"Report_Header": {"Release": "5"}, "Report_Items": [{"Title": "X"}]}]"#;

        let result = client.classify_payload(bytes, 200, &registry);
        assert_eq!(result.outcome.outcome, crate::sushi::Outcome::Success);
        assert!(result.body.unwrap().get("Report_Header").is_some());
    }

    #[test]
    fn test_classify_scalar_body_is_shape_failure() {
        let client = SushiClient::new(SushiClientConfig::default());
        let registry = ErrorCodeRegistry::with_defaults();

        let result = client.classify_payload(b"42", 200, &registry);
        assert_eq!(result.outcome.outcome, crate::sushi::Outcome::Fail);
        assert!(result.raw.is_none());
    }
}
