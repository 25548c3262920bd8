//! rdt-clients
//!
//! The three external collaborators: the journey matcher (RID resolution),
//! the upstream delays feed, and the downstream claims oracle. Each is a
//! `#[async_trait]` interface plus a `reqwest`-backed production
//! implementation matching the documented wire contracts exactly.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn strip_trailing_slash(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// Journey matcher — RID resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneySegment {
    pub id: String,
    pub journey_id: String,
    pub sequence: i32,
    pub rid: Option<String>,
    pub origin_crs: String,
    pub destination_crs: String,
    pub scheduled_departure: String,
    pub scheduled_arrival: String,
    pub toc_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyWithSegments {
    pub id: String,
    pub user_id: String,
    pub origin_crs: String,
    pub destination_crs: String,
    pub travel_date: String,
    pub status: String,
    pub segments: Vec<JourneySegment>,
}

impl JourneyWithSegments {
    /// Non-null RIDs across all segments, in sequence order.
    pub fn resolved_rids(&self) -> Vec<String> {
        self.segments.iter().filter_map(|s| s.rid.clone()).collect()
    }

    /// Whether every segment already carries a RID.
    pub fn all_segments_have_rid(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.rid.is_some())
    }
}

#[async_trait]
pub trait MatcherClient: Send + Sync {
    async fn get_segments(&self, journey_id: &str) -> Result<Option<JourneyWithSegments>>;
}

#[derive(Debug, Clone)]
pub struct HttpMatcherClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMatcherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a valid timeout");
        HttpMatcherClient { http, base_url: strip_trailing_slash(&base_url.into()) }
    }
}

#[async_trait]
impl MatcherClient for HttpMatcherClient {
    async fn get_segments(&self, journey_id: &str) -> Result<Option<JourneyWithSegments>> {
        let url = format!("{}/api/v1/journeys/{}/segments", self.base_url, journey_id);

        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("Journey Matcher API request timeout")
            } else {
                anyhow::Error::new(e).context("journey matcher request failed")
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!(
                "Journey Matcher API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ));
        }

        let body: JourneyWithSegments =
            resp.json().await.context("journey matcher response json decode failed")?;
        Ok(Some(body))
    }
}

// ---------------------------------------------------------------------------
// Upstream delays feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct DelaysRequest<'a> {
    rids: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct DelaysResponse {
    services: Vec<UpstreamDelayRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDelayRecord {
    pub rid: String,
    pub delay_minutes: i32,
    pub is_cancelled: bool,
    pub delay_reasons: Option<serde_json::Value>,
}

#[async_trait]
pub trait UpstreamDelaysClient: Send + Sync {
    async fn get_delays(&self, rids: &[String]) -> Result<Vec<UpstreamDelayRecord>>;
}

#[derive(Debug, Clone)]
pub struct HttpUpstreamDelaysClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUpstreamDelaysClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a valid timeout");
        HttpUpstreamDelaysClient { http, base_url: strip_trailing_slash(&base_url.into()) }
    }
}

#[async_trait]
impl UpstreamDelaysClient for HttpUpstreamDelaysClient {
    async fn get_delays(&self, rids: &[String]) -> Result<Vec<UpstreamDelayRecord>> {
        if rids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/v1/delays", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&DelaysRequest { rids })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Upstream API request timeout")
                } else {
                    anyhow::Error::new(e).context("upstream delays request failed")
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!(
                "Upstream API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ));
        }

        let body: DelaysResponse =
            resp.json().await.context("upstream delays response json decode failed")?;
        Ok(body.services)
    }
}

// ---------------------------------------------------------------------------
// Claims oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ClaimTriggerRequest {
    pub delay_alert_id: i64,
    pub journey_id: String,
    pub user_id: String,
    pub delay_minutes: i32,
    pub delay_reasons: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClaimTriggerResponse {
    pub success: bool,
    pub claim_reference_id: Option<String>,
    pub message: Option<String>,
    pub eligible: Option<bool>,
    pub estimated_compensation: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EligibilityCheckRequest {
    pub user_id: String,
    pub journey_id: String,
    pub delay_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EligibilityCheckResponse {
    pub eligible: bool,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ClaimsOracleClient: Send + Sync {
    async fn trigger_claim(&self, req: &ClaimTriggerRequest) -> Result<ClaimTriggerResponse>;
    async fn check_eligibility(&self, req: &EligibilityCheckRequest) -> Result<EligibilityCheckResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpClaimsOracleClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClaimsOracleClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a valid timeout");
        HttpClaimsOracleClient { http, base_url: strip_trailing_slash(&base_url.into()) }
    }
}

#[async_trait]
impl ClaimsOracleClient for HttpClaimsOracleClient {
    /// Non-2xx is returned as a `success: false` value, not an error — only
    /// network failures and timeouts are thrown, matching the asymmetry
    /// noted for the oracle client: business failures are data, incidents
    /// are exceptions.
    async fn trigger_claim(&self, req: &ClaimTriggerRequest) -> Result<ClaimTriggerResponse> {
        let url = format!("{}/api/v1/claims/trigger", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Claims API request timeout")
                } else {
                    anyhow::Error::new(e).context("claims trigger request failed")
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(ClaimTriggerResponse {
                success: false,
                claim_reference_id: None,
                message: Some(body),
                eligible: None,
                estimated_compensation: None,
                error: Some(format!(
                    "API error: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )),
            });
        }

        resp.json().await.context("claims trigger response json decode failed")
    }

    async fn check_eligibility(&self, req: &EligibilityCheckRequest) -> Result<EligibilityCheckResponse> {
        let url = format!("{}/api/v1/eligibility/check", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Eligibility API request timeout")
                } else {
                    anyhow::Error::new(e).context("eligibility check request failed")
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Ok(EligibilityCheckResponse {
                eligible: false,
                reason: Some(format!("API error: {}", status.as_u16())),
            });
        }

        resp.json().await.context("eligibility check response json decode failed")
    }
}

// ---------------------------------------------------------------------------
// Blanket impls so orchestrators can hold `Arc<dyn Trait>` / `Box<dyn Trait>`
// uniformly with their generic-typed production clients, and tests can swap
// in fakes behind the same trait object.
// ---------------------------------------------------------------------------

#[async_trait]
impl MatcherClient for std::sync::Arc<dyn MatcherClient> {
    async fn get_segments(&self, journey_id: &str) -> Result<Option<JourneyWithSegments>> {
        (**self).get_segments(journey_id).await
    }
}

#[async_trait]
impl UpstreamDelaysClient for std::sync::Arc<dyn UpstreamDelaysClient> {
    async fn get_delays(&self, rids: &[String]) -> Result<Vec<UpstreamDelayRecord>> {
        (**self).get_delays(rids).await
    }
}

#[async_trait]
impl ClaimsOracleClient for std::sync::Arc<dyn ClaimsOracleClient> {
    async fn trigger_claim(&self, req: &ClaimTriggerRequest) -> Result<ClaimTriggerResponse> {
        (**self).trigger_claim(req).await
    }

    async fn check_eligibility(&self, req: &EligibilityCheckRequest) -> Result<EligibilityCheckResponse> {
        (**self).check_eligibility(req).await
    }
}
