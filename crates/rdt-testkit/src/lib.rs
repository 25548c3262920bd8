//! rdt-testkit
//!
//! In-memory fakes of the three external collaborators (`MatcherClient`,
//! `UpstreamDelaysClient`, `ClaimsOracleClient`) plus a fake event broker.
//! These back the end-to-end scenario tests under `tests/` and are reusable
//! by any crate that wants a deterministic orchestrator run without a live
//! upstream.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rdt_clients::{
    ClaimTriggerRequest, ClaimTriggerResponse, ClaimsOracleClient, EligibilityCheckRequest,
    EligibilityCheckResponse, JourneySegment, JourneyWithSegments, MatcherClient,
    UpstreamDelayRecord, UpstreamDelaysClient,
};
use rdt_outbox::EventBroker;

// ---------------------------------------------------------------------------
// FakeMatcherClient
// ---------------------------------------------------------------------------

/// Maps external `journey_id` to a single resolved `rid`, or `None` for
/// "segments not yet available" (matcher 404 equivalent).
#[derive(Default)]
pub struct FakeMatcherClient {
    rids: Mutex<HashMap<String, Option<String>>>,
    fail_for: Mutex<std::collections::HashSet<String>>,
}

impl FakeMatcherClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rid(&self, journey_id: &str, rid: Option<&str>) {
        self.rids.lock().unwrap().insert(journey_id.to_string(), rid.map(str::to_string));
    }

    pub fn fail_for(&self, journey_id: &str) {
        self.fail_for.lock().unwrap().insert(journey_id.to_string());
    }
}

#[async_trait]
impl MatcherClient for FakeMatcherClient {
    async fn get_segments(&self, journey_id: &str) -> anyhow::Result<Option<JourneyWithSegments>> {
        if self.fail_for.lock().unwrap().contains(journey_id) {
            anyhow::bail!("Journey Matcher API error: 500 Internal Server Error");
        }
        let rid = match self.rids.lock().unwrap().get(journey_id).cloned() {
            Some(rid) => rid,
            None => return Ok(None),
        };
        let Some(rid) = rid else { return Ok(None) };
        Ok(Some(JourneyWithSegments {
            id: journey_id.to_string(),
            user_id: "U1".to_string(),
            origin_crs: "PAD".to_string(),
            destination_crs: "RDG".to_string(),
            travel_date: "2026-01-20".to_string(),
            status: "scheduled".to_string(),
            segments: vec![JourneySegment {
                id: format!("{journey_id}-seg-1"),
                journey_id: journey_id.to_string(),
                sequence: 1,
                rid: Some(rid),
                origin_crs: "PAD".to_string(),
                destination_crs: "RDG".to_string(),
                scheduled_departure: "2026-01-20T08:00:00Z".to_string(),
                scheduled_arrival: "2026-01-20T09:00:00Z".to_string(),
                toc_code: "GW".to_string(),
            }],
        }))
    }
}

// ---------------------------------------------------------------------------
// FakeUpstreamDelaysClient
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeUpstreamDelaysClient {
    records: Mutex<HashMap<String, UpstreamDelayRecord>>,
    fail_next: Mutex<bool>,
}

impl FakeUpstreamDelaysClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, rid: &str, delay_minutes: i32, is_cancelled: bool) {
        self.records.lock().unwrap().insert(
            rid.to_string(),
            UpstreamDelayRecord { rid: rid.to_string(), delay_minutes, is_cancelled, delay_reasons: None },
        );
    }

    /// The next `get_delays` call returns an error (simulating upstream
    /// outage); the flag is consumed by that call.
    pub fn fail_next_call(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl UpstreamDelaysClient for FakeUpstreamDelaysClient {
    async fn get_delays(&self, rids: &[String]) -> anyhow::Result<Vec<UpstreamDelayRecord>> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            anyhow::bail!("Upstream API error: 503 Service Unavailable");
        }
        if rids.is_empty() {
            return Ok(Vec::new());
        }
        let map = self.records.lock().unwrap();
        Ok(rids.iter().filter_map(|r| map.get(r).cloned()).collect())
    }
}

// ---------------------------------------------------------------------------
// FakeClaimsOracleClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum OracleBehavior {
    Success { claim_reference_id: String, estimated_compensation: Option<f64> },
    NotEligible,
    DuplicateClaim { claim_reference_id: String },
    ServiceError,
    NetworkError,
}

pub struct FakeClaimsOracleClient {
    behavior: Mutex<OracleBehavior>,
    calls: Mutex<u32>,
}

impl FakeClaimsOracleClient {
    pub fn new(behavior: OracleBehavior) -> Self {
        FakeClaimsOracleClient { behavior: Mutex::new(behavior), calls: Mutex::new(0) }
    }

    pub fn set_behavior(&self, behavior: OracleBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Number of times `trigger_claim` has been called — used to assert that
    /// a second detection cycle over an already-triggered alert does not
    /// invoke the oracle again.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ClaimsOracleClient for FakeClaimsOracleClient {
    async fn trigger_claim(&self, _req: &ClaimTriggerRequest) -> anyhow::Result<ClaimTriggerResponse> {
        *self.calls.lock().unwrap() += 1;
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            OracleBehavior::Success { claim_reference_id, estimated_compensation } => {
                Ok(ClaimTriggerResponse {
                    success: true,
                    claim_reference_id: Some(claim_reference_id),
                    message: None,
                    eligible: Some(true),
                    estimated_compensation,
                    error: None,
                })
            }
            OracleBehavior::NotEligible => Ok(ClaimTriggerResponse {
                success: true,
                claim_reference_id: None,
                message: None,
                eligible: Some(false),
                estimated_compensation: None,
                error: None,
            }),
            OracleBehavior::DuplicateClaim { claim_reference_id } => Ok(ClaimTriggerResponse {
                success: false,
                claim_reference_id: Some(claim_reference_id),
                message: None,
                eligible: None,
                estimated_compensation: None,
                error: None,
            }),
            OracleBehavior::ServiceError => Ok(ClaimTriggerResponse {
                success: false,
                claim_reference_id: None,
                message: Some("internal error".to_string()),
                eligible: None,
                estimated_compensation: None,
                error: Some("API error: 500 Internal Server Error".to_string()),
            }),
            OracleBehavior::NetworkError => anyhow::bail!("Claims API request timeout"),
        }
    }

    async fn check_eligibility(
        &self,
        _req: &EligibilityCheckRequest,
    ) -> anyhow::Result<EligibilityCheckResponse> {
        Ok(EligibilityCheckResponse { eligible: true, reason: None })
    }
}

// ---------------------------------------------------------------------------
// FakeEventBroker
// ---------------------------------------------------------------------------

/// Publishes successfully unless primed to fail for the next N calls —
/// models a broker outage that recovers.
#[derive(Default)]
pub struct FakeEventBroker {
    fail_remaining: Mutex<u32>,
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeEventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_n_calls(&self, n: u32) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBroker for FakeEventBroker {
    async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("broker unavailable");
        }
        drop(remaining);
        self.published.lock().unwrap().push((event_type.to_string(), payload.clone()));
        Ok(())
    }
}
