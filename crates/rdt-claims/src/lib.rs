//! rdt-claims
//!
//! The claim trigger: local pre-checks (no network), then a call to the
//! downstream claims oracle, classified into one of six outcome kinds.

use rdt_clients::{ClaimTriggerRequest, ClaimTriggerResponse, ClaimsOracleClient};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// `alert.claim_triggered` was already true; no oracle call made.
    AlreadyTriggered { claim_reference_id: String },
    /// `delay_minutes < threshold`; no oracle call made.
    BelowThreshold,
    Success { claim_reference_id: String, estimated_compensation: Option<f64> },
    DuplicateClaim { claim_reference_id: String },
    NotEligible,
    ServiceError,
    NetworkError,
}

impl ClaimOutcome {
    /// Whether the cycle should automatically retry this outcome. Eligibility
    /// is a business decision, not a transient fault, so only network
    /// failures are retryable.
    pub fn retryable(&self) -> bool {
        matches!(self, ClaimOutcome::NetworkError)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClaimOutcome::Success { .. })
    }
}

/// The minimal facts about an alert the trigger needs for its pre-checks —
/// deliberately not `rdt_db::DelayAlertRow` so this crate stays free of a
/// database dependency.
#[derive(Debug, Clone)]
pub struct AlertSnapshot {
    pub alert_id: i64,
    pub journey_id: String,
    pub user_id: String,
    pub delay_minutes: i32,
    pub delay_reasons: Option<serde_json::Value>,
    pub claim_triggered: bool,
    pub claim_reference_id: Option<String>,
}

pub struct ClaimTrigger<C: ClaimsOracleClient> {
    threshold_minutes: i32,
    oracle: C,
}

impl<C: ClaimsOracleClient> ClaimTrigger<C> {
    pub fn new(threshold_minutes: i32, oracle: C) -> Self {
        ClaimTrigger { threshold_minutes, oracle }
    }

    /// Runs the local pre-checks and, if neither short-circuits, calls the
    /// oracle and classifies its response.
    pub async fn trigger(&self, alert: &AlertSnapshot) -> ClaimOutcome {
        if alert.claim_triggered {
            if let Some(reference_id) = &alert.claim_reference_id {
                return ClaimOutcome::AlreadyTriggered { claim_reference_id: reference_id.clone() };
            }
        }
        if alert.delay_minutes < self.threshold_minutes {
            return ClaimOutcome::BelowThreshold;
        }

        let req = ClaimTriggerRequest {
            delay_alert_id: alert.alert_id,
            journey_id: alert.journey_id.clone(),
            user_id: alert.user_id.clone(),
            delay_minutes: alert.delay_minutes,
            delay_reasons: alert.delay_reasons.clone(),
        };

        match self.oracle.trigger_claim(&req).await {
            Ok(resp) => classify_response(&resp),
            Err(_) => ClaimOutcome::NetworkError,
        }
    }

    /// Sequential batch: one alert's failure never short-circuits the rest.
    pub async fn trigger_batch(&self, alerts: &[AlertSnapshot]) -> Vec<(i64, ClaimOutcome)> {
        let mut out = Vec::with_capacity(alerts.len());
        for alert in alerts {
            out.push((alert.alert_id, self.trigger(alert).await));
        }
        out
    }
}

fn classify_response(resp: &ClaimTriggerResponse) -> ClaimOutcome {
    let eligible_false = resp.eligible == Some(false);

    if resp.success && !eligible_false {
        if let Some(reference_id) = &resp.claim_reference_id {
            return ClaimOutcome::Success {
                claim_reference_id: reference_id.clone(),
                estimated_compensation: resp.estimated_compensation,
            };
        }
    }

    if !resp.success {
        if let Some(reference_id) = &resp.claim_reference_id {
            return ClaimOutcome::DuplicateClaim { claim_reference_id: reference_id.clone() };
        }
    }

    if eligible_false {
        return ClaimOutcome::NotEligible;
    }

    ClaimOutcome::ServiceError
}
