//! rdt-schemas
//!
//! Shared DTOs for the delay-tracker workspace: status enums and the outbox
//! payload sum type. No IO lives here — every other crate depends on this
//! one for a common vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MonitoringStatus
// ---------------------------------------------------------------------------

/// `monitored_journeys.monitoring_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoringStatus {
    PendingRid,
    Active,
    Delayed,
    Completed,
    Cancelled,
}

impl MonitoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringStatus::PendingRid => "pending_rid",
            MonitoringStatus::Active => "active",
            MonitoringStatus::Delayed => "delayed",
            MonitoringStatus::Completed => "completed",
            MonitoringStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending_rid" => Ok(MonitoringStatus::PendingRid),
            "active" => Ok(MonitoringStatus::Active),
            "delayed" => Ok(MonitoringStatus::Delayed),
            "completed" => Ok(MonitoringStatus::Completed),
            "cancelled" => Ok(MonitoringStatus::Cancelled),
            other => Err(anyhow::anyhow!("invalid monitoring_status: {other}")),
        }
    }

    /// Terminal states clear `next_check_at` (spec invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitoringStatus::Completed | MonitoringStatus::Cancelled)
    }

    /// States that must carry a non-null `rid`.
    pub fn requires_rid(&self) -> bool {
        matches!(self, MonitoringStatus::Active | MonitoringStatus::Delayed)
    }
}

impl std::fmt::Display for MonitoringStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OutboxStatus
// ---------------------------------------------------------------------------

/// `outbox.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "processed" => Ok(OutboxStatus::Processed),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(anyhow::anyhow!("invalid outbox status: {other}")),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OutboxPayload — statically-typed sum type over the five event kinds
// ---------------------------------------------------------------------------

/// One variant per `event_type` in spec §4.6. Tagged so the on-disk JSON
/// keeps a discriminant identical to what a dynamic-record implementation
/// would have serialized, while Rust callers get exhaustiveness checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OutboxPayload {
    #[serde(rename = "journey.monitoring_started")]
    JourneyMonitoringStarted {
        #[serde(rename = "journeyId")]
        journey_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "monitoredJourneyId")]
        monitored_journey_id: i64,
        origin: String,
        destination: String,
        #[serde(rename = "scheduledDeparture")]
        scheduled_departure: DateTime<Utc>,
        #[serde(rename = "correlationId")]
        correlation_id: Uuid,
    },
    #[serde(rename = "delay.detected")]
    DelayDetected {
        #[serde(rename = "journeyId")]
        journey_id: String,
        #[serde(rename = "alertId")]
        alert_id: i64,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "delayMinutes")]
        delay_minutes: i32,
        #[serde(rename = "delayReasons")]
        delay_reasons: Option<serde_json::Value>,
        #[serde(rename = "correlationId")]
        correlation_id: Uuid,
    },
    #[serde(rename = "claim.triggered")]
    ClaimTriggered {
        #[serde(rename = "alertId")]
        alert_id: i64,
        #[serde(rename = "journeyId")]
        journey_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "claimReferenceId")]
        claim_reference_id: String,
        #[serde(rename = "delayMinutes")]
        delay_minutes: i32,
        #[serde(rename = "correlationId")]
        correlation_id: Uuid,
    },
    #[serde(rename = "journey.completed")]
    JourneyCompleted {
        #[serde(rename = "journeyId")]
        journey_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "completedAt")]
        completed_at: DateTime<Utc>,
        #[serde(rename = "hadDelay")]
        had_delay: bool,
        #[serde(rename = "delayMinutes")]
        delay_minutes: Option<i32>,
        #[serde(rename = "correlationId")]
        correlation_id: Uuid,
    },
    #[serde(rename = "journey.cancelled")]
    JourneyCancelled {
        #[serde(rename = "journeyId")]
        journey_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "correlationId")]
        correlation_id: Uuid,
    },
}

impl OutboxPayload {
    /// `event_type` string as stored in `outbox.event_type`.
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboxPayload::JourneyMonitoringStarted { .. } => "journey.monitoring_started",
            OutboxPayload::DelayDetected { .. } => "delay.detected",
            OutboxPayload::ClaimTriggered { .. } => "claim.triggered",
            OutboxPayload::JourneyCompleted { .. } => "journey.completed",
            OutboxPayload::JourneyCancelled { .. } => "journey.cancelled",
        }
    }

    /// `aggregate_type` as stored in `outbox.aggregate_type`.
    pub fn aggregate_type(&self) -> &'static str {
        match self {
            OutboxPayload::JourneyMonitoringStarted { .. }
            | OutboxPayload::JourneyCompleted { .. }
            | OutboxPayload::JourneyCancelled { .. } => "monitored_journey",
            OutboxPayload::DelayDetected { .. } | OutboxPayload::ClaimTriggered { .. } => {
                "delay_alert"
            }
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            OutboxPayload::JourneyMonitoringStarted { correlation_id, .. }
            | OutboxPayload::DelayDetected { correlation_id, .. }
            | OutboxPayload::ClaimTriggered { correlation_id, .. }
            | OutboxPayload::JourneyCompleted { correlation_id, .. }
            | OutboxPayload::JourneyCancelled { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitoring_status_round_trips() {
        for s in [
            MonitoringStatus::PendingRid,
            MonitoringStatus::Active,
            MonitoringStatus::Delayed,
            MonitoringStatus::Completed,
            MonitoringStatus::Cancelled,
        ] {
            assert_eq!(MonitoringStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn terminal_and_rid_invariants() {
        assert!(MonitoringStatus::Completed.is_terminal());
        assert!(MonitoringStatus::Cancelled.is_terminal());
        assert!(!MonitoringStatus::Active.is_terminal());
        assert!(MonitoringStatus::Active.requires_rid());
        assert!(MonitoringStatus::Delayed.requires_rid());
        assert!(!MonitoringStatus::PendingRid.requires_rid());
    }

    #[test]
    fn delay_detected_payload_serializes_camel_case() {
        let p = OutboxPayload::DelayDetected {
            journey_id: "J1".into(),
            alert_id: 1,
            user_id: "U1".into(),
            delay_minutes: 25,
            delay_reasons: None,
            correlation_id: Uuid::nil(),
        };
        let v = p.to_json().unwrap();
        assert_eq!(v["delayMinutes"], 25);
        assert_eq!(p.event_type(), "delay.detected");
        assert_eq!(p.aggregate_type(), "delay_alert");
    }
}
