//! rdt-outbox
//!
//! Typed event builders over `rdt_schemas::OutboxPayload`, plus the relay
//! (`process_outbox`) and retry (`retry_failed_events`) passes that drain the
//! outbox at least once into an injected broker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdt_schemas::OutboxPayload;
use sqlx::PgPool;
use uuid::Uuid;

/// The external bus this relay publishes into. Left abstract — this crate
/// only defines the seam, not a concrete transport.
#[async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Typed builders
// ---------------------------------------------------------------------------

fn correlation_id_or_new(correlation_id: Option<Uuid>) -> Uuid {
    correlation_id.unwrap_or_else(Uuid::new_v4)
}

pub fn build_journey_monitoring_started(
    monitored_journey_id: i64,
    journey_id: &str,
    user_id: &str,
    origin: &str,
    destination: &str,
    scheduled_departure: DateTime<Utc>,
    correlation_id: Option<Uuid>,
) -> rdt_db::NewOutboxEvent {
    let correlation_id = correlation_id_or_new(correlation_id);
    let payload = OutboxPayload::JourneyMonitoringStarted {
        journey_id: journey_id.to_string(),
        user_id: user_id.to_string(),
        monitored_journey_id,
        origin: origin.to_string(),
        destination: destination.to_string(),
        scheduled_departure,
        correlation_id,
    };
    to_new_event(monitored_journey_id.to_string(), &payload, correlation_id)
}

pub fn build_delay_detected(
    alert_id: i64,
    journey_id: &str,
    user_id: &str,
    delay_minutes: i32,
    delay_reasons: Option<serde_json::Value>,
    correlation_id: Option<Uuid>,
) -> rdt_db::NewOutboxEvent {
    let correlation_id = correlation_id_or_new(correlation_id);
    let payload = OutboxPayload::DelayDetected {
        journey_id: journey_id.to_string(),
        alert_id,
        user_id: user_id.to_string(),
        delay_minutes,
        delay_reasons,
        correlation_id,
    };
    to_new_event(alert_id.to_string(), &payload, correlation_id)
}

pub fn build_claim_triggered(
    alert_id: i64,
    journey_id: &str,
    user_id: &str,
    claim_reference_id: &str,
    delay_minutes: i32,
    correlation_id: Option<Uuid>,
) -> rdt_db::NewOutboxEvent {
    let correlation_id = correlation_id_or_new(correlation_id);
    let payload = OutboxPayload::ClaimTriggered {
        alert_id,
        journey_id: journey_id.to_string(),
        user_id: user_id.to_string(),
        claim_reference_id: claim_reference_id.to_string(),
        delay_minutes,
        correlation_id,
    };
    to_new_event(alert_id.to_string(), &payload, correlation_id)
}

pub fn build_journey_completed(
    journey_id_internal: i64,
    journey_id: &str,
    user_id: &str,
    completed_at: DateTime<Utc>,
    had_delay: bool,
    delay_minutes: Option<i32>,
    correlation_id: Option<Uuid>,
) -> rdt_db::NewOutboxEvent {
    let correlation_id = correlation_id_or_new(correlation_id);
    let payload = OutboxPayload::JourneyCompleted {
        journey_id: journey_id.to_string(),
        user_id: user_id.to_string(),
        completed_at,
        had_delay,
        delay_minutes,
        correlation_id,
    };
    to_new_event(journey_id_internal.to_string(), &payload, correlation_id)
}

pub fn build_journey_cancelled(
    journey_id_internal: i64,
    journey_id: &str,
    user_id: &str,
    correlation_id: Option<Uuid>,
) -> rdt_db::NewOutboxEvent {
    let correlation_id = correlation_id_or_new(correlation_id);
    let payload = OutboxPayload::JourneyCancelled {
        journey_id: journey_id.to_string(),
        user_id: user_id.to_string(),
        correlation_id,
    };
    to_new_event(journey_id_internal.to_string(), &payload, correlation_id)
}

fn to_new_event(
    aggregate_id: String,
    payload: &OutboxPayload,
    correlation_id: Uuid,
) -> rdt_db::NewOutboxEvent {
    rdt_db::NewOutboxEvent {
        aggregate_id,
        aggregate_type: payload.aggregate_type().to_string(),
        event_type: payload.event_type().to_string(),
        payload: payload.to_json().expect("OutboxPayload always serializes"),
        correlation_id: Some(correlation_id),
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutboxReport {
    pub processed: u32,
    pub failed: u32,
}

/// Opens a transaction, claims up to `limit` pending rows with
/// row-lock-and-skip, publishes each through `broker`, and marks the outcome
/// before committing. Safe to run from multiple concurrent workers.
pub async fn process_outbox(pool: &PgPool, broker: &dyn EventBroker, limit: i64) -> Result<ProcessOutboxReport> {
    let mut tx = pool.begin().await.context("process_outbox: begin transaction")?;
    let claimed = rdt_db::find_pending_for_processing(&mut *tx, limit)
        .await
        .context("process_outbox: claim batch")?;

    let mut report = ProcessOutboxReport::default();
    for row in &claimed {
        match broker.publish(&row.event_type, &row.payload).await {
            Ok(()) => {
                rdt_db::mark_processed(&mut *tx, row.id).await.context("process_outbox: mark processed")?;
                report.processed += 1;
                tracing::info!(outbox_id = row.id, event_type = %row.event_type, "outbox event published");
            }
            Err(e) => {
                rdt_db::mark_failed(&mut *tx, row.id, &e.to_string())
                    .await
                    .context("process_outbox: mark failed")?;
                report.failed += 1;
                tracing::warn!(outbox_id = row.id, error = %e, "outbox publish failed");
            }
        }
    }

    tx.commit().await.context("process_outbox: commit")?;
    Ok(report)
}

/// Selects failed rows below `max_retries`, resets each to pending, attempts
/// publish, and re-fails with an incremented count on error.
pub async fn retry_failed_events(
    pool: &PgPool,
    broker: &dyn EventBroker,
    max_retries: i32,
) -> Result<ProcessOutboxReport> {
    let failed = rdt_db::find_failed_for_retry(pool, max_retries)
        .await
        .context("retry_failed_events: list failed")?;

    let mut report = ProcessOutboxReport::default();
    for row in &failed {
        rdt_db::reset_to_pending(pool, row.id).await.context("retry_failed_events: reset")?;
        match broker.publish(&row.event_type, &row.payload).await {
            Ok(()) => {
                rdt_db::mark_processed_from_pending(pool, row.id)
                    .await
                    .context("retry_failed_events: mark processed")?;
                report.processed += 1;
            }
            Err(e) => {
                rdt_db::mark_failed_from_pending(pool, row.id, &e.to_string())
                    .await
                    .context("retry_failed_events: re-mark failed")?;
                report.failed += 1;
                tracing::warn!(outbox_id = row.id, error = %e, "outbox retry failed");
            }
        }
    }

    Ok(report)
}
