//! rdt-orchestrator
//!
//! The detection-cycle orchestrator: one pass per tick, fetching the due
//! set, resolving RIDs, batch-fetching delays, classifying, and executing a
//! per-journey transactional commit that writes the alert, status change,
//! and outbox events atomically.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rdt_claims::{AlertSnapshot, ClaimOutcome, ClaimTrigger};
use rdt_clients::{ClaimsOracleClient, MatcherClient, UpstreamDelaysClient};
use rdt_db::MonitoredJourneyRow;
use rdt_detector::{DelayDetector, DelayRecord};
use rdt_monitor::JourneyMonitor;
use rdt_schemas::MonitoringStatus;
use sqlx::PgPool;
use uuid::Uuid;

pub const DEFAULT_DUE_BATCH_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorReport {
    pub journeys_checked: u32,
    pub delays_detected: u32,
    pub claims_triggered: u32,
    pub duration_ms: u64,
}

pub struct DetectionOrchestrator<C: ClaimsOracleClient> {
    pool: PgPool,
    monitor: JourneyMonitor,
    detector: DelayDetector,
    matcher: Arc<dyn MatcherClient>,
    upstream: Arc<dyn UpstreamDelaysClient>,
    claim_trigger: ClaimTrigger<C>,
    due_batch_limit: i64,
}

impl<C: ClaimsOracleClient> DetectionOrchestrator<C> {
    pub fn new(
        pool: PgPool,
        monitor: JourneyMonitor,
        detector: DelayDetector,
        matcher: Arc<dyn MatcherClient>,
        upstream: Arc<dyn UpstreamDelaysClient>,
        claim_trigger: ClaimTrigger<C>,
    ) -> Self {
        DetectionOrchestrator {
            pool,
            monitor,
            detector,
            matcher,
            upstream,
            claim_trigger,
            due_batch_limit: DEFAULT_DUE_BATCH_LIMIT,
        }
    }

    pub fn with_due_batch_limit(mut self, limit: i64) -> Self {
        self.due_batch_limit = limit;
        self
    }

    /// Runs one detection cycle against `now`. `now` is threaded in rather
    /// than read from the clock so tests can drive exact scenarios.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<OrchestratorReport> {
        let started = std::time::Instant::now();
        let correlation_id = Uuid::new_v4();

        let due = rdt_db::find_due_for_check(&self.pool, now, self.due_batch_limit)
            .await
            .context("run_tick: fetch due set")?;

        if due.is_empty() {
            return Ok(OrchestratorReport { duration_ms: elapsed_ms(started), ..Default::default() });
        }

        let mut pending_rid_group = Vec::new();
        let mut active_group = Vec::new();

        for journey in due {
            if now > journey.scheduled_arrival {
                if let Err(e) = self.complete_journey(&journey, now, correlation_id).await {
                    tracing::error!(journey_id = %journey.journey_id, error = %e, "failed to complete journey");
                }
                continue;
            }
            match journey.status().context("decode monitoring_status")? {
                MonitoringStatus::PendingRid => pending_rid_group.push(journey),
                MonitoringStatus::Active => active_group.push(journey),
                // Delayed/Completed/Cancelled should not appear from the due query.
                _ => {}
            }
        }

        let mut journeys_checked = 0u32;
        let mut delays_detected = 0u32;
        let mut claims_triggered = 0u32;

        for journey in &pending_rid_group {
            journeys_checked += 1;
            self.resolve_rid(journey, now).await;
        }

        let rids: Vec<String> = active_group.iter().filter_map(|j| j.rid.clone()).collect();
        let records = if rids.is_empty() {
            Vec::new()
        } else {
            match self.upstream.get_delays(&rids).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "upstream delays batch failed; advancing next_check_at");
                    let ids: Vec<i64> = active_group.iter().map(|j| j.id).collect();
                    let next = now + self.monitor.tick_interval();
                    if let Err(e) = rdt_db::update_last_checked_bulk(&self.pool, &ids, now, Some(next)).await {
                        tracing::error!(error = %e, "failed to pace active group after upstream failure");
                    }
                    return Ok(OrchestratorReport {
                        journeys_checked: journeys_checked + active_group.len() as u32,
                        delays_detected: 0,
                        claims_triggered: 0,
                        duration_ms: elapsed_ms(started),
                    });
                }
            }
        };
        let records: Vec<DelayRecord> = records
            .into_iter()
            .map(|r| DelayRecord {
                rid: r.rid,
                total_delay_minutes: r.delay_minutes,
                cancelled: r.is_cancelled,
                delay_reasons: r.delay_reasons,
            })
            .collect();

        let mut to_pace = Vec::new();

        for journey in &active_group {
            journeys_checked += 1;
            let Some(rid) = journey.rid.clone() else {
                to_pace.push(journey.id);
                continue;
            };
            let classification = self.detector.classify(&rid, &records);

            if classification.data_not_found
                || !(classification.exceeds_threshold || classification.is_cancelled)
            {
                to_pace.push(journey.id);
                continue;
            }

            let delay_reasons = records.iter().find(|r| r.rid == rid).and_then(|r| r.delay_reasons.clone());

            match self.commit_detection(journey, &classification, delay_reasons, now, correlation_id).await {
                Ok(triggered) => {
                    delays_detected += 1;
                    if triggered {
                        claims_triggered += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(journey_id = %journey.journey_id, error = %e, "per-journey commit failed; rolled back");
                    to_pace.push(journey.id);
                }
            }
        }

        if !to_pace.is_empty() {
            let next = now + self.monitor.tick_interval();
            if let Err(e) = rdt_db::update_last_checked_bulk(&self.pool, &to_pace, now, Some(next)).await {
                tracing::error!(error = %e, "failed to pace remaining journeys");
            }
        }

        Ok(OrchestratorReport { journeys_checked, delays_detected, claims_triggered, duration_ms: elapsed_ms(started) })
    }

    async fn complete_journey(
        &self,
        journey: &MonitoredJourneyRow,
        now: DateTime<Utc>,
        correlation_id: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("complete_journey: begin")?;

        rdt_db::update_status(&mut *tx, journey.id, MonitoringStatus::Completed, None, None)
            .await
            .context("complete_journey: update status")?;

        let latest_alert = rdt_db::find_latest_alert_for_journey(&mut *tx, journey.id)
            .await
            .context("complete_journey: find latest alert")?;
        let (had_delay, delay_minutes) = match latest_alert {
            Some(alert) => (true, Some(alert.delay_minutes)),
            None => (false, None),
        };

        let event = rdt_outbox::build_journey_completed(
            journey.id,
            &journey.journey_id,
            &journey.user_id,
            now,
            had_delay,
            delay_minutes,
            Some(correlation_id),
        );
        rdt_db::insert_outbox_event(&mut *tx, &event)
            .await
            .context("complete_journey: journey.completed outbox")?;

        tx.commit().await.context("complete_journey: commit")
    }

    async fn resolve_rid(&self, journey: &MonitoredJourneyRow, now: DateTime<Utc>) {
        let resolved = match self.matcher.get_segments(&journey.journey_id).await {
            Ok(Some(segments)) => segments.resolved_rids().into_iter().next(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(journey_id = %journey.journey_id, error = %e, "matcher call failed");
                None
            }
        };

        match resolved {
            Some(rid) => {
                let next = self.monitor.next_check_at_on_rid_resolution(now);
                if let Err(e) = rdt_db::update_status(
                    &self.pool,
                    journey.id,
                    MonitoringStatus::Active,
                    Some(rid.as_str()),
                    Some(next),
                )
                .await
                {
                    tracing::error!(journey_id = %journey.journey_id, error = %e, "failed to promote journey to active");
                }
            }
            None => {
                let next = self.monitor.next_check_at_on_periodic_touch(now);
                if let Err(e) =
                    rdt_db::update_last_checked_bulk(&self.pool, &[journey.id], now, Some(next)).await
                {
                    tracing::error!(journey_id = %journey.journey_id, error = %e, "failed to pace pending_rid journey");
                }
            }
        }
    }

    /// Returns `true` if a claim was successfully triggered during this commit.
    async fn commit_detection(
        &self,
        journey: &MonitoredJourneyRow,
        classification: &rdt_detector::DetectionResult,
        delay_reasons: Option<serde_json::Value>,
        now: DateTime<Utc>,
        correlation_id: Uuid,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("commit_detection: begin")?;

        let delay_minutes = std::cmp::max(1, classification.total_delay_minutes);
        let new_alert = rdt_db::NewDelayAlert {
            monitored_journey_id: journey.id,
            delay_minutes,
            delay_reasons: delay_reasons.clone(),
            is_cancellation: classification.is_cancelled,
            threshold_exceeded: classification.exceeds_threshold,
        };
        let alert = rdt_db::insert_delay_alert(&mut *tx, &new_alert)
            .await
            .context("commit_detection: insert alert")?;

        let new_status = if classification.is_cancelled { MonitoringStatus::Cancelled } else { MonitoringStatus::Delayed };
        let current_status = journey.status().context("commit_detection: decode current status")?;
        let next_check_at = self
            .monitor
            .apply_transition(current_status, new_status, now)
            .map_err(anyhow::Error::new)
            .context("commit_detection: invalid transition")?;
        rdt_db::update_status(&mut *tx, journey.id, new_status, None, next_check_at)
            .await
            .context("commit_detection: update status")?;

        let delay_event = rdt_outbox::build_delay_detected(
            alert.id,
            &journey.journey_id,
            &journey.user_id,
            delay_minutes,
            delay_reasons.clone(),
            Some(correlation_id),
        );
        rdt_db::insert_outbox_event(&mut *tx, &delay_event)
            .await
            .context("commit_detection: delay.detected outbox")?;

        let mut claim_triggered = false;
        if classification.claim_eligible && !classification.is_cancelled {
            let snapshot = AlertSnapshot {
                alert_id: alert.id,
                journey_id: journey.journey_id.clone(),
                user_id: journey.user_id.clone(),
                delay_minutes,
                delay_reasons: delay_reasons.clone(),
                claim_triggered: alert.claim_triggered,
                claim_reference_id: alert.claim_reference_id.clone(),
            };
            let outcome = self.claim_trigger.trigger(&snapshot).await;
            if let ClaimOutcome::Success { claim_reference_id, estimated_compensation } = &outcome {
                let response = serde_json::json!({
                    "success": true,
                    "claimReferenceId": claim_reference_id,
                    "estimatedCompensation": estimated_compensation,
                });
                rdt_db::mark_claim_triggered(&mut *tx, alert.id, claim_reference_id, &response)
                    .await
                    .context("commit_detection: mark claim triggered")?;
                let claim_event = rdt_outbox::build_claim_triggered(
                    alert.id,
                    &journey.journey_id,
                    &journey.user_id,
                    claim_reference_id,
                    delay_minutes,
                    Some(correlation_id),
                );
                rdt_db::insert_outbox_event(&mut *tx, &claim_event)
                    .await
                    .context("commit_detection: claim.triggered outbox")?;
                claim_triggered = true;
            } else {
                let response = serde_json::json!({"outcome": format!("{:?}", outcome)});
                rdt_db::record_claim_response(&mut *tx, alert.id, &response)
                    .await
                    .context("commit_detection: record claim response")?;
            }
        }

        tx.commit().await.context("commit_detection: commit")?;
        Ok(claim_triggered)
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rdt_clients::{
        EligibilityCheckRequest, EligibilityCheckResponse, JourneySegment, JourneyWithSegments,
        UpstreamDelayRecord,
    };
    use std::sync::Mutex;

    struct FakeMatcher {
        responses: Mutex<std::collections::HashMap<String, Option<JourneyWithSegments>>>,
    }

    #[async_trait]
    impl MatcherClient for FakeMatcher {
        async fn get_segments(&self, journey_id: &str) -> anyhow::Result<Option<JourneyWithSegments>> {
            Ok(self.responses.lock().unwrap().get(journey_id).cloned().flatten())
        }
    }

    struct FakeUpstream {
        records: Mutex<Vec<UpstreamDelayRecord>>,
    }

    #[async_trait]
    impl UpstreamDelaysClient for FakeUpstream {
        async fn get_delays(&self, _rids: &[String]) -> anyhow::Result<Vec<UpstreamDelayRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    struct FakeOracle;

    #[async_trait]
    impl ClaimsOracleClient for FakeOracle {
        async fn trigger_claim(
            &self,
            _req: &rdt_clients::ClaimTriggerRequest,
        ) -> anyhow::Result<rdt_clients::ClaimTriggerResponse> {
            Ok(rdt_clients::ClaimTriggerResponse {
                success: true,
                claim_reference_id: Some("C-001".to_string()),
                message: None,
                eligible: Some(true),
                estimated_compensation: Some(25.5),
                error: None,
            })
        }

        async fn check_eligibility(
            &self,
            _req: &EligibilityCheckRequest,
        ) -> anyhow::Result<EligibilityCheckResponse> {
            unimplemented!("not exercised")
        }
    }

    fn matcher_with(journey_id: &str, rid: Option<&str>) -> Arc<dyn MatcherClient> {
        let mut map = std::collections::HashMap::new();
        let segments = rid.map(|r| JourneyWithSegments {
            id: journey_id.to_string(),
            user_id: "U1".to_string(),
            origin_crs: "PAD".to_string(),
            destination_crs: "RDG".to_string(),
            travel_date: "2026-01-20".to_string(),
            status: "scheduled".to_string(),
            segments: vec![JourneySegment {
                id: "seg-1".to_string(),
                journey_id: journey_id.to_string(),
                sequence: 1,
                rid: Some(r.to_string()),
                origin_crs: "PAD".to_string(),
                destination_crs: "RDG".to_string(),
                scheduled_departure: "2026-01-20T08:00:00Z".to_string(),
                scheduled_arrival: "2026-01-20T09:00:00Z".to_string(),
                toc_code: "GW".to_string(),
            }],
        });
        map.insert(journey_id.to_string(), segments);
        Arc::new(FakeMatcher { responses: Mutex::new(map) })
    }

    #[test]
    fn report_defaults_to_zero() {
        assert_eq!(OrchestratorReport::default(), OrchestratorReport {
            journeys_checked: 0,
            delays_detected: 0,
            claims_triggered: 0,
            duration_ms: 0,
        });
    }

    #[tokio::test]
    async fn matcher_and_upstream_fakes_are_wired_correctly() {
        let matcher = matcher_with("J1", Some("202601200800999"));
        let result = matcher.get_segments("J1").await.unwrap().unwrap();
        assert_eq!(result.resolved_rids(), vec!["202601200800999".to_string()]);

        let upstream: Arc<dyn UpstreamDelaysClient> = Arc::new(FakeUpstream {
            records: Mutex::new(vec![UpstreamDelayRecord {
                rid: "202601200800999".to_string(),
                delay_minutes: 25,
                is_cancelled: false,
                delay_reasons: None,
            }]),
        });
        let delays = upstream.get_delays(&["202601200800999".to_string()]).await.unwrap();
        assert_eq!(delays[0].delay_minutes, 25);

        let oracle = FakeOracle;
        let resp = oracle
            .trigger_claim(&rdt_clients::ClaimTriggerRequest {
                delay_alert_id: 1,
                journey_id: "J1".to_string(),
                user_id: "U1".to_string(),
                delay_minutes: 25,
                delay_reasons: None,
            })
            .await
            .unwrap();
        assert!(resp.success);
    }
}
