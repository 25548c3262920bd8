//! A 25-minute delay on an active journey creates exactly one alert,
//! triggers a successful claim, moves the journey to `delayed`, and emits
//! `delay.detected` + `claim.triggered` sharing one correlation id. A second
//! detection cycle over the same alert must not call the oracle again.

use std::sync::Arc;

use chrono::Utc;
use rdt_claims::ClaimTrigger;
use rdt_clients::ClaimsOracleClient;
use rdt_detector::DelayDetector;
use rdt_monitor::JourneyMonitor;
use rdt_orchestrator::DetectionOrchestrator;
use rdt_schemas::MonitoringStatus;
use rdt_testkit::{FakeClaimsOracleClient, FakeMatcherClient, FakeUpstreamDelaysClient, OracleBehavior};
use sqlx::postgres::PgPoolOptions;

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-testkit -- --include-ignored"]
async fn delay_above_threshold_creates_alert_and_triggers_claim() -> anyhow::Result<()> {
    let url = match std::env::var(rdt_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => panic!("DB tests require RDT_DATABASE_URL; set it to a scratch Postgres instance"),
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    rdt_db::migrate(&pool).await?;

    let now = Utc::now();
    let rid = format!("rid-{}", uuid::Uuid::new_v4());
    let journey = rdt_db::create_journey(
        &pool,
        &rdt_db::NewMonitoredJourney {
            journey_id: format!("J-{}", uuid::Uuid::new_v4()),
            user_id: "U1".to_string(),
            service_date: now.date_naive(),
            origin_code: "PAD".to_string(),
            destination_code: "RDG".to_string(),
            scheduled_departure: now - chrono::Duration::hours(1),
            scheduled_arrival: now + chrono::Duration::hours(1),
            monitoring_status: MonitoringStatus::Active,
            next_check_at: Some(now),
        },
    )
    .await?;
    rdt_db::update_status(&pool, journey.id, MonitoringStatus::Active, Some(&rid), Some(now)).await?;

    let upstream = Arc::new(FakeUpstreamDelaysClient::new());
    upstream.set_delay(&rid, 25, false);

    let oracle = Arc::new(FakeClaimsOracleClient::new(OracleBehavior::Success {
        claim_reference_id: "C-001".to_string(),
        estimated_compensation: Some(25.5),
    }));
    let oracle_handle: Arc<dyn ClaimsOracleClient> = oracle.clone();

    let orchestrator = DetectionOrchestrator::new(
        pool.clone(),
        JourneyMonitor::with_default_interval(),
        DelayDetector::with_default_threshold(),
        Arc::new(FakeMatcherClient::new()),
        upstream,
        ClaimTrigger::new(15, oracle_handle),
    );

    let report = orchestrator.run_tick(now).await?;
    assert_eq!(report.delays_detected, 1);
    assert_eq!(report.claims_triggered, 1);
    assert_eq!(oracle.call_count(), 1);

    let reloaded = rdt_db::find_journey_by_id(&pool, journey.id).await?.unwrap();
    assert_eq!(reloaded.monitoring_status, "delayed");

    let alert = rdt_db::find_latest_alert_for_journey(&pool, journey.id).await?.unwrap();
    assert_eq!(alert.delay_minutes, 25);
    assert!(alert.threshold_exceeded);
    assert!(alert.claim_triggered);
    assert_eq!(alert.claim_reference_id.as_deref(), Some("C-001"));
    assert!(alert.claim_triggered_at.is_some());

    let outbox = rdt_db::find_pending(&pool, 10).await?;
    let own: Vec<_> = outbox.iter().filter(|e| e.aggregate_id == alert.id.to_string()).collect();
    assert_eq!(own.len(), 2, "expected delay.detected + claim.triggered");
    let event_types: std::collections::HashSet<_> = own.iter().map(|e| e.event_type.as_str()).collect();
    assert!(event_types.contains("delay.detected"));
    assert!(event_types.contains("claim.triggered"));
    let correlation_ids: std::collections::HashSet<_> = own.iter().map(|e| e.correlation_id).collect();
    assert_eq!(correlation_ids.len(), 1, "both events share one correlation id");

    // A second cycle over the same data: the journey is now `delayed`, outside
    // the due set's `{pending_rid, active}` filter, so it is not revisited and
    // the oracle is not called again.
    let second = orchestrator.run_tick(now + chrono::Duration::minutes(5)).await?;
    assert_eq!(second.delays_detected, 0);
    assert_eq!(second.claims_triggered, 0);
    assert_eq!(oracle.call_count(), 1, "already-triggered alert's journey must not re-invoke the oracle");

    Ok(())
}
