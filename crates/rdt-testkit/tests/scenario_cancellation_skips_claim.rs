//! An observed cancellation records the synthesized `delay_minutes=1`
//! sentinel, moves the journey to `cancelled`, emits `delay.detected`, and
//! never triggers a claim.

use std::sync::Arc;

use chrono::Utc;
use rdt_claims::ClaimTrigger;
use rdt_detector::DelayDetector;
use rdt_monitor::JourneyMonitor;
use rdt_orchestrator::DetectionOrchestrator;
use rdt_schemas::MonitoringStatus;
use rdt_testkit::{FakeClaimsOracleClient, FakeMatcherClient, FakeUpstreamDelaysClient, OracleBehavior};
use sqlx::postgres::PgPoolOptions;

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-testkit -- --include-ignored"]
async fn cancellation_records_sentinel_minute_and_skips_claim() -> anyhow::Result<()> {
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
            user_id: "U2".to_string(),
            service_date: now.date_naive(),
            origin_code: "PAD".to_string(),
            destination_code: "RDG".to_string(),
            scheduled_departure: now - chrono::Duration::hours(1),
            scheduled_arrival: now + chrono::Duration::hours(1),
            monitoring_status: MonitoringStatus::PendingRid,
            next_check_at: Some(now),
        },
    )
    .await?;
    rdt_db::update_status(&pool, journey.id, MonitoringStatus::Active, Some(&rid), Some(now)).await?;

    let upstream = Arc::new(FakeUpstreamDelaysClient::new());
    upstream.set_delay(&rid, 0, true);

    let oracle = FakeClaimsOracleClient::new(OracleBehavior::Success {
        claim_reference_id: "C-should-not-be-called".to_string(),
        estimated_compensation: None,
    });

    let orchestrator = DetectionOrchestrator::new(
        pool.clone(),
        JourneyMonitor::with_default_interval(),
        DelayDetector::with_default_threshold(),
        Arc::new(FakeMatcherClient::new()),
        upstream,
        ClaimTrigger::new(15, oracle),
    );

    let report = orchestrator.run_tick(now).await?;
    assert_eq!(report.delays_detected, 1);
    assert_eq!(report.claims_triggered, 0);

    let reloaded = rdt_db::find_journey_by_id(&pool, journey.id).await?.unwrap();
    assert_eq!(reloaded.monitoring_status, "cancelled");
    assert!(reloaded.next_check_at.is_none());

    let alert = rdt_db::find_latest_alert_for_journey(&pool, journey.id).await?.unwrap();
    assert_eq!(alert.delay_minutes, 1);
    assert!(alert.is_cancellation);
    assert!(!alert.claim_triggered);

    Ok(())
}
