//! The broker raises for three relay passes, leaving the row `failed` with
//! an incremented `retry_count` each time; once it recovers,
//! `retry_failed_events` publishes it exactly once.

use rdt_testkit::FakeEventBroker;
use sqlx::postgres::PgPoolOptions;

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-testkit -- --include-ignored"]
async fn outbox_row_survives_repeated_broker_failures_then_publishes_once() -> anyhow::Result<()> {
    let url = match std::env::var(rdt_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => panic!("DB tests require RDT_DATABASE_URL; set it to a scratch Postgres instance"),
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    rdt_db::migrate(&pool).await?;

    let journey = rdt_db::create_journey(
        &pool,
        &rdt_db::NewMonitoredJourney {
            journey_id: format!("J-{}", uuid::Uuid::new_v4()),
            user_id: "U4".to_string(),
            service_date: chrono::Utc::now().date_naive(),
            origin_code: "PAD".to_string(),
            destination_code: "RDG".to_string(),
            scheduled_departure: chrono::Utc::now(),
            scheduled_arrival: chrono::Utc::now() + chrono::Duration::hours(1),
            monitoring_status: rdt_schemas::MonitoringStatus::PendingRid,
            next_check_at: Some(chrono::Utc::now()),
        },
    )
    .await?;

    let event = rdt_outbox::build_journey_monitoring_started(
        journey.id,
        &journey.journey_id,
        &journey.user_id,
        "PAD",
        "RDG",
        chrono::Utc::now(),
        None,
    );
    rdt_db::insert_outbox_event(&pool, &event).await?;

    let broker = FakeEventBroker::new();
    let max_retries = 3;

    // Cycle 1: relay claims the row, broker fails, row becomes `failed` with retry_count=1.
    broker.fail_next_n_calls(1);
    let report = rdt_outbox::process_outbox(&pool, &broker, 10).await?;
    assert_eq!(report.failed, 1);
    let row = only_row_for(&pool, journey.id).await?;
    assert_eq!(row.status, "failed");
    assert_eq!(row.retry_count, 1);

    // Cycles 2 and 3: retry pass resets to pending, broker still fails, retry_count climbs.
    for expected_count in 2..=3 {
        broker.fail_next_n_calls(1);
        let retry_report = rdt_outbox::retry_failed_events(&pool, &broker, max_retries).await?;
        assert_eq!(retry_report.failed, 1);
        let row = only_row_for(&pool, journey.id).await?;
        assert_eq!(row.status, "failed");
        assert_eq!(row.retry_count, expected_count);
    }

    // retry_count now equals max_retries, so find_failed_for_retry no longer selects it.
    let exhausted = rdt_db::find_failed_for_retry(&pool, max_retries).await?;
    assert!(exhausted.iter().all(|r| r.id != journey.id));

    // Broker recovers; an operator-triggered retry with a relaxed bound publishes it.
    let final_report = rdt_outbox::retry_failed_events(&pool, &broker, max_retries + 1).await?;
    assert_eq!(final_report.processed, 1);
    let row = only_row_for(&pool, journey.id).await?;
    assert_eq!(row.status, "processed");
    assert!(row.processed_at.is_some());

    assert_eq!(broker.published().len(), 1, "published exactly once");

    Ok(())
}

/// Reads the single outbox row for `journey_id` regardless of its current
/// status — the assertions care about status/retry_count/processed_at, not
/// about which `rdt_db::find_*` query would currently surface it.
async fn only_row_for(pool: &sqlx::PgPool, journey_id: i64) -> anyhow::Result<RowSnapshot> {
    let row: (String, i32, Option<chrono::DateTime<chrono::Utc>>) = sqlx::query_as(
        "select status, retry_count, processed_at from delay_tracker.outbox where aggregate_id = $1",
    )
    .bind(journey_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(RowSnapshot { status: row.0, retry_count: row.1, processed_at: row.2 })
}

struct RowSnapshot {
    status: String,
    retry_count: i32,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
}
