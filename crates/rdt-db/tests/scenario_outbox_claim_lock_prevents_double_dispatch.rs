use chrono::Utc;
use rdt_schemas::MonitoringStatus;
use sqlx::PgPool;
use uuid::Uuid;

async fn make_pool(url: &str) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(url).await?;
    rdt_db::migrate(&pool).await?;
    Ok(pool)
}

async fn make_journey(pool: &PgPool, journey_id: &str) -> anyhow::Result<i64> {
    let now = Utc::now();
    let row = rdt_db::create_journey(
        pool,
        &rdt_db::NewMonitoredJourney {
            journey_id: journey_id.to_string(),
            user_id: "U1".to_string(),
            service_date: now.date_naive(),
            origin_code: "PAD".to_string(),
            destination_code: "RDG".to_string(),
            scheduled_departure: now,
            scheduled_arrival: now + chrono::Duration::hours(1),
            monitoring_status: MonitoringStatus::PendingRid,
            next_check_at: Some(now),
        },
    )
    .await?;
    Ok(row.id)
}

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-db -- --include-ignored"]
async fn only_one_worker_claims_row_second_gets_empty() -> anyhow::Result<()> {
    let url = match std::env::var(rdt_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => panic!("DB tests require RDT_DATABASE_URL; set it to a scratch Postgres instance"),
    };
    let pool = make_pool(&url).await?;
    let journey_id = make_journey(&pool, &format!("claim-lock-{}", Uuid::new_v4())).await?;

    rdt_db::insert_outbox_event(
        &pool,
        &rdt_db::NewOutboxEvent {
            aggregate_id: journey_id.to_string(),
            aggregate_type: "monitored_journey".to_string(),
            event_type: "journey.monitoring_started".to_string(),
            payload: serde_json::json!({"journeyId": "J1"}),
            correlation_id: None,
        },
    )
    .await?;

    let mut tx1 = pool.begin().await?;
    let claimed1 = rdt_db::find_pending_for_processing(&mut *tx1, 10).await?;
    assert_eq!(claimed1.len(), 1);

    // A second worker attempting to claim concurrently (simulated serially here
    // since sqlx transactions in a single test are sequential) sees the row
    // once the first transaction commits — but not while it is open, because
    // FOR UPDATE SKIP LOCKED excludes locked rows rather than blocking on them.
    let mut tx2 = pool.begin().await?;
    let claimed2 = rdt_db::find_pending_for_processing(&mut *tx2, 10).await?;
    assert!(claimed2.is_empty(), "second worker must not see a row locked by the first");
    tx2.commit().await?;

    rdt_db::mark_processed(&mut *tx1, claimed1[0].id).await?;
    tx1.commit().await?;

    let remaining = rdt_db::find_pending(&pool, 10).await?;
    assert!(remaining.is_empty());

    Ok(())
}

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-db -- --include-ignored"]
async fn failed_event_resets_and_is_retried() -> anyhow::Result<()> {
    let url = match std::env::var(rdt_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => panic!("DB tests require RDT_DATABASE_URL; set it to a scratch Postgres instance"),
    };
    let pool = make_pool(&url).await?;
    let journey_id = make_journey(&pool, &format!("retry-{}", Uuid::new_v4())).await?;

    let event = rdt_db::insert_outbox_event(
        &pool,
        &rdt_db::NewOutboxEvent {
            aggregate_id: journey_id.to_string(),
            aggregate_type: "monitored_journey".to_string(),
            event_type: "journey.monitoring_started".to_string(),
            payload: serde_json::json!({}),
            correlation_id: None,
        },
    )
    .await?;

    let mut tx = pool.begin().await?;
    let claimed = rdt_db::find_pending_for_processing(&mut *tx, 10).await?;
    assert_eq!(claimed.len(), 1);
    rdt_db::mark_failed(&mut *tx, event.id, "broker unavailable").await?;
    tx.commit().await?;

    let failed = rdt_db::find_failed_for_retry(&pool, 3).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);

    rdt_db::reset_to_pending(&pool, event.id).await?;
    let pending = rdt_db::find_pending(&pool, 10).await?;
    assert_eq!(pending.len(), 1);

    Ok(())
}
