//! rdt-db
//!
//! Postgres-backed persistence for monitored journeys, delay alerts, and the
//! outbox. Every store function is generic over `sqlx::PgExecutor` so a
//! caller may pass either a pool connection (autonomous) or a transaction in
//! progress (participates in that transaction) — the "optional transaction
//! handle" the orchestrator needs for its per-journey atomic commit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rdt_schemas::{MonitoringStatus, OutboxStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "RDT_DATABASE_URL";

pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("{ENV_DB_URL} not set"))?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to database")
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("migration failed")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Raised when a unique constraint is violated on insert (`journey_id` already
/// registered). Modeled as a plain enum, not `anyhow::Error`, so callers can
/// match on it and surface a 4xx-equivalent without string-sniffing.
#[derive(Debug)]
pub enum DbError {
    Conflict(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Conflict(msg) => write!(f, "conflict: {msg}"),
        }
    }
}

impl std::error::Error for DbError {}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

// ---------------------------------------------------------------------------
// MonitoredJourney
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MonitoredJourneyRow {
    pub id: i64,
    pub journey_id: String,
    pub user_id: String,
    pub service_date: chrono::NaiveDate,
    pub origin_code: String,
    pub destination_code: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub rid: Option<String>,
    pub monitoring_status: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredJourneyRow {
    pub fn status(&self) -> Result<MonitoringStatus> {
        MonitoringStatus::parse(&self.monitoring_status)
    }

    fn from_row(row: PgRow) -> Result<Self, sqlx::Error> {
        Ok(MonitoredJourneyRow {
            id: row.try_get("id")?,
            journey_id: row.try_get("journey_id")?,
            user_id: row.try_get("user_id")?,
            service_date: row.try_get("service_date")?,
            origin_code: row.try_get("origin_code")?,
            destination_code: row.try_get("destination_code")?,
            scheduled_departure: row.try_get("scheduled_departure")?,
            scheduled_arrival: row.try_get("scheduled_arrival")?,
            rid: row.try_get("rid")?,
            monitoring_status: row.try_get("monitoring_status")?,
            last_checked_at: row.try_get("last_checked_at")?,
            next_check_at: row.try_get("next_check_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const JOURNEY_COLUMNS: &str = "id, journey_id, user_id, service_date, origin_code, destination_code, \
    scheduled_departure, scheduled_arrival, rid, monitoring_status, last_checked_at, next_check_at, \
    created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewMonitoredJourney {
    pub journey_id: String,
    pub user_id: String,
    pub service_date: chrono::NaiveDate,
    pub origin_code: String,
    pub destination_code: String,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub monitoring_status: MonitoringStatus,
    pub next_check_at: Option<DateTime<Utc>>,
}

/// Insert a journey. `Conflict` if `journey_id` is already registered.
pub async fn create_journey<'c, E>(exec: E, new: &NewMonitoredJourney) -> Result<MonitoredJourneyRow>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "insert into delay_tracker.monitored_journeys \
         (journey_id, user_id, service_date, origin_code, destination_code, \
          scheduled_departure, scheduled_arrival, monitoring_status, next_check_at) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         returning {JOURNEY_COLUMNS}"
    );

    let row = sqlx::query(&query)
        .bind(&new.journey_id)
        .bind(&new.user_id)
        .bind(new.service_date)
        .bind(&new.origin_code)
        .bind(&new.destination_code)
        .bind(new.scheduled_departure)
        .bind(new.scheduled_arrival)
        .bind(new.monitoring_status.as_str())
        .bind(new.next_check_at)
        .fetch_one(exec)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                anyhow::Error::new(DbError::Conflict(format!(
                    "journey_id {} already registered",
                    new.journey_id
                )))
            } else {
                anyhow::Error::new(e).context("create_journey failed")
            }
        })?;

    MonitoredJourneyRow::from_row(row).context("decode monitored_journey row")
}

pub async fn find_journey_by_id<'c, E>(exec: E, id: i64) -> Result<Option<MonitoredJourneyRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!("select {JOURNEY_COLUMNS} from delay_tracker.monitored_journeys where id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(exec)
        .await
        .context("find_journey_by_id failed")?;
    row.map(MonitoredJourneyRow::from_row).transpose().map_err(Into::into)
}

pub async fn find_journey_by_external_id<'c, E>(
    exec: E,
    journey_id: &str,
) -> Result<Option<MonitoredJourneyRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!("select {JOURNEY_COLUMNS} from delay_tracker.monitored_journeys where journey_id = $1");
    let row = sqlx::query(&query)
        .bind(journey_id)
        .fetch_optional(exec)
        .await
        .context("find_journey_by_external_id failed")?;
    row.map(MonitoredJourneyRow::from_row).transpose().map_err(Into::into)
}

pub async fn find_journeys_by_user<'c, E>(exec: E, user_id: &str) -> Result<Vec<MonitoredJourneyRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "select {JOURNEY_COLUMNS} from delay_tracker.monitored_journeys where user_id = $1 order by id"
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(exec)
        .await
        .context("find_journeys_by_user failed")?;
    rows.into_iter().map(MonitoredJourneyRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

/// Rows due for a check: `next_check_at <= now` and status in `{pending_rid, active}`,
/// ordered by `next_check_at` ascending. Backed by the partial index.
pub async fn find_due_for_check<'c, E>(
    exec: E,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<MonitoredJourneyRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "select {JOURNEY_COLUMNS} from delay_tracker.monitored_journeys \
         where next_check_at <= $1 and monitoring_status in ('pending_rid', 'active') \
         order by next_check_at asc \
         limit $2"
    );
    let rows = sqlx::query(&query)
        .bind(now)
        .bind(limit)
        .fetch_all(exec)
        .await
        .context("find_due_for_check failed")?;
    rows.into_iter().map(MonitoredJourneyRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

/// Atomic status change, optionally co-setting the rid.
pub async fn update_status<'c, E>(
    exec: E,
    id: i64,
    new_status: MonitoringStatus,
    rid: Option<&str>,
    next_check_at: Option<DateTime<Utc>>,
) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "update delay_tracker.monitored_journeys \
         set monitoring_status = $2, rid = coalesce($3, rid), next_check_at = $4 \
         where id = $1 \
         returning {JOURNEY_COLUMNS}"
    );
    sqlx::query(&query)
        .bind(id)
        .bind(new_status.as_str())
        .bind(rid)
        .bind(next_check_at)
        .fetch_optional(exec)
        .await
        .context("update_status failed")?
        .ok_or_else(|| anyhow::anyhow!("journey {id} not found"))?;
    Ok(())
}

/// Bulk pacing update for the orchestrator's end-of-tick sweep.
pub async fn update_last_checked_bulk<'c, E>(
    exec: E,
    ids: &[i64],
    checked_at: DateTime<Utc>,
    next_check_at: Option<DateTime<Utc>>,
) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "update delay_tracker.monitored_journeys \
         set last_checked_at = $1, next_check_at = $2 \
         where id = any($3)",
    )
    .bind(checked_at)
    .bind(next_check_at)
    .bind(ids)
    .execute(exec)
    .await
    .context("update_last_checked_bulk failed")?;
    Ok(())
}

pub async fn delete_journey<'c, E>(exec: E, id: i64) -> Result<bool>
where
    E: sqlx::PgExecutor<'c>,
{
    let result = sqlx::query("delete from delay_tracker.monitored_journeys where id = $1")
        .bind(id)
        .execute(exec)
        .await
        .context("delete_journey failed")?;
    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// DelayAlert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DelayAlertRow {
    pub id: i64,
    pub monitored_journey_id: i64,
    pub delay_minutes: i32,
    pub delay_detected_at: DateTime<Utc>,
    pub delay_reasons: Option<serde_json::Value>,
    pub is_cancellation: bool,
    pub threshold_exceeded: bool,
    pub claim_triggered: bool,
    pub claim_triggered_at: Option<DateTime<Utc>>,
    pub claim_reference_id: Option<String>,
    pub claim_trigger_response: Option<serde_json::Value>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ALERT_COLUMNS: &str = "id, monitored_journey_id, delay_minutes, delay_detected_at, delay_reasons, \
    is_cancellation, threshold_exceeded, claim_triggered, claim_triggered_at, claim_reference_id, \
    claim_trigger_response, notification_sent, notification_sent_at, created_at, updated_at";

impl DelayAlertRow {
    fn from_row(row: PgRow) -> Result<Self, sqlx::Error> {
        Ok(DelayAlertRow {
            id: row.try_get("id")?,
            monitored_journey_id: row.try_get("monitored_journey_id")?,
            delay_minutes: row.try_get("delay_minutes")?,
            delay_detected_at: row.try_get("delay_detected_at")?,
            delay_reasons: row.try_get("delay_reasons")?,
            is_cancellation: row.try_get("is_cancellation")?,
            threshold_exceeded: row.try_get("threshold_exceeded")?,
            claim_triggered: row.try_get("claim_triggered")?,
            claim_triggered_at: row.try_get("claim_triggered_at")?,
            claim_reference_id: row.try_get("claim_reference_id")?,
            claim_trigger_response: row.try_get("claim_trigger_response")?,
            notification_sent: row.try_get("notification_sent")?,
            notification_sent_at: row.try_get("notification_sent_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDelayAlert {
    pub monitored_journey_id: i64,
    pub delay_minutes: i32,
    pub delay_reasons: Option<serde_json::Value>,
    pub is_cancellation: bool,
    pub threshold_exceeded: bool,
}

pub async fn insert_delay_alert<'c, E>(exec: E, new: &NewDelayAlert) -> Result<DelayAlertRow>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "insert into delay_tracker.delay_alerts \
         (monitored_journey_id, delay_minutes, delay_reasons, is_cancellation, threshold_exceeded) \
         values ($1, $2, $3, $4, $5) \
         returning {ALERT_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(new.monitored_journey_id)
        .bind(new.delay_minutes)
        .bind(&new.delay_reasons)
        .bind(new.is_cancellation)
        .bind(new.threshold_exceeded)
        .fetch_one(exec)
        .await
        .context("insert_delay_alert failed")?;
    DelayAlertRow::from_row(row).context("decode delay_alert row")
}

pub async fn find_alert_by_id<'c, E>(exec: E, id: i64) -> Result<Option<DelayAlertRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!("select {ALERT_COLUMNS} from delay_tracker.delay_alerts where id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(exec).await.context("find_alert_by_id failed")?;
    row.map(DelayAlertRow::from_row).transpose().map_err(Into::into)
}

/// Most recent alert against a journey, if any — used when narrating
/// `journey.completed` (`hadDelay` / `delayMinutes`).
pub async fn find_latest_alert_for_journey<'c, E>(
    exec: E,
    monitored_journey_id: i64,
) -> Result<Option<DelayAlertRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "select {ALERT_COLUMNS} from delay_tracker.delay_alerts \
         where monitored_journey_id = $1 order by delay_detected_at desc limit 1"
    );
    let row = sqlx::query(&query)
        .bind(monitored_journey_id)
        .fetch_optional(exec)
        .await
        .context("find_latest_alert_for_journey failed")?;
    row.map(DelayAlertRow::from_row).transpose().map_err(Into::into)
}

/// Marks a claim SUCCESS: sets `claim_triggered`, `claim_triggered_at`, the reference, and response.
pub async fn mark_claim_triggered<'c, E>(
    exec: E,
    id: i64,
    claim_reference_id: &str,
    response: &serde_json::Value,
) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.delay_alerts \
         set claim_triggered = true, claim_triggered_at = now(), claim_reference_id = $2, \
             claim_trigger_response = $3 \
         where id = $1",
    )
    .bind(id)
    .bind(claim_reference_id)
    .bind(response)
    .execute(exec)
    .await
    .context("mark_claim_triggered failed")?;
    Ok(())
}

/// Records a non-success claim outcome: stores the response reason without setting `claim_triggered`.
pub async fn record_claim_response<'c, E>(exec: E, id: i64, response: &serde_json::Value) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query("update delay_tracker.delay_alerts set claim_trigger_response = $2 where id = $1")
        .bind(id)
        .bind(response)
        .execute(exec)
        .await
        .context("record_claim_response failed")?;
    Ok(())
}

pub async fn mark_notification_sent<'c, E>(exec: E, id: i64) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.delay_alerts set notification_sent = true, notification_sent_at = now() \
         where id = $1",
    )
    .bind(id)
    .execute(exec)
    .await
    .context("mark_notification_sent failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

const OUTBOX_COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, payload, correlation_id, \
    status, retry_count, error_message, created_at, processed_at, published_at";

impl OutboxRow {
    pub fn status(&self) -> Result<OutboxStatus> {
        OutboxStatus::parse(&self.status)
    }

    fn from_row(row: PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            correlation_id: row.try_get("correlation_id")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
}

pub async fn insert_outbox_event<'c, E>(exec: E, new: &NewOutboxEvent) -> Result<OutboxRow>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "insert into delay_tracker.outbox \
         (aggregate_id, aggregate_type, event_type, payload, correlation_id, status, retry_count) \
         values ($1, $2, $3, $4, $5, 'pending', 0) \
         returning {OUTBOX_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(&new.aggregate_id)
        .bind(&new.aggregate_type)
        .bind(&new.event_type)
        .bind(&new.payload)
        .bind(new.correlation_id)
        .fetch_one(exec)
        .await
        .context("insert_outbox_event failed")?;
    OutboxRow::from_row(row).context("decode outbox row")
}

/// FIFO scan, no locking. Useful for read-only inspection.
pub async fn find_pending<'c, E>(exec: E, limit: i64) -> Result<Vec<OutboxRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "select {OUTBOX_COLUMNS} from delay_tracker.outbox where status = 'pending' \
         order by created_at asc limit $1"
    );
    let rows = sqlx::query(&query).bind(limit).fetch_all(exec).await.context("find_pending failed")?;
    rows.into_iter().map(OutboxRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

/// Row-locked pickup: claims up to `limit` pending rows, transitioning them to
/// `processing`, using `FOR UPDATE SKIP LOCKED` so concurrent relay workers
/// never claim the same row. Must be called within a transaction — the caller
/// owns commit/rollback.
pub async fn find_pending_for_processing<'c, E>(exec: E, limit: i64) -> Result<Vec<OutboxRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "with to_claim as ( \
             select id from delay_tracker.outbox \
             where status = 'pending' \
             order by created_at asc \
             limit $1 \
             for update skip locked \
         ) \
         update delay_tracker.outbox \
            set status = 'processing' \
          where id in (select id from to_claim) \
         returning {OUTBOX_COLUMNS}"
    );
    let rows = sqlx::query(&query)
        .bind(limit)
        .fetch_all(exec)
        .await
        .context("find_pending_for_processing failed")?;
    rows.into_iter().map(OutboxRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

pub async fn mark_processed<'c, E>(exec: E, id: i64) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.outbox set status = 'processed', processed_at = now() \
         where id = $1 and status = 'processing'",
    )
    .bind(id)
    .execute(exec)
    .await
    .context("mark_processed failed")?;
    Ok(())
}

pub async fn mark_failed<'c, E>(exec: E, id: i64, message: &str) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.outbox \
         set status = 'failed', retry_count = retry_count + 1, error_message = $2 \
         where id = $1 and status = 'processing'",
    )
    .bind(id)
    .bind(message)
    .execute(exec)
    .await
    .context("mark_failed failed")?;
    Ok(())
}

pub async fn reset_to_pending<'c, E>(exec: E, id: i64) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.outbox set status = 'pending', error_message = null \
         where id = $1 and status = 'failed'",
    )
    .bind(id)
    .execute(exec)
    .await
    .context("reset_to_pending failed")?;
    Ok(())
}

/// `mark_processed`'s counterpart for the retry path, which moves a row
/// `failed -> pending` via `reset_to_pending` and never passes through
/// `processing`. Guards on `status = 'pending'` instead.
pub async fn mark_processed_from_pending<'c, E>(exec: E, id: i64) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.outbox set status = 'processed', processed_at = now() \
         where id = $1 and status = 'pending'",
    )
    .bind(id)
    .execute(exec)
    .await
    .context("mark_processed_from_pending failed")?;
    Ok(())
}

/// `mark_failed`'s counterpart for the retry path — see `mark_processed_from_pending`.
pub async fn mark_failed_from_pending<'c, E>(exec: E, id: i64, message: &str) -> Result<()>
where
    E: sqlx::PgExecutor<'c>,
{
    sqlx::query(
        "update delay_tracker.outbox \
         set status = 'failed', retry_count = retry_count + 1, error_message = $2 \
         where id = $1 and status = 'pending'",
    )
    .bind(id)
    .bind(message)
    .execute(exec)
    .await
    .context("mark_failed_from_pending failed")?;
    Ok(())
}

pub async fn find_failed_for_retry<'c, E>(exec: E, max_attempts: i32) -> Result<Vec<OutboxRow>>
where
    E: sqlx::PgExecutor<'c>,
{
    let query = format!(
        "select {OUTBOX_COLUMNS} from delay_tracker.outbox \
         where status = 'failed' and retry_count < $1 \
         order by created_at asc"
    );
    let rows = sqlx::query(&query)
        .bind(max_attempts)
        .fetch_all(exec)
        .await
        .context("find_failed_for_retry failed")?;
    rows.into_iter().map(OutboxRow::from_row).collect::<Result<_, _>>().map_err(Into::into)
}

/// Deletes `processed` rows older than `retention_days`. Non-processed rows are never touched.
pub async fn cleanup_old<'c, E>(exec: E, retention_days: i64) -> Result<u64>
where
    E: sqlx::PgExecutor<'c>,
{
    let result = sqlx::query(
        "delete from delay_tracker.outbox \
         where status = 'processed' and created_at < now() - make_interval(days => $1::int)",
    )
    .bind(retention_days as i32)
    .execute(exec)
    .await
    .context("cleanup_old failed")?;
    Ok(result.rows_affected())
}
