//! Axum router and all HTTP handlers for rdt-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the route tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
/// Middleware (CORS, tracing) is attached by `main.rs`, not here, so tests
/// can exercise the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/v1/journeys/:id", get(journey_by_id))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

pub(crate) async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { ok: true, service: st.build.service, version: st.build.version }))
}

#[derive(Serialize)]
struct StatusResponse {
    executions: u64,
    journeys_processed: u64,
    errors: u64,
    last_duration_ms: u64,
    skipped_reentrant: u64,
    running: bool,
}

pub(crate) async fn status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.scheduler.metrics();
    (
        StatusCode::OK,
        Json(StatusResponse {
            executions: snap.executions,
            journeys_processed: snap.journeys_processed,
            errors: snap.errors,
            last_duration_ms: snap.last_duration_ms,
            skipped_reentrant: snap.skipped_reentrant,
            running: st.scheduler.is_running(),
        }),
    )
}

#[derive(Serialize)]
struct JourneyResponse {
    id: i64,
    #[serde(rename = "journeyId")]
    journey_id: String,
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "monitoringStatus")]
    monitoring_status: String,
    rid: Option<String>,
    #[serde(rename = "nextCheckAt")]
    next_check_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct NotFoundResponse {
    error: String,
}

pub(crate) async fn journey_by_id(State(st): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match rdt_db::find_journey_by_id(&st.pool, id).await {
        Ok(Some(row)) => (
            StatusCode::OK,
            Json(JourneyResponse {
                id: row.id,
                journey_id: row.journey_id,
                user_id: row.user_id,
                monitoring_status: row.monitoring_status,
                rid: row.rid,
                next_check_at: row.next_check_at,
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(NotFoundResponse { error: format!("journey {id} not found") }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(journey_id = id, error = %e, "journey lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NotFoundResponse { error: "internal error".to_string() }),
            )
                .into_response()
        }
    }
}
