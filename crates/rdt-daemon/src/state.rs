//! Shared runtime state for rdt-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns no
//! async behavior itself beyond the scheduler it holds a handle to.

use std::sync::Arc;

use rdt_clients::HttpClaimsOracleClient;
use rdt_scheduler::TickScheduler;
use sqlx::PgPool;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        BuildInfo { service: "rdt-daemon", version: env!("CARGO_PKG_VERSION") }
    }
}

/// Cloneable (Arc) handle shared across all Axum handlers. Carries no
/// business logic of its own — it renders state already computed by
/// `rdt-scheduler` / `rdt-db`.
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: Arc<TickScheduler<HttpClaimsOracleClient>>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, scheduler: Arc<TickScheduler<HttpClaimsOracleClient>>) -> Self {
        AppState { pool, scheduler, build: BuildInfo::default() }
    }
}
