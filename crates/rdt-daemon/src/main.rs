//! rdt-daemon entry point.
//!
//! This file is intentionally thin: it loads config, builds the shared
//! state, starts the tick scheduler, wires middleware, and starts the HTTP
//! server. All route handlers live in `routes.rs`; all shared state types
//! live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use rdt_claims::ClaimTrigger;
use rdt_clients::{HttpClaimsOracleClient, HttpMatcherClient, HttpUpstreamDelaysClient};
use rdt_daemon::{routes, state};
use rdt_detector::DelayDetector;
use rdt_monitor::JourneyMonitor;
use rdt_orchestrator::DetectionOrchestrator;
use rdt_scheduler::TickScheduler;
use sqlx::postgres::PgPoolOptions;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths = config_paths_from_env();
    let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = rdt_config::load_layered_yaml(&paths).context("load config")?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");
    let config = loaded.into_app_config().context("config does not match expected shape")?;

    let db_url = config.database.resolve_url().context("resolve database url")?;
    let pool = PgPoolOptions::new().max_connections(10).connect(&db_url).await.context("connect to database")?;
    rdt_db::migrate(&pool).await.context("run migrations")?;

    let matcher = Arc::new(HttpMatcherClient::with_timeout(
        &config.services.matcher.base_url,
        Duration::from_secs(config.services.matcher.timeout_seconds.unwrap_or(config.http_timeout_seconds)),
    ));
    let upstream = Arc::new(HttpUpstreamDelaysClient::with_timeout(
        &config.services.upstream_delays.base_url,
        Duration::from_secs(config.services.upstream_delays.timeout_seconds.unwrap_or(config.http_timeout_seconds)),
    ));
    let oracle = HttpClaimsOracleClient::new(&config.services.oracle.base_url);

    let monitor = JourneyMonitor::with_default_interval();
    let detector = DelayDetector::new(config.delay_threshold_minutes).context("build delay detector")?;
    let claim_trigger = ClaimTrigger::new(config.delay_threshold_minutes, oracle);

    let orchestrator =
        Arc::new(DetectionOrchestrator::new(pool.clone(), monitor, detector, matcher, upstream, claim_trigger));

    let scheduler = Arc::new(TickScheduler::new(orchestrator, config.cron.expression.clone()));
    if config.cron.enabled {
        scheduler.start().await.context("start tick scheduler")?;
        info!(expression = %config.cron.expression, "tick scheduler started");
    } else {
        info!("tick scheduler disabled by config");
    }

    let shared = Arc::new(state::AppState::new(pool, Arc::clone(&scheduler)));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], config.port)));
    info!("rdt-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("bind listener")?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => result.context("server crashed")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    scheduler.stop().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("RDT_DAEMON_ADDR").ok()?.parse().ok()
}

fn config_paths_from_env() -> Vec<String> {
    match std::env::var("RDT_CONFIG_PATHS") {
        Ok(raw) => raw.split(',').map(str::trim).map(str::to_string).collect(),
        Err(_) => vec!["config/default.yaml".to_string()],
    }
}

/// CORS: allow only localhost origins, as the operator tooling runs there.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
