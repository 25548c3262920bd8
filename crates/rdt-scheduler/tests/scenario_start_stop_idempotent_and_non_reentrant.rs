use std::sync::Arc;

use async_trait::async_trait;
use rdt_claims::ClaimTrigger;
use rdt_clients::{
    ClaimTriggerRequest, ClaimTriggerResponse, ClaimsOracleClient, EligibilityCheckRequest,
    EligibilityCheckResponse, MatcherClient, UpstreamDelaysClient,
};
use rdt_detector::DelayDetector;
use rdt_monitor::JourneyMonitor;
use rdt_orchestrator::DetectionOrchestrator;
use rdt_scheduler::TickScheduler;
use sqlx::postgres::PgPoolOptions;

struct NoopMatcher;
#[async_trait]
impl MatcherClient for NoopMatcher {
    async fn get_segments(
        &self,
        _journey_id: &str,
    ) -> anyhow::Result<Option<rdt_clients::JourneyWithSegments>> {
        Ok(None)
    }
}

struct NoopUpstream;
#[async_trait]
impl UpstreamDelaysClient for NoopUpstream {
    async fn get_delays(&self, _rids: &[String]) -> anyhow::Result<Vec<rdt_clients::UpstreamDelayRecord>> {
        Ok(Vec::new())
    }
}

struct NoopOracle;
#[async_trait]
impl ClaimsOracleClient for NoopOracle {
    async fn trigger_claim(&self, _req: &ClaimTriggerRequest) -> anyhow::Result<ClaimTriggerResponse> {
        unimplemented!("not exercised: no due journeys in this scenario")
    }

    async fn check_eligibility(
        &self,
        _req: &EligibilityCheckRequest,
    ) -> anyhow::Result<EligibilityCheckResponse> {
        unimplemented!("not exercised")
    }
}

#[tokio::test]
#[ignore = "requires RDT_DATABASE_URL; run: RDT_DATABASE_URL=postgres://... cargo test -p rdt-scheduler -- --include-ignored"]
async fn start_twice_is_noop_and_stop_twice_is_noop() -> anyhow::Result<()> {
    let url = match std::env::var(rdt_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => panic!("DB tests require RDT_DATABASE_URL; set it to a scratch Postgres instance"),
    };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    rdt_db::migrate(&pool).await?;

    let orchestrator = Arc::new(DetectionOrchestrator::new(
        pool,
        JourneyMonitor::with_default_interval(),
        DelayDetector::with_default_threshold(),
        Arc::new(NoopMatcher),
        Arc::new(NoopUpstream),
        ClaimTrigger::new(15, NoopOracle),
    ));

    let scheduler = Arc::new(TickScheduler::new(orchestrator, "*/5 * * * *"));

    scheduler.start().await?;
    scheduler.start().await?; // second start is a no-op

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let snap = scheduler.metrics();
    assert_eq!(snap.executions, 1, "only the immediate start-up tick should have run yet");

    scheduler.stop().await;
    scheduler.stop().await; // second stop is a no-op

    Ok(())
}
