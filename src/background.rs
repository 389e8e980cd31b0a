use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::SCHEDULE_FEASIBLE;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(appends, "WAL compacted");
    Ok(true)
}

/// Background task that re-verifies the committed schedule over the
/// default horizon.
pub async fn run_feasibility_check(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = check_once(&engine).await {
            warn!("periodic feasibility check failed: {e}");
        }
    }
}

pub async fn check_once(engine: &Engine) -> Result<bool, EngineError> {
    let decision = engine
        .check_feasibility(Some(engine.default_horizon()))
        .await?;
    metrics::gauge!(SCHEDULE_FEASIBLE).set(if decision.feasible { 1.0 } else { 0.0 });
    if decision.feasible {
        debug!(checked = decision.checked, "periodic check: schedule feasible");
    } else {
        warn!("periodic check: {}", decision.message);
    }
    Ok(decision.feasible)
}
