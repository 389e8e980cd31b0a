use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::limits::{MAX_HORIZON_MS, MAX_SOLVER_BUDGET_MS};
use crate::model::*;
use crate::schedule::{Budget, ScheduleDecision, SolveMode, formulate, report, solve};

use super::guard::{now_ms, validate_window};
use super::{ApplySummary, Engine, EngineError};

/// Knobs for one allocation run. Unset fields fall back to configuration.
#[derive(Debug, Clone)]
pub struct AllocateOptions {
    pub mode: SolveMode,
    pub horizon: Option<Span>,
    pub budget: Option<Duration>,
    /// Persist the decision through `apply_decision`.
    pub apply: bool,
}

impl Default for AllocateOptions {
    fn default() -> Self {
        Self {
            mode: SolveMode::Allocation,
            horizon: None,
            budget: None,
            apply: false,
        }
    }
}

impl Engine {
    /// From now until the configured number of days ahead.
    pub fn default_horizon(&self) -> Span {
        let now = now_ms();
        Span::new(now, now + self.schedule.horizon_days * DAY_MS)
    }

    /// Snapshot, formulate, and search on a blocking thread. The budget
    /// covers formulation and search together. Dropping the returned future
    /// cancels the run.
    pub async fn run_schedule(
        &self,
        mode: SolveMode,
        horizon: Option<Span>,
        budget: Duration,
        cancel: CancellationToken,
    ) -> Result<ScheduleDecision, EngineError> {
        if let Some(h) = &horizon {
            validate_window(h, MAX_HORIZON_MS)?;
        }
        let budget = budget.min(Duration::from_millis(MAX_SOLVER_BUDGET_MS));
        let snapshot = self.snapshot(horizon).await;
        let cfg = self.schedule;
        let mut limits = Budget::new(budget);
        limits.cancel = cancel.clone();

        let on_drop = cancel.drop_guard();
        let decision = tokio::task::spawn_blocking(move || {
            let model = formulate(&snapshot, mode, horizon, &cfg, &limits);
            let outcome = solve(&model, &limits);
            report(&model, &outcome)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("solver task failed: {e}")))?;
        on_drop.disarm();

        metrics::counter!(
            crate::observability::SOLVER_RUNS_TOTAL,
            "mode" => mode.as_str(),
            "status" => decision.status.as_str()
        )
        .increment(1);
        metrics::histogram!(crate::observability::SOLVER_DURATION_SECONDS)
            .record(decision.elapsed_ms as f64 / 1000.0);
        info!(
            %mode,
            status = %decision.status,
            feasible = decision.feasible,
            checked = decision.checked,
            objective = decision.objective,
            nodes = decision.nodes,
            elapsed_ms = decision.elapsed_ms,
            "schedule run finished"
        );
        Ok(decision)
    }

    /// Verify that committed bookings coexist. Without a horizon every
    /// booking is checked.
    pub async fn check_feasibility(
        &self,
        horizon: Option<Span>,
    ) -> Result<ScheduleDecision, EngineError> {
        self.run_schedule(
            SolveMode::Feasibility,
            horizon,
            self.schedule.solver_budget,
            CancellationToken::new(),
        )
        .await
    }

    /// Place pending requests, optionally persisting the result.
    pub async fn allocate(
        &self,
        options: AllocateOptions,
    ) -> Result<(ScheduleDecision, Option<ApplySummary>), EngineError> {
        let horizon = options.horizon.unwrap_or_else(|| self.default_horizon());
        let budget = options.budget.unwrap_or(self.schedule.solver_budget);
        let decision = self
            .run_schedule(options.mode, Some(horizon), budget, CancellationToken::new())
            .await?;
        let applied = if options.apply {
            Some(self.apply_decision(&decision).await?)
        } else {
            None
        };
        Ok((decision, applied))
    }
}
