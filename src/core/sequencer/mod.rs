//! Pipeline sequencer: health check, then each stage strictly in order.

use crate::core::config::{ExecutionSettings, RetryPolicy};
use crate::core::error::PipelineError;
use crate::core::executor::{retry_with_policy, StageExecutor, StageReport};
use crate::core::invoker::{ensure_healthy, HealthStatus, TransformService};
use crate::core::registry::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle of one pipeline run.
///
/// `NotStarted -> HealthChecking -> Running(0) -> ... -> Running(n-1) -> Completed`,
/// with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage_index")]
pub enum PipelineState {
    NotStarted,
    HealthChecking,
    Running(usize),
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (*self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (NotStarted, HealthChecking) => true,
            (HealthChecking, Running(0)) => true,
            // An empty plan has nothing to run once the service is healthy.
            (HealthChecking, Completed) => true,
            (Running(i), Running(j)) => j == i + 1,
            (Running(_), Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::NotStarted => write!(f, "not_started"),
            PipelineState::HealthChecking => write!(f, "health_checking"),
            PipelineState::Running(index) => write!(f, "running({})", index),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything observed during one run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    pub history: Vec<PipelineState>,
    pub health: Option<HealthStatus>,
    pub reports: Vec<StageReport>,
    pub error: Option<PipelineError>,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::NotStarted,
            history: vec![PipelineState::NotStarted],
            health: None,
            reports: Vec::new(),
            error: None,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "ignoring invalid state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "pipeline state changed");
        self.state = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    fn fail(&mut self, error: PipelineError) {
        self.error = Some(error);
        self.transition(PipelineState::Failed);
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Name of the stage whose failure stopped the run, if any.
    pub fn failed_stage(&self) -> Option<&str> {
        self.reports
            .iter()
            .find(|report| !report.is_success())
            .map(|report| report.stage.as_str())
    }

    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.error.clone() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Drives a health check followed by each stage, stopping at the first failure.
pub struct PipelineSequencer {
    service: Arc<dyn TransformService>,
    executor: StageExecutor,
    health_retry: RetryPolicy,
}

impl PipelineSequencer {
    pub fn new(service: Arc<dyn TransformService>, settings: ExecutionSettings) -> Self {
        let health_retry = settings.retry;
        Self {
            executor: StageExecutor::new(service.clone(), settings),
            service,
            health_retry,
        }
    }

    /// Health check with the same retry policy as mapping invocations.
    pub async fn check_health(&self) -> Result<HealthStatus, PipelineError> {
        let service = self.service.as_ref();
        let (result, attempts) =
            retry_with_policy(self.health_retry, "health check", move || ensure_healthy(service))
                .await;
        match &result {
            Ok(health) => tracing::info!(status = %health.status, attempts, "service is healthy"),
            Err(err) => tracing::error!(error = %err, attempts, "health check failed"),
        }
        result
    }

    /// Run `stages` in order. Never issues a stage call unless the health
    /// check passed, and never starts stage N+1 after stage N had a failure.
    pub async fn execute(&self, stages: &[Stage]) -> PipelineRun {
        let mut run = PipelineRun::new();
        let span = tracing::info_span!("pipeline_run", run_id = %run.run_id);
        async {
            tracing::info!(stages = stages.len(), "starting pipeline run");

            run.transition(PipelineState::HealthChecking);
            match self.check_health().await {
                Ok(health) => run.health = Some(health),
                Err(err) => {
                    run.fail(err);
                    return;
                }
            }

            for (index, stage) in stages.iter().enumerate() {
                run.transition(PipelineState::Running(index));
                let report = self.executor.run_stage(stage).await;
                let failure = report.error();
                run.reports.push(report);
                if let Some(err) = failure {
                    let skipped: Vec<&str> =
                        stages[index + 1..].iter().map(|s| s.name.as_str()).collect();
                    if !skipped.is_empty() {
                        tracing::warn!(?skipped, "skipping downstream stages");
                    }
                    run.fail(err);
                    return;
                }
            }

            run.transition(PipelineState::Completed);
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match &run.error {
            None => tracing::info!(stages = run.reports.len(), "pipeline run completed"),
            Some(err) => tracing::error!(error = %err, code = err.code(), "pipeline run failed"),
        });
        run
    }
}
