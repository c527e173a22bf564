//! Stage executor: fans a stage's mappings out to the transformation service.
//!
//! Every mapping is invoked independently, at most `max_active_mappings` at a
//! time. Each attempt is bounded by `mapping_timeout`; failed attempts are
//! retried with the fixed-delay [`RetryPolicy`]. The stage completes only once
//! every mapping has either succeeded or exhausted its attempts.

use crate::core::config::{ExecutionSettings, RetryPolicy};
use crate::core::error::{MappingFailure, PipelineError};
use crate::core::invoker::{ApiResponse, TransformService};
use crate::core::registry::{Stage, StageMapping};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::Instrument;

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Returns the final result and attempt count.
pub async fn retry_with_policy<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut operation: F,
) -> (Result<T, PipelineError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if attempts >= max_attempts || !err.is_retryable() => {
                return (Err(err), attempts)
            }
            Err(err) => {
                tracing::warn!(
                    attempt = attempts,
                    max_attempts,
                    error = %err,
                    delay = %humantime::format_duration(policy.delay),
                    "{} failed, retrying",
                    what
                );
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStatus {
    Succeeded,
    Failed,
}

/// Result of driving one mapping to completion.
#[derive(Debug, Clone)]
pub struct MappingOutcome {
    pub mapping: StageMapping,
    pub status: MappingStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub response: Option<ApiResponse>,
    pub error: Option<PipelineError>,
}

impl MappingOutcome {
    pub fn is_success(&self) -> bool {
        self.status == MappingStatus::Succeeded
    }

    fn failure(&self) -> Option<MappingFailure> {
        let error = self.error.clone()?;
        Some(MappingFailure {
            name: self.mapping.name.clone(),
            source: self.mapping.source.to_string(),
            destination: self.mapping.destination.to_string(),
            attempts: self.attempts,
            error,
        })
    }
}

/// Outcomes of every mapping in a stage, in registry order.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcomes: Vec<MappingOutcome>,
}

impl StageReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> Vec<MappingFailure> {
        self.outcomes.iter().filter_map(MappingOutcome::failure).collect()
    }

    /// `StageFailed` aggregating every failed mapping, if any failed.
    pub fn error(&self) -> Option<PipelineError> {
        let failures = self.failures();
        if failures.is_empty() {
            return None;
        }
        Some(PipelineError::StageFailed {
            stage: self.stage.clone(),
            total: self.outcomes.len(),
            failures,
        })
    }

    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[derive(Clone)]
pub struct StageExecutor {
    service: Arc<dyn TransformService>,
    settings: ExecutionSettings,
}

impl StageExecutor {
    pub fn new(service: Arc<dyn TransformService>, settings: ExecutionSettings) -> Self {
        Self { service, settings }
    }

    /// Invoke every mapping of `stage` and wait for all of them.
    pub async fn run_stage(&self, stage: &Stage) -> StageReport {
        let span = tracing::info_span!("stage", stage = %stage.name, endpoint = %stage.endpoint);
        async {
            tracing::info!(
                mappings = stage.mappings.len(),
                max_active = self.settings.max_active_mappings,
                "starting stage"
            );
            let started_at = Utc::now();
            let clock = Instant::now();

            let mut indexed: Vec<(usize, MappingOutcome)> =
                stream::iter(stage.mappings.iter().enumerate())
                    .map(move |(index, mapping)| async move {
                        (index, self.run_mapping(&stage.endpoint, mapping).await)
                    })
                    .buffer_unordered(self.settings.max_active_mappings.max(1))
                    .collect()
                    .await;
            indexed.sort_by_key(|(index, _)| *index);

            let report = StageReport {
                stage: stage.name.clone(),
                endpoint: stage.endpoint.clone(),
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
                outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
            };

            if report.is_success() {
                tracing::info!(
                    succeeded = report.succeeded(),
                    duration_ms = report.duration_ms,
                    "stage completed"
                );
            } else {
                tracing::error!(
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    "stage failed"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn run_mapping(&self, endpoint: &str, mapping: &StageMapping) -> MappingOutcome {
        let span = tracing::info_span!(
            "mapping",
            name = mapping.label(),
            source = %mapping.source,
            destination = %mapping.destination
        );
        async {
            let started_at = Utc::now();
            let clock = Instant::now();
            let limit = self.settings.mapping_timeout;

            let (result, attempts) = retry_with_policy(self.settings.retry, "mapping", move || async move {
                match timeout(limit, self.service.transform(endpoint, mapping)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout {
                        endpoint: endpoint.to_string(),
                        after: limit,
                    }),
                }
            })
            .await;

            let duration_ms = clock.elapsed().as_millis() as u64;
            match result {
                Ok(response) => {
                    tracing::info!(attempts, duration_ms, response = %response.summary(), "mapping completed");
                    MappingOutcome {
                        mapping: mapping.clone(),
                        status: MappingStatus::Succeeded,
                        attempts,
                        started_at,
                        duration_ms,
                        response: Some(response),
                        error: None,
                    }
                }
                Err(error) => {
                    tracing::error!(attempts, duration_ms, error = %error, "mapping failed");
                    MappingOutcome {
                        mapping: mapping.clone(),
                        status: MappingStatus::Failed,
                        attempts,
                        started_at,
                        duration_ms,
                        response: None,
                        error: Some(error),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
