use super::context::JobContext;
use crate::audit::NOT_APPLICABLE;
use crate::error::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Schedule for when a job should run.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Run at specific times using cron syntax (seconds first)
    Cron(String),
    /// Run at fixed intervals
    Interval(Duration),
    /// Run only in response to hooks
    Hook(HookEvent),
    /// Run only when triggered through the API
    Manual,
    /// Combination of scheduled and hook-triggered
    Combined {
        cron: Option<String>,
        interval: Option<Duration>,
        hooks: Vec<HookEvent>,
    },
}

/// Events that can trigger hook-based jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    OnStartup,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
        }
    }
}

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,

    #[error("Job is already running")]
    AlreadyRunning,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job timed out")]
    Timeout,
}

impl From<ClientError> for JobError {
    fn from(err: ClientError) -> Self {
        JobError::ExecutionFailed(err.to_string())
    }
}

/// Next time a cron expression fires strictly after `after`.
///
/// Returns `None` for invalid expressions and for schedules with no future
/// occurrence.
pub fn next_cron_run(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = cron::Schedule::from_str(expr).ok()?;
    schedule.after(&after).next()
}

/// Trait for background jobs.
///
/// Every run executes on its own tokio task inside a fresh correlation
/// scope. Long-running work should check `ctx.is_cancelled()`.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Audit action recorded with a `FAILURE` entry when a run fails.
    ///
    /// Jobs returning `None` fail without a job-level audit entry.
    fn failure_audit_action(&self) -> Option<&'static str> {
        None
    }

    /// Subject of the `FAILURE` entry for a run started with `params`.
    fn failure_audit_subject(&self, _params: Option<&JsonValue>) -> String {
        NOT_APPLICABLE.to_string()
    }

    /// Upper bound for one run. Runs exceeding it fail with [`JobError::Timeout`].
    fn max_duration(&self) -> Option<Duration> {
        None
    }

    /// Execute the job.
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Execute the job with optional parameters.
    ///
    /// Called when a job is triggered through the API with a JSON body. The
    /// default implementation ignores the parameters and delegates to
    /// `execute()`.
    async fn execute_with_params(
        &self,
        ctx: &JobContext,
        _params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        self.execute(ctx).await
    }
}
