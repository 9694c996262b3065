use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::correlation::CorrelationId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl JobScheduleInfo {
    fn of_type(schedule_type: &str) -> Self {
        Self {
            schedule_type: schedule_type.to_string(),
            value_secs: None,
            cron: None,
            hooks: None,
        }
    }
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Cron(expr) => JobScheduleInfo {
                cron: Some(expr),
                ..Self::of_type("cron")
            },
            JobSchedule::Interval(duration) => JobScheduleInfo {
                value_secs: Some(duration.as_secs()),
                ..Self::of_type("interval")
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                hooks: Some(vec![event.to_string()]),
                ..Self::of_type("hook")
            },
            JobSchedule::Manual => Self::of_type("manual"),
            JobSchedule::Combined {
                cron,
                interval,
                hooks,
            } => JobScheduleInfo {
                schedule_type: "combined".to_string(),
                cron,
                value_secs: interval.map(|d| d.as_secs()),
                hooks: Some(hooks.iter().map(|h| h.to_string()).collect()),
            },
        }
    }
}

/// Outcome of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub correlation_id: String,
}

impl JobRunInfo {
    pub(crate) fn started(
        started_at: DateTime<Utc>,
        triggered_by: &str,
        correlation_id: &CorrelationId,
    ) -> Self {
        Self {
            started_at: started_at.to_rfc3339(),
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: triggered_by.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub(crate) fn finish(&mut self, result: &Result<(), JobError>) {
        self.finished_at = Some(Utc::now().to_rfc3339());
        match result {
            Ok(()) => self.status = JobRunStatus::Completed,
            Err(e) => {
                self.status = JobRunStatus::Failed;
                self.error_message = Some(e.to_string());
            }
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        params: Option<JsonValue>,
        correlation_id: Option<CorrelationId>,
        response: oneshot::Sender<Result<CorrelationId, JobError>>,
    },
}

/// Shared state between scheduler and handle.
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: HashSet<String>,
    /// Most recent run of each job, kept in memory only
    pub last_runs: HashMap<String, JobRunInfo>,
    /// Next scheduled run of each timed job
    pub next_runs: HashMap<String, DateTime<Utc>>,
}

impl SharedJobState {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            running_jobs: HashSet::new(),
            last_runs: HashMap::new(),
            next_runs: HashMap::new(),
        }
    }

    fn job_info(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> JobInfo {
        JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running: self.running_jobs.contains(job_id),
            last_run: self.last_runs.get(job_id).cloned(),
            next_run_at: self.next_runs.get(job_id).map(|dt| dt.to_rfc3339()),
        }
    }
}

impl Default for SharedJobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to interact with the job scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    /// Create a new scheduler handle.
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
        }
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(job_id, job)| state.job_info(job_id, job))
            .collect();

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state.jobs.get(job_id).map(|job| state.job_info(job_id, job))
    }

    /// Trigger a job manually.
    ///
    /// The run executes under `correlation_id` when given, otherwise under a
    /// freshly generated one. Returns the id the run was started with.
    pub async fn trigger_job(
        &self,
        job_id: &str,
        params: Option<JsonValue>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<CorrelationId, JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                params,
                correlation_id,
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }
}
