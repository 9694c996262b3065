use super::context::JobContext;
use super::handle::{JobRunInfo, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{next_cron_run, BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
use crate::correlation::{self, CorrelationId};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps without re-checking its jobs.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Grace period given to each running job on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles (not shared, managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

/// First time a freshly registered job is due.
///
/// Interval jobs run right away, cron jobs wait for their next firing.
fn first_run(schedule: &JobSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        JobSchedule::Interval(_) => Some(now),
        JobSchedule::Combined {
            interval: Some(_), ..
        } => Some(now),
        other => next_run_after(other, now),
    }
}

/// Next time a job is due after a run started at `after`.
fn next_run_after(schedule: &JobSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_interval =
        |interval: &Duration| after + chrono::Duration::from_std(*interval).unwrap_or_default();

    match schedule {
        JobSchedule::Cron(expr) => next_cron_run(expr, after),
        JobSchedule::Interval(interval) => Some(after_interval(interval)),
        JobSchedule::Hook(_) | JobSchedule::Manual => None,
        JobSchedule::Combined { cron, interval, .. } => {
            let by_cron = cron.as_deref().and_then(|expr| next_cron_run(expr, after));
            let by_interval = interval.as_ref().map(after_interval);
            by_cron.into_iter().chain(by_interval).min()
        }
    }
}

impl JobScheduler {
    /// Create a new job scheduler.
    pub fn new(
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());

        let schedule = job.schedule();
        let next_run = first_run(&schedule, Utc::now());
        if next_run.is_none() {
            if let JobSchedule::Cron(expr) = &schedule {
                warn!(
                    "Job {} has cron expression {:?} with no upcoming run, it will only run when triggered",
                    job_id, expr
                );
            }
        }

        let mut state = self.shared_state.write().await;
        if let Some(next_run) = next_run {
            debug!("Job {} first due at {}", job_id, next_run.to_rfc3339());
            state.next_runs.insert(job_id.clone(), next_run);
        }
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        // Fire OnStartup hooks
        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            // Clean up completed job handles
            self.cleanup_completed_jobs();

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Handle a command from the SchedulerHandle.
    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob {
                job_id,
                params,
                correlation_id,
                response,
            } => {
                let result = self.trigger_job(&job_id, params, correlation_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(
        &mut self,
        job_id: &str,
        params: Option<JsonValue>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<CorrelationId, JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }

        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual", params, correlation_id)
            .await
            .ok_or(JobError::NotFound)
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let state = self.shared_state.read().await;
        let now = Utc::now();

        state
            .next_runs
            .values()
            .map(|next_run| (*next_run - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .map_or(MAX_IDLE, |due_in| due_in.min(MAX_IDLE))
    }

    /// Run all jobs that are due for scheduled execution.
    ///
    /// A job still running when it comes due skips that firing.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let mut guard = self.shared_state.write().await;
            let state = &mut *guard;
            for (job_id, job) in &state.jobs {
                let due = match state.next_runs.get(job_id) {
                    Some(next_run) => *next_run <= now,
                    None => false,
                };
                if !due {
                    continue;
                }

                match next_run_after(&job.schedule(), now) {
                    Some(next_run) => {
                        state.next_runs.insert(job_id.clone(), next_run);
                    }
                    None => {
                        state.next_runs.remove(job_id);
                    }
                }

                if state.running_jobs.contains(job_id) {
                    warn!("Job {} is still running, skipping scheduled run", job_id);
                    continue;
                }
                jobs_to_run.push(job_id.clone());
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule", None, None).await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }

                let should_trigger = match job.schedule() {
                    JobSchedule::Hook(hook_event) => hook_event == event,
                    JobSchedule::Combined { ref hooks, .. } => hooks.contains(&event),
                    _ => false,
                };

                if should_trigger {
                    jobs_to_trigger.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger, None, None).await;
        }
    }

    /// Spawn a job execution task inside its own correlation scope.
    ///
    /// Returns the correlation id of the run, or `None` if the job is unknown.
    async fn spawn_job(
        &mut self,
        job_id: &str,
        triggered_by: &str,
        params: Option<JsonValue>,
        correlation_id: Option<CorrelationId>,
    ) -> Option<CorrelationId> {
        let scope = correlation::begin(correlation_id.as_ref().map(CorrelationId::as_str));
        let run_correlation_id = scope.id().clone();

        let job = {
            let mut state = self.shared_state.write().await;
            let job = match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return None;
                }
            };

            // Mark job as running in shared state
            state.running_jobs.insert(job_id.to_string());
            state.last_runs.insert(
                job_id.to_string(),
                JobRunInfo::started(Utc::now(), triggered_by, &run_correlation_id),
            );
            job
        };

        info!(
            "Starting job: {} (triggered_by: {}, correlation_id: {})",
            job_id, triggered_by, run_correlation_id
        );

        // Set metric indicating job is running
        metrics::set_background_job_running(job_id, true);

        // Create cancellation token for this job
        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());

        let ctx = self
            .job_context
            .with_cancellation_token(cancel_token.clone());
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let failure_subject = job.failure_audit_subject(params.as_ref());

        let handle = tokio::spawn(scope.run(async move {
            let start_time = Instant::now();
            let result = run_job(job.as_ref(), &ctx, params, &cancel_token).await;
            let elapsed = start_time.elapsed();

            let status_label = match &result {
                Ok(()) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    "success"
                }
                Err(JobError::Cancelled) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    "cancelled"
                }
                Err(e) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    if let Some(action) = job.failure_audit_action() {
                        ctx.audit
                            .log_failure(action, &failure_subject, &e.to_string());
                    }
                    match e {
                        JobError::Timeout => "timeout",
                        _ => "failed",
                    }
                }
            };

            // Record metrics
            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            // Mark job as not running in shared state
            let mut state = shared_state.write().await;
            state.running_jobs.remove(&job_id_owned);
            if let Some(run) = state.last_runs.get_mut(&job_id_owned) {
                run.finish(&result);
            }
        }));

        self.running_handles.insert(job_id.to_string(), handle);
        Some(run_correlation_id)
    }

    /// Clean up handles for completed jobs.
    fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            self.running_handles.remove(&job_id);
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        // Cancel cancellable jobs
        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                if let Some(job) = state.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                }
            }
        }

        // Wait for all jobs to complete
        let mut wait_jobs = Vec::new();
        for (job_id, handle) in self.running_handles.drain() {
            let behavior = {
                let state = self.shared_state.read().await;
                state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default()
            };
            wait_jobs.push((job_id, handle, behavior));
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} did not finish within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Execute one run, turning panics, timeouts and cancellation into errors.
async fn run_job(
    job: &dyn BackgroundJob,
    ctx: &JobContext,
    params: Option<JsonValue>,
    cancel_token: &CancellationToken,
) -> Result<(), JobError> {
    let execution = AssertUnwindSafe(job.execute_with_params(ctx, params))
        .catch_unwind()
        .map(|outcome| {
            outcome.unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(JobError::ExecutionFailed(format!("Task panic: {}", message)))
            })
        });

    let bounded = async {
        match job.max_duration() {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or(Err(JobError::Timeout)),
            None => execution.await,
        }
    };

    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
        tokio::select! {
            result = bounded => result,
            _ = cancel_token.cancelled() => Err(JobError::Cancelled),
        }
    } else {
        bounded.await
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::new()));

    let scheduler = JobScheduler::new(
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemoryAuditSink, ServiceAuditLogger, NOT_APPLICABLE};
    use crate::background_jobs::handle::JobRunStatus;
    use crate::controller_app::{ControllerApp, ControllerAppClient};
    use crate::error::{AuthUnavailable, ClientResult};
    use crate::outbound::AuthenticatedClient;
    use crate::token::{Credential, TokenProvider};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedTokens;

    #[async_trait]
    impl TokenProvider for FixedTokens {
        async fn acquire(&self) -> Result<Credential, AuthUnavailable> {
            Ok(Credential::issue(
                "T1",
                "",
                Utc::now(),
                chrono::Duration::seconds(3600),
                chrono::Duration::seconds(60),
            ))
        }

        fn invalidate(&self) {}
    }

    /// Number of `STARTED` entries and of terminal entries.
    fn audit_pairs(audit: &MemoryAuditSink) -> (usize, usize) {
        let entries = audit.entries();
        let started = entries.iter().filter(|e| e["status"] == "STARTED").count();
        let terminal = entries
            .iter()
            .filter(|e| e["status"] == "SUCCESS" || e["status"] == "FAILURE")
            .count();
        (started, terminal)
    }

    async fn slow_controller() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/controller/internal/scans/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        server
    }

    async fn wait_for_started(audit: &MemoryAuditSink) {
        for _ in 0..500 {
            if audit_pairs(audit).0 > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no call was started");
    }

    struct UnusedControllerApp;

    #[async_trait]
    impl ControllerApp for UnusedControllerApp {
        async fn get_recently_completed_scans(
            &self,
            _from_date: NaiveDate,
            _to_date: NaiveDate,
            _within_days: u32,
            _scan_limit: u32,
        ) -> ClientResult<String> {
            unreachable!()
        }

        async fn get_active_scan_cycle_by_id(&self, _scan_cycle_id: i64) -> ClientResult<String> {
            unreachable!()
        }

        async fn get_scan_cycle_by_id(&self, _scan_cycle_id: i64) -> ClientResult<String> {
            unreachable!()
        }

        async fn get_scan_cycle_by_data_target_name(&self, _name: &str) -> ClientResult<String> {
            unreachable!()
        }

        async fn get_scans_by_status(&self, _status: &str) -> ClientResult<String> {
            unreachable!()
        }

        async fn launch_scan_cycle(&self, _scan_cycle_id: i64) -> ClientResult<String> {
            unreachable!()
        }
    }

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        WaitFor(Arc<Notify>),
        FetchPending,
    }

    // Test job implementation
    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        behavior: Behavior,
        failure_action: Option<&'static str>,
        max_duration: Option<Duration>,
        execution_count: Arc<AtomicUsize>,
        seen_correlation_ids: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl TestJob {
        fn new(id: &'static str, behavior: Behavior) -> Self {
            Self {
                id,
                schedule: JobSchedule::Manual,
                behavior,
                failure_action: None,
                max_duration: None,
                execution_count: Arc::new(AtomicUsize::new(0)),
                seen_correlation_ids: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn failure_audit_action(&self) -> Option<&'static str> {
            self.failure_action
        }

        fn max_duration(&self) -> Option<Duration> {
            self.max_duration
        }

        async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            self.seen_correlation_ids
                .lock()
                .unwrap()
                .push(correlation::current().map(|id| id.to_string()));

            match &self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(JobError::ExecutionFailed("Test failure".to_string())),
                Behavior::Panic => panic!("job exploded"),
                Behavior::WaitFor(notify) => {
                    notify.notified().await;
                    Ok(())
                }
                Behavior::FetchPending => {
                    ctx.controller_app.get_scans_by_status("PENDING").await?;
                    Ok(())
                }
            }
        }
    }

    struct Harness {
        scheduler: JobScheduler,
        handle: SchedulerHandle,
        shutdown_token: CancellationToken,
        audit: MemoryAuditSink,
    }

    fn create_test_scheduler() -> Harness {
        let audit = MemoryAuditSink::new();
        let logger =
            ServiceAuditLogger::new("schedulerapp-service").with_sink(Arc::new(audit.clone()));
        harness(Arc::new(UnusedControllerApp), logger, audit)
    }

    /// Scheduler whose jobs talk to `controller_url` through the real client.
    fn create_scheduler_against(controller_url: &str) -> Harness {
        let audit = MemoryAuditSink::new();
        let logger =
            ServiceAuditLogger::new("schedulerapp-service").with_sink(Arc::new(audit.clone()));
        let http = AuthenticatedClient::new(
            Arc::new(FixedTokens),
            Arc::new(reqwest::Client::new()),
        );
        let client = ControllerAppClient::new(controller_url, http, logger.clone()).unwrap();
        harness(Arc::new(client), logger, audit)
    }

    fn harness(
        controller_app: Arc<dyn ControllerApp>,
        logger: ServiceAuditLogger,
        audit: MemoryAuditSink,
    ) -> Harness {
        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(shutdown_token.child_token(), controller_app, logger);

        let (scheduler, handle) = create_scheduler(shutdown_token.clone(), job_context);

        Harness {
            scheduler,
            handle,
            shutdown_token,
            audit,
        }
    }

    async fn start(mut scheduler: JobScheduler) -> JoinHandle<()> {
        tokio::spawn(async move { scheduler.run().await })
    }

    async fn wait_until_finished(handle: &SchedulerHandle, job_id: &str) -> JobRunInfo {
        for _ in 0..500 {
            if let Some(info) = handle.get_job(job_id).await {
                if let Some(run) = info.last_run {
                    if run.status != JobRunStatus::Running {
                        return run;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish in time", job_id);
    }

    #[test]
    fn test_first_run_for_schedules() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        assert_eq!(
            first_run(&JobSchedule::Interval(Duration::from_secs(60)), now),
            Some(now)
        );
        assert_eq!(
            first_run(&JobSchedule::Cron("0 0 * * * *".to_string()), now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
        );
        assert_eq!(first_run(&JobSchedule::Manual, now), None);
        assert_eq!(first_run(&JobSchedule::Hook(HookEvent::OnStartup), now), None);
    }

    #[test]
    fn test_next_run_combined_takes_earliest() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        let schedule = JobSchedule::Combined {
            cron: Some("0 0 * * * *".to_string()),
            interval: Some(Duration::from_secs(600)),
            hooks: vec![],
        };

        assert_eq!(
            next_run_after(&schedule, now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 25, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let mut h = create_test_scheduler();

        assert!(h.handle.list_jobs().await.is_empty());
        assert!(!h.handle.job_exists("test_job").await);

        let mut cron_job = TestJob::new("b_cron_job", Behavior::Succeed);
        cron_job.schedule = JobSchedule::Cron("0 0 * * * *".to_string());
        h.scheduler.register_job(Arc::new(cron_job)).await;
        h.scheduler
            .register_job(Arc::new(TestJob::new("a_manual_job", Behavior::Succeed)))
            .await;

        let jobs = h.handle.list_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "a_manual_job");
        assert!(jobs[0].next_run_at.is_none());
        assert_eq!(jobs[1].id, "b_cron_job");
        assert!(jobs[1].next_run_at.is_some());
        assert!(!jobs[1].is_running);
        assert!(jobs[1].last_run.is_none());

        assert!(h.handle.job_exists("a_manual_job").await);
        assert!(h.handle.get_job("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_trigger_runs_job_in_given_correlation_scope() {
        let mut h = create_test_scheduler();
        let job = TestJob::new("test_job", Behavior::Succeed);
        let seen = job.seen_correlation_ids.clone();
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        let id = CorrelationId::parse("abc-123").unwrap();
        let started = h
            .handle
            .trigger_job("test_job", None, Some(id.clone()))
            .await
            .unwrap();
        assert_eq!(started, id);

        let run = wait_until_finished(&h.handle, "test_job").await;
        assert_eq!(run.status, JobRunStatus::Completed);
        assert_eq!(run.triggered_by, "manual");
        assert_eq!(run.correlation_id, "abc-123");
        assert_eq!(*seen.lock().unwrap(), vec![Some("abc-123".to_string())]);

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_each_run_gets_a_distinct_correlation_id() {
        let mut h = create_test_scheduler();
        let job = TestJob::new("test_job", Behavior::Succeed);
        let seen = job.seen_correlation_ids.clone();
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        let first = h.handle.trigger_job("test_job", None, None).await.unwrap();
        wait_until_finished(&h.handle, "test_job").await;
        let second = h.handle.trigger_job("test_job", None, None).await.unwrap();
        wait_until_finished(&h.handle, "test_job").await;

        assert_ne!(first, second);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_deref(), Some(first.as_str()));
        assert_eq!(seen[1].as_deref(), Some(second.as_str()));

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_unknown_job() {
        let h = create_test_scheduler();
        let runner = start(h.scheduler).await;

        let result = h.handle.trigger_job("nonexistent", None, None).await;
        assert!(matches!(result, Err(JobError::NotFound)));

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_running_job_is_rejected() {
        let mut h = create_test_scheduler();
        let release = Arc::new(Notify::new());
        h.scheduler
            .register_job(Arc::new(TestJob::new(
                "slow_job",
                Behavior::WaitFor(release.clone()),
            )))
            .await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("slow_job", None, None).await.unwrap();
        assert!(h.handle.is_job_running("slow_job").await);

        let second = h.handle.trigger_job("slow_job", None, None).await;
        assert!(matches!(second, Err(JobError::AlreadyRunning)));

        release.notify_one();
        let run = wait_until_finished(&h.handle, "slow_job").await;
        assert_eq!(run.status, JobRunStatus::Completed);
        assert!(!h.handle.is_job_running("slow_job").await);

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_is_audited_and_scheduler_keeps_running() {
        let mut h = create_test_scheduler();
        let mut failing = TestJob::new("failing_job", Behavior::Fail);
        failing.failure_action = Some("SCHEDULED_SCAN_LAUNCHER");
        h.scheduler.register_job(Arc::new(failing)).await;
        let ok_job = TestJob::new("ok_job", Behavior::Succeed);
        let ok_count = ok_job.execution_count.clone();
        h.scheduler.register_job(Arc::new(ok_job)).await;
        let runner = start(h.scheduler).await;

        let id = h.handle.trigger_job("failing_job", None, None).await.unwrap();
        let run = wait_until_finished(&h.handle, "failing_job").await;
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(
            run.error_message.as_deref(),
            Some("Execution failed: Test failure")
        );

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["action"], "SCHEDULED_SCAN_LAUNCHER");
        assert_eq!(entries[0]["status"], "FAILURE");
        assert_eq!(entries[0]["scanId"], NOT_APPLICABLE);
        assert_eq!(entries[0]["correlationId"], id.as_str());

        h.handle.trigger_job("ok_job", None, None).await.unwrap();
        wait_until_finished(&h.handle, "ok_job").await;
        assert_eq!(ok_count.load(Ordering::SeqCst), 1);

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_without_audit_action_is_not_audited() {
        let mut h = create_test_scheduler();
        h.scheduler
            .register_job(Arc::new(TestJob::new("failing_job", Behavior::Fail)))
            .await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("failing_job", None, None).await.unwrap();
        wait_until_finished(&h.handle, "failing_job").await;

        assert!(h.audit.lines().is_empty());

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_as_failed() {
        let mut h = create_test_scheduler();
        h.scheduler
            .register_job(Arc::new(TestJob::new("panicking_job", Behavior::Panic)))
            .await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("panicking_job", None, None).await.unwrap();
        let run = wait_until_finished(&h.handle, "panicking_job").await;

        assert_eq!(run.status, JobRunStatus::Failed);
        assert!(run.error_message.unwrap().contains("job exploded"));
        assert!(!h.handle.is_job_running("panicking_job").await);

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_job_exceeding_max_duration_times_out() {
        let mut h = create_test_scheduler();
        let mut job = TestJob::new("stuck_job", Behavior::WaitFor(Arc::new(Notify::new())));
        job.max_duration = Some(Duration::from_millis(50));
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("stuck_job", None, None).await.unwrap();
        let run = wait_until_finished(&h.handle, "stuck_job").await;

        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("Job timed out"));

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_hook_runs_job() {
        let mut h = create_test_scheduler();
        let mut job = TestJob::new("startup_job", Behavior::Succeed);
        job.schedule = JobSchedule::Hook(HookEvent::OnStartup);
        let count = job.execution_count.clone();
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        let run = wait_until_finished(&h.handle, "startup_job").await;
        assert_eq!(run.triggered_by, "hook:OnStartup");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_job_runs_on_schedule() {
        let mut h = create_test_scheduler();
        let mut job = TestJob::new("interval_job", Behavior::Succeed);
        job.schedule = JobSchedule::Interval(Duration::from_secs(3600));
        let count = job.execution_count.clone();
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        let run = wait_until_finished(&h.handle, "interval_job").await;
        assert_eq!(run.triggered_by, "schedule");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(h
            .handle
            .get_job("interval_job")
            .await
            .unwrap()
            .next_run_at
            .is_some());

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let mut h = create_test_scheduler();
        h.scheduler
            .register_job(Arc::new(TestJob::new(
                "slow_job",
                Behavior::WaitFor(Arc::new(Notify::new())),
            )))
            .await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("slow_job", None, None).await.unwrap();
        h.shutdown_token.cancel();
        runner.await.unwrap();

        let run = h.handle.get_job("slow_job").await.unwrap().last_run.unwrap();
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("Job was cancelled"));
    }

    #[tokio::test]
    async fn test_shutdown_mid_call_keeps_audit_paired() {
        let controller = slow_controller().await;
        let mut h = create_scheduler_against(&controller.uri());
        h.scheduler
            .register_job(Arc::new(TestJob::new("fetch_job", Behavior::FetchPending)))
            .await;
        let runner = start(h.scheduler).await;

        h.handle.trigger_job("fetch_job", None, None).await.unwrap();
        wait_for_started(&h.audit).await;
        h.shutdown_token.cancel();
        runner.await.unwrap();

        assert_eq!(audit_pairs(&h.audit), (1, 1));
        let closing = h.audit.entries().pop().unwrap();
        assert_eq!(closing["action"], "GET_SCANS_BY_STATUS");
        assert_eq!(closing["status"], "FAILURE");
        assert_eq!(closing["details"], "call cancelled");
    }

    #[tokio::test]
    async fn test_timeout_mid_call_keeps_audit_paired() {
        let controller = slow_controller().await;
        let mut h = create_scheduler_against(&controller.uri());
        let mut job = TestJob::new("fetch_job", Behavior::FetchPending);
        job.max_duration = Some(Duration::from_millis(200));
        h.scheduler.register_job(Arc::new(job)).await;
        let runner = start(h.scheduler).await;

        let correlation_id = h.handle.trigger_job("fetch_job", None, None).await.unwrap();
        let run = wait_until_finished(&h.handle, "fetch_job").await;

        assert_eq!(run.error_message.as_deref(), Some("Job timed out"));
        assert_eq!(audit_pairs(&h.audit), (1, 1));
        let entries = h.audit.entries();
        assert!(entries
            .iter()
            .all(|e| e["correlationId"] == correlation_id.as_str()));

        h.shutdown_token.cancel();
        runner.await.unwrap();
    }
}
