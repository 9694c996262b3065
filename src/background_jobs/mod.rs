//! Background job scheduling and execution system.
//!
//! Jobs run on cron schedules, on startup hooks, or on demand through the
//! HTTP API. Every run gets its own correlation scope, and a failing run is
//! logged and recorded without affecting the scheduler or other jobs.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobRunStatus, JobScheduleInfo, SchedulerHandle};
pub use job::{next_cron_run, BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
