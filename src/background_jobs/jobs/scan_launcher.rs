//! Hourly check for scans waiting to be launched.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::config::ScanLauncherJobSettings;
use async_trait::async_trait;
use tracing::{debug, info};

/// Scan status the launcher looks for.
const PENDING_STATUS: &str = "PENDING";

/// Background job that fetches pending scans from the controller app.
pub struct ScheduledScanLauncherJob {
    cron: String,
}

impl ScheduledScanLauncherJob {
    pub fn new() -> Self {
        Self::from_settings(&ScanLauncherJobSettings::default())
    }

    pub fn from_settings(settings: &ScanLauncherJobSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
        }
    }
}

impl Default for ScheduledScanLauncherJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundJob for ScheduledScanLauncherJob {
    fn id(&self) -> &'static str {
        "scheduled_scan_launcher"
    }

    fn name(&self) -> &'static str {
        "Scheduled Scan Launcher"
    }

    fn description(&self) -> &'static str {
        "Retrieves pending scans from the controller app"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    fn failure_audit_action(&self) -> Option<&'static str> {
        Some("SCHEDULED_SCAN_LAUNCHER")
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        info!("Scheduled scan launcher started");

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let pending = ctx
            .controller_app
            .get_scans_by_status(PENDING_STATUS)
            .await?;
        info!("Retrieved pending scans ({} bytes)", pending.len());
        debug!("Pending scans: {}", pending);

        info!("Scheduled scan launcher completed");
        Ok(())
    }
}
