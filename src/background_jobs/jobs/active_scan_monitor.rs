use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::config::ActiveScanMonitorJobSettings;
use async_trait::async_trait;
use tracing::debug;

const ACTIVE_STATUS: &str = "ACTIVE";

/// Polls the controller app for active scans.
///
/// Failures are logged by the scheduler only; this job has no job-level
/// audit entry.
pub struct ActiveScanCycleMonitorJob {
    cron: String,
}

impl ActiveScanCycleMonitorJob {
    pub fn new() -> Self {
        Self::from_settings(&ActiveScanMonitorJobSettings::default())
    }

    pub fn from_settings(settings: &ActiveScanMonitorJobSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
        }
    }
}

impl Default for ActiveScanCycleMonitorJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundJob for ActiveScanCycleMonitorJob {
    fn id(&self) -> &'static str {
        "active_scan_cycle_monitor"
    }

    fn name(&self) -> &'static str {
        "Active Scan Cycle Monitor"
    }

    fn description(&self) -> &'static str {
        "Monitors scans currently active in the controller app"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        debug!("Monitoring active scan cycles");

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let active = ctx.controller_app.get_scans_by_status(ACTIVE_STATUS).await?;
        debug!("Active scans: {}", active);
        Ok(())
    }
}
