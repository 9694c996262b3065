//! Daily review of recently completed scans.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::config::DailyScanCycleJobSettings;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info};

/// Background job that fetches scans completed over the last few days.
pub struct DailyScanCycleLauncherJob {
    cron: String,
    /// Size of the lookback window in days
    within_days: u32,
    /// Maximum number of scans requested
    scan_limit: u32,
}

impl DailyScanCycleLauncherJob {
    pub fn new() -> Self {
        Self::from_settings(&DailyScanCycleJobSettings::default())
    }

    pub fn from_settings(settings: &DailyScanCycleJobSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            within_days: settings.within_days,
            scan_limit: settings.scan_limit,
        }
    }

    /// `(from, to)` dates of the window ending on `today`.
    fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = today
            .checked_sub_days(Days::new(u64::from(self.within_days)))
            .unwrap_or(NaiveDate::MIN);
        (from, today)
    }
}

impl Default for DailyScanCycleLauncherJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundJob for DailyScanCycleLauncherJob {
    fn id(&self) -> &'static str {
        "daily_scan_cycle_launcher"
    }

    fn name(&self) -> &'static str {
        "Daily Scan Cycle Launcher"
    }

    fn description(&self) -> &'static str {
        "Retrieves scans completed within the configured lookback window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    fn failure_audit_action(&self) -> Option<&'static str> {
        Some("DAILY_SCAN_LAUNCHER")
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let (from_date, to_date) = self.window(Utc::now().date_naive());
        info!(
            "Daily scan cycle launcher started, window {} to {}",
            from_date, to_date
        );

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let recent = ctx
            .controller_app
            .get_recently_completed_scans(from_date, to_date, self.within_days, self.scan_limit)
            .await?;
        info!("Retrieved recently completed scans ({} bytes)", recent.len());
        debug!("Recently completed scans: {}", recent);

        info!("Daily scan cycle launcher completed");
        Ok(())
    }
}
