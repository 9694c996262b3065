//! On-demand launch of a single scan cycle.
//!
//! Triggered through `POST /v1/jobs/manual_scan_launch/trigger` with a body
//! of `{"scan_cycle_id": 42}`.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::audit::NOT_APPLICABLE;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

#[derive(Debug, Deserialize)]
struct LaunchParams {
    scan_cycle_id: i64,
}

impl LaunchParams {
    fn parse(params: Option<JsonValue>) -> Result<Self, JobError> {
        let params = params.ok_or_else(|| {
            JobError::InvalidParams("missing body, expected {\"scan_cycle_id\": <id>}".to_string())
        })?;
        serde_json::from_value(params).map_err(|e| JobError::InvalidParams(e.to_string()))
    }
}

/// Launches the scan cycle named in the trigger parameters.
pub struct ManualScanLaunchJob;

#[async_trait]
impl BackgroundJob for ManualScanLaunchJob {
    fn id(&self) -> &'static str {
        "manual_scan_launch"
    }

    fn name(&self) -> &'static str {
        "Manual Scan Launch"
    }

    fn description(&self) -> &'static str {
        "Launches a specific scan cycle on demand"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Manual
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A launch request already sent should get its answer
        ShutdownBehavior::WaitForCompletion
    }

    fn failure_audit_action(&self) -> Option<&'static str> {
        Some("MANUAL_SCAN_LAUNCH")
    }

    fn failure_audit_subject(&self, params: Option<&JsonValue>) -> String {
        params
            .and_then(|p| p.get("scan_cycle_id"))
            .and_then(JsonValue::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_else(|| NOT_APPLICABLE.to_string())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.execute_with_params(ctx, None).await
    }

    async fn execute_with_params(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        let LaunchParams { scan_cycle_id } = LaunchParams::parse(params)?;
        info!("Manual scan launch for scan cycle {}", scan_cycle_id);

        let response = ctx.controller_app.launch_scan_cycle(scan_cycle_id).await?;
        info!("Scan cycle {} launched: {}", scan_cycle_id, response);
        Ok(())
    }
}
