//! Typed access to the controller app's internal API.

mod client;

pub use client::ControllerAppClient;

use crate::error::ClientResult;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Operations offered by the controller app.
///
/// Every method makes exactly one authenticated call and returns the raw
/// response body. Payloads are not interpreted here.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ControllerApp: Send + Sync {
    /// Scans completed between `from_date` and `to_date`.
    async fn get_recently_completed_scans(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        within_days: u32,
        scan_limit: u32,
    ) -> ClientResult<String>;

    async fn get_active_scan_cycle_by_id(&self, scan_cycle_id: i64) -> ClientResult<String>;

    async fn get_scan_cycle_by_id(&self, scan_cycle_id: i64) -> ClientResult<String>;

    async fn get_scan_cycle_by_data_target_name(&self, name: &str) -> ClientResult<String>;

    /// Scans currently in `status` (e.g. `PENDING`, `ACTIVE`).
    async fn get_scans_by_status(&self, status: &str) -> ClientResult<String>;

    /// Ask the controller app to launch a scan cycle.
    async fn launch_scan_cycle(&self, scan_cycle_id: i64) -> ClientResult<String>;
}
