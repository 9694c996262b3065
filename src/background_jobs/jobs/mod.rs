//! Specific background job implementations.
//!
//! Each job drives one or more controller app calls. Call-level auditing
//! happens in the client; jobs only report their overall outcome.

pub mod active_scan_monitor;
pub mod daily_scan_cycle;
pub mod manual_scan_launch;
pub mod scan_launcher;

pub use active_scan_monitor::ActiveScanCycleMonitorJob;
pub use daily_scan_cycle::DailyScanCycleLauncherJob;
pub use manual_scan_launch::ManualScanLaunchJob;
pub use scan_launcher::ScheduledScanLauncherJob;
