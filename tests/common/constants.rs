//! Shared constants for end-to-end tests

// ============================================================================
// Service Identity
// ============================================================================

/// Client id the scheduler authenticates as
pub const CLIENT_ID: &str = "schedulerapp-service";

/// Client secret registered for `CLIENT_ID`
pub const CLIENT_SECRET: &str = "s3cret";

/// Scope requested with every token
pub const SCOPE: &str = "controllerapp.internal";

/// Path of the mock token endpoint
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Access token issued by the mock identity provider
pub const ACCESS_TOKEN: &str = "e2e-access-token";

/// Service name stamped on audit entries
pub const SERVICE_NAME: &str = "schedulerapp-service";

// ============================================================================
// Jobs
// ============================================================================

pub const MANUAL_JOB_ID: &str = "manual_scan_launch";
pub const SCAN_LAUNCHER_JOB_ID: &str = "scheduled_scan_launcher";

/// Scan cycle id used by manual launch tests
pub const SCAN_CYCLE_ID: i64 = 42;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a triggered job to leave a trace (milliseconds)
pub const JOB_SETTLE_TIMEOUT_MS: u64 = 5000;

/// Request timeout for the test HTTP client (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
