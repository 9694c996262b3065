use crate::audit::ServiceAuditLogger;
use crate::controller_app::ControllerApp;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a job run may touch.
///
/// Cloned once per run; each run gets its own child cancellation token.
#[derive(Clone)]
pub struct JobContext {
    pub cancellation_token: CancellationToken,

    /// Authenticated, audited client for the controller app.
    pub controller_app: Arc<dyn ControllerApp>,

    /// Used by the scheduler for job-level failure entries.
    pub audit: ServiceAuditLogger,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        controller_app: Arc<dyn ControllerApp>,
        audit: ServiceAuditLogger,
    ) -> Self {
        Self {
            cancellation_token,
            controller_app,
            audit,
        }
    }

    /// Context for a single run, sharing the client and audit trail.
    pub fn with_cancellation_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// True once shutdown or a per-run cancel was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
