//! Scan Scheduler Library
//!
//! Runs scheduled jobs against the controller app's internal API,
//! authenticating as a service identity through the OAuth2 client
//! credentials flow. Exposed as a library for testing.

pub mod audit;
pub mod background_jobs;
pub mod config;
pub mod controller_app;
pub mod correlation;
pub mod error;
pub mod outbound;
pub mod server;
pub mod token;

// Re-export commonly used types for convenience
pub use audit::ServiceAuditLogger;
pub use controller_app::{ControllerApp, ControllerAppClient};
pub use error::{AuthUnavailable, ClientError, ClientResult};
pub use outbound::AuthenticatedClient;
pub use server::{run_metrics_server, run_server, RequestsLoggingLevel};
pub use token::{Credential, ServiceTokenProvider, TokenProvider};
