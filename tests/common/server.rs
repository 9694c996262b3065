//! Test server lifecycle management
//!
//! Each test gets an isolated scheduler with its own mock identity provider
//! and mock controller app. The controller app mock starts empty; tests mount
//! the routes they expect to be called.

use super::constants::*;
use scan_scheduler::audit::{MemoryAuditSink, ServiceAuditLogger};
use scan_scheduler::background_jobs::jobs::{ManualScanLaunchJob, ScheduledScanLauncherJob};
use scan_scheduler::background_jobs::{create_scheduler, JobContext};
use scan_scheduler::config::OAuthSettings;
use scan_scheduler::controller_app::ControllerAppClient;
use scan_scheduler::outbound::{controller_http_client, AuthenticatedClient};
use scan_scheduler::server::{make_app, ServerConfig, ServerState};
use scan_scheduler::token::{token_http_client, ServiceTokenProvider};
use scan_scheduler::RequestsLoggingLevel;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test server instance wired to mock upstreams
///
/// When dropped, the HTTP server and the scheduler shut down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Mock identity provider serving the token endpoint
    pub idp: MockServer,

    /// Mock controller app
    pub controller: MockServer,

    /// Every audit line written by the scheduler
    pub audit: MemoryAuditSink,

    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a server whose identity provider issues `ACCESS_TOKEN`.
    pub async fn spawn() -> Self {
        Self::spawn_with_token_response(
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": ACCESS_TOKEN,
                "token_type": "Bearer",
                "expires_in": 3600,
            })),
        )
        .await
    }

    /// Spawns a server whose token endpoint answers with `token_response`.
    ///
    /// # Panics
    ///
    /// Panics if any part of the wiring fails or the server doesn't become
    /// ready within `SERVER_READY_TIMEOUT_MS`.
    pub async fn spawn_with_token_response(token_response: ResponseTemplate) -> Self {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(token_response)
            .mount(&idp)
            .await;
        let controller = MockServer::start().await;

        let token_uri = format!("{}{}", idp.uri(), TOKEN_PATH);
        let oauth = OAuthSettings {
            issuer_url: idp.uri(),
            token_uri,
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            scope: SCOPE.to_string(),
            refresh_margin: Duration::from_secs(60),
            default_token_lifetime: Duration::from_secs(300),
        };
        let timeout = Duration::from_secs(REQUEST_TIMEOUT_SECS);
        let tokens = Arc::new(ServiceTokenProvider::new(
            oauth,
            token_http_client(timeout, timeout).expect("Failed to build token client"),
        ));
        let transport =
            controller_http_client(timeout, timeout).expect("Failed to build controller client");

        let audit = MemoryAuditSink::new();
        let audit_logger =
            ServiceAuditLogger::new(SERVICE_NAME).with_sink(Arc::new(audit.clone()));
        let controller_app = Arc::new(
            ControllerAppClient::new(
                &controller.uri(),
                AuthenticatedClient::new(tokens, Arc::new(transport)),
                audit_logger.clone(),
            )
            .expect("Failed to build controller app client"),
        );

        let shutdown = CancellationToken::new();
        let ctx = JobContext::new(shutdown.child_token(), controller_app, audit_logger);
        let (mut scheduler, scheduler_handle) = create_scheduler(shutdown.clone(), ctx);
        scheduler
            .register_job(Arc::new(ScheduledScanLauncherJob::new()))
            .await;
        scheduler.register_job(Arc::new(ManualScanLaunchJob)).await;
        tokio::spawn(async move { scheduler.run().await });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let app = make_app(ServerState::new(config, scheduler_handle, "e2e".to_string()));
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server error");
        });

        let server = Self {
            base_url,
            idp,
            controller,
            audit,
            shutdown,
        };
        server.wait_for_ready().await;
        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::new();
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Audit entries recorded for `action`, oldest first.
    pub fn audit_entries(&self, action: &str) -> Vec<Value> {
        self.audit
            .entries()
            .into_iter()
            .filter(|e| e["action"] == action)
            .collect()
    }

    /// Waits until an entry with `action` and `status` has been written.
    ///
    /// # Panics
    ///
    /// Panics after `JOB_SETTLE_TIMEOUT_MS` without a matching entry.
    pub async fn wait_for_audit(&self, action: &str, status: &str) -> Value {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(JOB_SETTLE_TIMEOUT_MS);

        loop {
            if let Some(entry) = self
                .audit_entries(action)
                .into_iter()
                .find(|e| e["status"] == status)
            {
                return entry;
            }
            if start.elapsed() > timeout {
                panic!(
                    "No {} audit entry for {} within {}ms, got: {:?}",
                    status,
                    action,
                    JOB_SETTLE_TIMEOUT_MS,
                    self.audit.lines()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
