//! HTTP client for the controller app's internal endpoints.
//!
//! Each method records one `STARTED` and one terminal audit entry and sends
//! exactly one request through the [`AuthenticatedClient`].

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Body, Method, Request, StatusCode, Url};
use tracing::{debug, warn};

use super::ControllerApp;
use crate::audit::{ServiceAuditLogger, NOT_APPLICABLE};
use crate::error::{ClientError, ClientResult};
use crate::outbound::AuthenticatedClient;
use crate::server::metrics;

const LAUNCH_DETAILS: &str = "Scan launched via scheduler";
const CANCELLED_DETAILS: &str = "call cancelled";

/// One audited call to the controller app.
struct Operation<'a> {
    action: &'static str,
    subject: &'a str,
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    success_message: Option<&'static str>,
}

impl<'a> Operation<'a> {
    fn get(action: &'static str, subject: &'a str, path: String) -> Self {
        Self {
            action,
            subject,
            method: Method::GET,
            path,
            query: Vec::new(),
            success_message: None,
        }
    }

    fn post(action: &'static str, subject: &'a str, path: String) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(action, subject, path)
        }
    }

    fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    fn success_message(mut self, message: &'static str) -> Self {
        self.success_message = Some(message);
        self
    }
}

/// Closes the audit pair of a call whose future is dropped mid-flight.
struct PendingCall<'a> {
    audit: &'a ServiceAuditLogger,
    action: &'static str,
    subject: &'a str,
    started: Instant,
    armed: bool,
}

impl<'a> PendingCall<'a> {
    fn start(audit: &'a ServiceAuditLogger, action: &'static str, subject: &'a str) -> Self {
        audit.log_start(action, subject);
        Self {
            audit,
            action,
            subject,
            started: Instant::now(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("{} {} cancelled before completion", self.action, self.subject);
            metrics::record_downstream_request(self.action, "cancelled", self.started.elapsed());
            self.audit
                .log_failure(self.action, self.subject, CANCELLED_DETAILS);
        }
    }
}

/// Client for the controller app.
#[derive(Clone)]
pub struct ControllerAppClient {
    base_url: String,
    http: AuthenticatedClient,
    audit: ServiceAuditLogger,
}

impl ControllerAppClient {
    /// Create a new ControllerAppClient.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the controller app (e.g., "http://controller:8080")
    /// * `http` - Authenticated transport all requests go through
    /// * `audit` - Audit trail for every call
    pub fn new(base_url: &str, http: AuthenticatedClient, audit: ServiceAuditLogger) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .with_context(|| format!("Invalid controller app base url: {}", base_url))?;

        Ok(Self {
            base_url,
            http,
            audit,
        })
    }

    /// Get the base URL of the controller app.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&'static str, String)]) -> ClientResult<Url> {
        let url = format!("{}{}", self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&url)
        } else {
            Url::parse_with_params(&url, query)
        };
        parsed.map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))
    }

    async fn call(&self, op: Operation<'_>) -> ClientResult<String> {
        let mut pending = PendingCall::start(&self.audit, op.action, op.subject);
        let result = self.dispatch(&op).await;
        let elapsed = pending.started.elapsed();
        pending.disarm();

        match result {
            Ok((status, body)) => {
                metrics::record_downstream_request(op.action, "success", elapsed);
                debug!(
                    "{} {} -> {} in {}ms",
                    op.action,
                    op.subject,
                    status,
                    elapsed.as_millis()
                );
                let details = match op.success_message {
                    Some(message) => format!("{} (HTTP {})", message, status.as_u16()),
                    None => format!("HTTP {}, {} bytes", status.as_u16(), body.len()),
                };
                self.audit
                    .log_success(op.action, op.subject, Some(details.as_str()));
                Ok(body)
            }
            Err(err) => {
                metrics::record_downstream_request(op.action, err.kind(), elapsed);
                warn!(
                    "{} {} failed after {}ms: {}",
                    op.action,
                    op.subject,
                    elapsed.as_millis(),
                    err
                );
                self.audit
                    .log_failure(op.action, op.subject, &err.to_string());
                Err(err)
            }
        }
    }

    async fn dispatch(&self, op: &Operation<'_>) -> ClientResult<(StatusCode, String)> {
        let url = self.url(&op.path, &op.query)?;
        let mut request = Request::new(op.method.clone(), url);
        if op.method == Method::POST {
            *request.body_mut() = Some(Body::from(Vec::new()));
        }

        let response = self.http.send(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Downstream { status, body });
        }
        Ok((status, body))
    }
}

#[async_trait]
impl ControllerApp for ControllerAppClient {
    async fn get_recently_completed_scans(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        within_days: u32,
        scan_limit: u32,
    ) -> ClientResult<String> {
        let op = Operation::get(
            "GET_RECENTLY_COMPLETED_SCANS",
            NOT_APPLICABLE,
            "/controller/internal/scans/recently-completed".to_string(),
        )
        .query("withinDays", within_days)
        .query("scanLimit", scan_limit)
        .query("fromDate", from_date.format("%Y-%m-%d"))
        .query("toDate", to_date.format("%Y-%m-%d"));
        self.call(op).await
    }

    async fn get_active_scan_cycle_by_id(&self, scan_cycle_id: i64) -> ClientResult<String> {
        let subject = scan_cycle_id.to_string();
        let op = Operation::get(
            "GET_ACTIVE_SCAN_CYCLE",
            &subject,
            format!("/controller/internal/scan-cycles/active/{}", scan_cycle_id),
        );
        self.call(op).await
    }

    async fn get_scan_cycle_by_id(&self, scan_cycle_id: i64) -> ClientResult<String> {
        let subject = scan_cycle_id.to_string();
        let op = Operation::get(
            "GET_SCAN_CYCLE",
            &subject,
            format!("/controller/internal/scan-cycles/{}", scan_cycle_id),
        );
        self.call(op).await
    }

    async fn get_scan_cycle_by_data_target_name(&self, name: &str) -> ClientResult<String> {
        let op = Operation::get(
            "GET_SCAN_CYCLE_BY_NAME",
            name,
            format!(
                "/controller/internal/scan-cycles/data-target/{}",
                urlencoding::encode(name)
            ),
        );
        self.call(op).await
    }

    async fn get_scans_by_status(&self, status: &str) -> ClientResult<String> {
        let op = Operation::get(
            "GET_SCANS_BY_STATUS",
            status,
            "/controller/internal/scans/status".to_string(),
        )
        .query("status", status);
        self.call(op).await
    }

    async fn launch_scan_cycle(&self, scan_cycle_id: i64) -> ClientResult<String> {
        let subject = scan_cycle_id.to_string();
        let op = Operation::post(
            "LAUNCH_SCAN",
            &subject,
            format!("/controller/internal/scheduler/launch-scan/{}", scan_cycle_id),
        )
        .success_message(LAUNCH_DETAILS);
        self.call(op).await
    }
}
