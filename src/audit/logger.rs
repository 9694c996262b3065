//! Structured audit trail for outbound calls.

use std::sync::Arc;

use tracing::warn;

use super::entry::{AuditEntry, AuditStatus};
use super::sink::{AuditSink, AuditSinkError};
use crate::correlation;

/// Emits start/success/failure entries tagged with the active correlation id.
///
/// Auditing is best effort: serialization and sink failures are logged and
/// never reach the audited call.
#[derive(Clone)]
pub struct ServiceAuditLogger {
    service_name: String,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl ServiceAuditLogger {
    /// Create a logger with no sinks. Add destinations with [`Self::with_sink`].
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Log a call about to be made.
    pub fn log_start(&self, action: &str, subject: &str) {
        self.emit(AuditEntry::new(
            &self.service_name,
            action,
            subject,
            AuditStatus::Started,
        ));
    }

    /// Log a call that completed successfully.
    pub fn log_success(&self, action: &str, subject: &str, details: Option<&str>) {
        self.emit(
            AuditEntry::new(&self.service_name, action, subject, AuditStatus::Success)
                .with_details(details),
        );
    }

    /// Log a call that failed.
    pub fn log_failure(&self, action: &str, subject: &str, error_message: &str) {
        self.emit(
            AuditEntry::new(&self.service_name, action, subject, AuditStatus::Failure)
                .with_details(Some(error_message)),
        );
    }

    fn emit(&self, entry: AuditEntry) {
        let entry =
            entry.with_correlation_id(correlation::current().map(|id| id.as_str().to_string()));

        let line = match entry.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                let err = AuditSinkError::from(e);
                warn!(
                    "Dropped audit entry {} {} for {}: {}",
                    entry.action(),
                    entry.status(),
                    entry.subject(),
                    err
                );
                return;
            }
        };

        for sink in &self.sinks {
            if let Err(e) = sink.append(&line) {
                warn!(
                    "Failed to append audit entry {} {} for {}: {}",
                    entry.action(),
                    entry.status(),
                    entry.subject(),
                    e
                );
            }
        }
    }
}
