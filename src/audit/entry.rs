use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Subject used when an action has no single target resource.
pub const NOT_APPLICABLE: &str = "N/A";

/// Phase of an audited call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Started,
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Started => "STARTED",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the service audit trail.
///
/// Serialized as a single JSON object. `details` is omitted when empty and
/// `correlationId` is `null` when the call ran outside a correlation scope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    service: String,
    action: String,
    #[serde(rename = "scanId")]
    subject: String,
    status: AuditStatus,
    timestamp: String,
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AuditEntry {
    pub fn new(service: &str, action: &str, subject: &str, status: AuditStatus) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
            subject: subject.to_string(),
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            correlation_id: None,
            details: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_details(mut self, details: Option<&str>) -> Self {
        self.details = details.map(str::to_string);
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn status(&self) -> AuditStatus {
        self.status
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
