//! Service audit trail.
//!
//! Every call to the controller app is recorded as a `STARTED` entry followed
//! by exactly one `SUCCESS` or `FAILURE` entry, one JSON object per line.

mod entry;
mod logger;
mod sink;

pub use entry::{AuditEntry, AuditStatus, NOT_APPLICABLE};
pub use logger::ServiceAuditLogger;
pub use sink::{
    AuditSink, AuditSinkError, FileAuditSink, MemoryAuditSink, TracingAuditSink, AUDIT_TARGET,
};
