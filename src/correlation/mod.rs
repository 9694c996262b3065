//! Correlation identifiers scoped to one unit of work.
//!
//! A unit of work (a scheduled job run or an inbound request) runs inside a
//! [`CorrelationScope`]. The identifier lives in task-local storage for the
//! duration of that future only, so concurrently running tasks never see
//! each other's identifiers and nothing is left behind once the work ends.

use reqwest::header::HeaderName;
use std::future::Future;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id on inbound and outbound requests.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

tokio::task_local! {
    static CURRENT: CorrelationId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A new random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse a caller supplied identifier. Blank values are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The correlation id of the unit of work running on the current task.
///
/// Returns `None` outside any scope.
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(|id| id.clone()).ok()
}

/// Open a scope for a new unit of work, reusing `existing` when it is not
/// blank.
pub fn begin(existing: Option<&str>) -> CorrelationScope {
    let id = existing
        .and_then(CorrelationId::parse)
        .unwrap_or_else(CorrelationId::generate);
    CorrelationScope { id }
}

/// A correlation id waiting to be bound to a unit of work.
#[derive(Debug, Clone)]
pub struct CorrelationScope {
    id: CorrelationId,
}

impl CorrelationScope {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Run `work` with this scope active.
    ///
    /// The id is visible through [`current`] only while `work` is being
    /// polled, and log events emitted from it carry a `correlation_id` field.
    pub async fn run<F>(self, work: F) -> F::Output
    where
        F: Future,
    {
        let span = tracing::info_span!("unit_of_work", correlation_id = %self.id);
        CURRENT.scope(self.id, work.instrument(span)).await
    }
}
