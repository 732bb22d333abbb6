//! Structured audit logging for event-store operations.
//!
//! Emitted via `tracing` on a dedicated target so operators can route audit
//! records separately from ordinary application logs (e.g. a `tracing`
//! subscriber filter on `target=audit`).

/// Audit record outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResult {
    /// The operation completed as requested.
    Success,
    /// The operation was denied or failed.
    Failure,
}

impl AuditResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Emit one audit record.
///
/// `event_id` is empty for operations not tied to a single event (e.g.
/// `dispose`).
pub fn emit(operation: &str, result: AuditResult, stream_id: &str, user_id: Option<&str>, event_id: &str, details: Option<&str>) {
    tracing::info!(
        target: "audit",
        operation,
        result = result.as_str(),
        stream_id,
        user_id = ?user_id,
        event_id,
        details = ?details,
        "event store audit record"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_result_as_str() {
        assert_eq!(AuditResult::Success.as_str(), "success");
        assert_eq!(AuditResult::Failure.as_str(), "failure");
    }
}
