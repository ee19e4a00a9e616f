/// Structured audit events for execution requests
///
/// Every event is serialized to one JSON object and emitted through `log`
/// under the `tutorbox::audit` target, so the embedding process decides
/// where audit records go. Source text never appears in an event; requests
/// are identified by a SHA-256 digest of the source.
use crate::config::types::{ErrorKind, Target};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Log target of every audit record.
pub const AUDIT_TARGET: &str = "tutorbox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    ExecutionStart,
    ExecutionEnd,
    DenylistRejection,
    TimeoutKill,
    CleanupFailure,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionStart | AuditEventType::ExecutionEnd => AuditSeverity::Low,
            AuditEventType::TimeoutKill => AuditSeverity::Medium,
            AuditEventType::DenylistRejection => AuditSeverity::High,
            AuditEventType::CleanupFailure => AuditSeverity::Critical,
        }
    }
}

/// Identifiers tying the events of one request together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub request_id: String,
    /// Opaque caller identity supplied with the request
    pub caller: Option<String>,
    /// Hex SHA-256 of the submitted source
    pub source_digest: String,
}

impl CorrelationIds {
    pub fn new(source: &str, caller: Option<&str>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller: caller.map(str::to_string),
            source_digest: source_digest(source),
        }
    }
}

/// Hex SHA-256 of `source`.
pub fn source_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub target: Option<Target>,
    pub error_kind: Option<ErrorKind>,
    /// Workspace involved in a cleanup event
    pub run_id: Option<String>,
    pub elapsed_ms: Option<u64>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation: None,
            target: None,
            error_kind: None,
            run_id: None,
            elapsed_ms: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// One-line JSON record.
    pub fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });
        if let Some(correlation) = &self.correlation {
            entry["correlation"] = serde_json::json!({
                "request_id": correlation.request_id,
                "caller": correlation.caller,
                "source_digest": correlation.source_digest,
            });
        }
        if let Some(target) = self.target {
            entry["target"] = serde_json::json!(target);
        }
        if let Some(kind) = self.error_kind {
            entry["error_kind"] = serde_json::json!(kind);
        }
        if let Some(run_id) = &self.run_id {
            entry["run_id"] = serde_json::json!(run_id);
        }
        if let Some(elapsed_ms) = self.elapsed_ms {
            entry["elapsed_ms"] = serde_json::json!(elapsed_ms);
        }
        entry
    }
}

/// Emit `event` at the log level matching its severity.
pub fn log_audit_event(event: AuditEvent) {
    let record = event.to_json();
    match event.severity {
        AuditSeverity::Critical | AuditSeverity::High => error!(target: AUDIT_TARGET, "{}", record),
        AuditSeverity::Medium => warn!(target: AUDIT_TARGET, "{}", record),
        AuditSeverity::Low => info!(target: AUDIT_TARGET, "{}", record),
    }
}

pub fn execution_start(correlation: &CorrelationIds, target: Target, source_bytes: usize) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::ExecutionStart,
            format!("{} bytes submitted", source_bytes),
        )
        .with_correlation(correlation)
        .with_target(target),
    );
}

pub fn execution_end(
    correlation: &CorrelationIds,
    target: Target,
    error_kind: Option<ErrorKind>,
    elapsed_ms: u64,
) {
    let details = match error_kind {
        None => "succeeded".to_string(),
        Some(kind) => format!("failed with {}", kind),
    };
    let mut event = AuditEvent::new(AuditEventType::ExecutionEnd, details)
        .with_correlation(correlation)
        .with_target(target)
        .with_elapsed_ms(elapsed_ms);
    if let Some(kind) = error_kind {
        event = event.with_error_kind(kind);
    }
    log_audit_event(event);
}

pub fn denylist_rejection(correlation: &CorrelationIds, target: Target, token: &str) {
    log_audit_event(
        AuditEvent::new(
            AuditEventType::DenylistRejection,
            format!("source rejected on token '{}'", token),
        )
        .with_correlation(correlation)
        .with_target(target)
        .with_error_kind(ErrorKind::DisallowedConstruct),
    );
}

pub fn timeout_kill(correlation: &CorrelationIds, target: Target, details: String) {
    log_audit_event(
        AuditEvent::new(AuditEventType::TimeoutKill, details)
            .with_correlation(correlation)
            .with_target(target)
            .with_error_kind(ErrorKind::Timeout),
    );
}

/// A workspace could not be removed; it stays on disk until swept.
pub fn cleanup_failure(run_id: &str, error: String) {
    log_audit_event(AuditEvent::new(AuditEventType::CleanupFailure, error).with_run_id(run_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            source_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn correlation_ids_are_unique_per_request() {
        let a = CorrelationIds::new("print(1)", Some("alice"));
        let b = CorrelationIds::new("print(1)", None);
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.source_digest, b.source_digest);
        assert_eq!(a.caller.as_deref(), Some("alice"));
    }

    #[test]
    fn event_severity_follows_type() {
        assert_eq!(
            AuditEventType::CleanupFailure.default_severity(),
            AuditSeverity::Critical
        );
        assert_eq!(
            AuditEventType::ExecutionStart.default_severity(),
            AuditSeverity::Low
        );
        let event = AuditEvent::new(AuditEventType::TimeoutKill, "x")
            .with_severity(AuditSeverity::High);
        assert_eq!(event.severity, AuditSeverity::High);
    }

    #[test]
    fn json_record_carries_correlation_but_not_source() {
        let correlation = CorrelationIds::new("secret_code = 1", Some("bob"));
        let event = AuditEvent::new(AuditEventType::DenylistRejection, "blocked")
            .with_correlation(&correlation)
            .with_target(Target::Traced)
            .with_error_kind(ErrorKind::DisallowedConstruct);
        let json = event.to_json();
        assert_eq!(json["event_type"], "DenylistRejection");
        assert_eq!(json["target"], "traced");
        assert_eq!(json["error_kind"], "DisallowedConstruct");
        assert_eq!(json["correlation"]["caller"], "bob");
        assert!(!json.to_string().contains("secret_code"));
    }
}
