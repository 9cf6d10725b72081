//! Diagnostic error ledger.
//!
//! Bounded in-memory record of findings. Records are append-only apart
//! from resolution, which is idempotent: resolving a resolved record is
//! a no-op, not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// What part of the system a finding concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hardware,
    Network,
    Software,
    Configuration,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Network => "network",
            Self::Software => "software",
            Self::Configuration => "configuration",
        }
    }
}

/// One diagnostic finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticError {
    pub id: String,
    pub severity: Severity,
    pub category: Category,
    /// Check id or component that produced the finding.
    pub source: String,
    /// Stable machine-readable failure code ("TIMEOUT", "CHECK_FAILED",
    /// ...). Callers match on this, not on the message text.
    pub code: String,
    pub message: String,
    /// Optional structured context for the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub suggested_actions: Vec<String>,
    /// Unix millis.
    pub timestamp: i64,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
}

impl DiagnosticError {
    pub fn new(
        severity: Severity,
        category: Category,
        source: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        suggested_actions: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            category,
            source: source.into(),
            code: code.into(),
            message: message.into(),
            details: None,
            suggested_actions,
            timestamp: chrono::Utc::now().timestamp_millis(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Filter for ledger queries. Default matches everything.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub source: Option<String>,
    pub code: Option<String>,
    pub unresolved_only: bool,
    pub limit: Option<usize>,
}

impl ErrorFilter {
    pub fn unresolved() -> Self {
        Self {
            unresolved_only: true,
            ..Default::default()
        }
    }

    fn matches(&self, record: &DiagnosticError) -> bool {
        if self.unresolved_only && record.resolved {
            return false;
        }
        if let Some(severity) = self.severity {
            if record.severity != severity {
                return false;
            }
        }
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &record.source != source {
                return false;
            }
        }
        if let Some(code) = &self.code {
            if &record.code != code {
                return false;
            }
        }
        true
    }
}

const DEFAULT_CAPACITY: usize = 500;

/// Bounded finding store.
pub struct ErrorLedger {
    entries: parking_lot::RwLock<VecDeque<DiagnosticError>>,
    capacity: usize,
}

impl Default for ErrorLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: parking_lot::RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a finding. Returns `false` (and drops the record) when an
    /// unresolved record with the same source and message already
    /// exists, so a flapping check doesn't flood the ledger.
    pub fn insert(&self, record: DiagnosticError) -> bool {
        let mut entries = self.entries.write();
        let duplicate = entries
            .iter()
            .any(|e| !e.resolved && e.source == record.source && e.message == record.message);
        if duplicate {
            return false;
        }
        entries.push_back(record);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        true
    }

    /// Mark a record resolved. Idempotent: an already-resolved record is
    /// returned unchanged. `None` if the id is unknown.
    pub fn resolve_error(
        &self,
        error_id: &str,
        resolved_by: impl Into<String>,
    ) -> Option<DiagnosticError> {
        let mut entries = self.entries.write();
        let record = entries.iter_mut().find(|e| e.id == error_id)?;
        if !record.resolved {
            record.resolved = true;
            record.resolved_at = Some(chrono::Utc::now().timestamp_millis());
            record.resolved_by = Some(resolved_by.into());
        }
        Some(record.clone())
    }

    pub fn get(&self, error_id: &str) -> Option<DiagnosticError> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id == error_id)
            .cloned()
    }

    /// Matching records, newest first.
    pub fn errors(&self, filter: &ErrorFilter) -> Vec<DiagnosticError> {
        let entries = self.entries.read();
        let mut matched: Vec<DiagnosticError> = entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.read().iter().filter(|e| !e.resolved).count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(source: &str, message: &str, severity: Severity) -> DiagnosticError {
        DiagnosticError::new(
            severity,
            Category::Network,
            source,
            "CHECK_FAILED",
            message,
            vec![],
        )
    }

    #[test]
    fn test_insert_and_query() {
        let ledger = ErrorLedger::new();
        assert!(ledger.insert(finding("mqtt", "broker unreachable", Severity::High)));
        assert!(ledger.insert(finding("mesh", "bridge closed", Severity::High)));

        let all = ledger.errors(&ErrorFilter::default());
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].source, "mesh");

        let mqtt_only = ledger.errors(&ErrorFilter {
            source: Some("mqtt".to_string()),
            ..Default::default()
        });
        assert_eq!(mqtt_only.len(), 1);
    }

    #[test]
    fn test_code_and_details_carried() {
        let ledger = ErrorLedger::new();
        let record = DiagnosticError::new(
            Severity::High,
            Category::Network,
            "adapter_connectivity",
            "TIMEOUT",
            "check 'adapter_connectivity' exceeded its timeout",
            vec![],
        )
        .with_details(serde_json::json!({ "timeout_ms": 5000 }));
        ledger.insert(record);
        ledger.insert(finding("mqtt", "broker unreachable", Severity::High));

        let timeouts = ledger.errors(&ErrorFilter {
            code: Some("TIMEOUT".to_string()),
            ..Default::default()
        });
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].details, Some(serde_json::json!({ "timeout_ms": 5000 })));
    }

    #[test]
    fn test_duplicate_unresolved_suppressed() {
        let ledger = ErrorLedger::new();
        assert!(ledger.insert(finding("mqtt", "broker unreachable", Severity::High)));
        assert!(!ledger.insert(finding("mqtt", "broker unreachable", Severity::High)));
        assert_eq!(ledger.len(), 1);

        // Once resolved, the same finding may recur.
        let id = ledger.errors(&ErrorFilter::default())[0].id.clone();
        ledger.resolve_error(&id, "operator");
        assert!(ledger.insert(finding("mqtt", "broker unreachable", Severity::High)));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let ledger = ErrorLedger::new();
        ledger.insert(finding("mqtt", "broker unreachable", Severity::High));
        let id = ledger.errors(&ErrorFilter::default())[0].id.clone();

        let first = ledger.resolve_error(&id, "operator").unwrap();
        assert!(first.resolved);
        assert_eq!(first.resolved_by.as_deref(), Some("operator"));

        let second = ledger.resolve_error(&id, "someone-else").unwrap();
        assert_eq!(second.resolved_by.as_deref(), Some("operator"));
        assert_eq!(second.resolved_at, first.resolved_at);

        assert!(ledger.resolve_error("unknown-id", "x").is_none());
    }

    #[test]
    fn test_capacity_bound_drops_oldest() {
        let ledger = ErrorLedger::with_capacity(3);
        for i in 0..5 {
            ledger.insert(finding("src", &format!("finding {}", i), Severity::Low));
        }
        assert_eq!(ledger.len(), 3);
        let all = ledger.errors(&ErrorFilter::default());
        assert_eq!(all[2].message, "finding 2");
    }

    #[test]
    fn test_unresolved_filter() {
        let ledger = ErrorLedger::new();
        ledger.insert(finding("a", "one", Severity::Low));
        ledger.insert(finding("b", "two", Severity::Critical));
        let id = ledger.errors(&ErrorFilter::default())[1].id.clone();
        ledger.resolve_error(&id, "operator");

        assert_eq!(ledger.unresolved_count(), 1);
        let unresolved = ledger.errors(&ErrorFilter::unresolved());
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].source, "b");
    }
}
