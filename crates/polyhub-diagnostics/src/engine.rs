//! Diagnostic engine.
//!
//! Schedules registered checks on per-check intervals, races each run
//! against its timeout, converts failures into ledger records plus bus
//! events, and rolls unresolved records up into a system health verdict.
//! Check failures never propagate to the scheduler.

use crate::checks::{CheckDescriptor, CheckOutcome, DiagnosticCheck, FindingLevel};
use crate::ledger::{Category, DiagnosticError, ErrorFilter, ErrorLedger, Severity};
use polyhub_core::error::{Error, Result};
use polyhub_core::event::GatewayEvent;
use polyhub_core::eventbus::SharedEventBus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregate health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

/// `system_health()` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub level: HealthLevel,
    pub unresolved: usize,
    pub critical: usize,
    pub high: usize,
}

/// Partial update for a check schedule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckUpdate {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone)]
struct CheckEntry {
    check: Arc<dyn DiagnosticCheck>,
    descriptor: Arc<parking_lot::RwLock<CheckDescriptor>>,
}

const DEFAULT_WARNING_THRESHOLD: usize = 5;
const MIN_INTERVAL_MS: u64 = 100;

pub struct DiagnosticEngine {
    checks: parking_lot::RwLock<Vec<CheckEntry>>,
    ledger: Arc<ErrorLedger>,
    bus: SharedEventBus,
    /// More unresolved records than this degrades health to Warning even
    /// when none of them is High or Critical.
    warning_threshold: usize,
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl DiagnosticEngine {
    pub fn new(bus: SharedEventBus) -> Self {
        Self::with_ledger(bus, Arc::new(ErrorLedger::new()))
    }

    pub fn with_ledger(bus: SharedEventBus, ledger: Arc<ErrorLedger>) -> Self {
        Self {
            checks: parking_lot::RwLock::new(Vec::new()),
            ledger,
            bus,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            shutdown: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_warning_threshold(mut self, threshold: usize) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn ledger(&self) -> Arc<ErrorLedger> {
        self.ledger.clone()
    }

    /// Register a check. A check with the same id replaces the previous
    /// one; the new schedule takes effect on the next `start()`.
    pub fn register_check(&self, check: Arc<dyn DiagnosticCheck>) {
        let descriptor = check.descriptor();
        let entry = CheckEntry {
            check,
            descriptor: Arc::new(parking_lot::RwLock::new(descriptor.clone())),
        };
        let mut checks = self.checks.write();
        if let Some(existing) = checks.iter_mut().find(|e| e.descriptor.read().id == descriptor.id) {
            warn!(check = %descriptor.id, "replacing registered diagnostic check");
            *existing = entry;
        } else {
            checks.push(entry);
        }
    }

    /// Spawn one scheduler task per registered check. Each check runs
    /// immediately, then on its own interval. No-op when already running.
    pub fn start(&self) {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            debug!("diagnostic engine already running");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let entries = self.checks.read().clone();
        let mut tasks = self.tasks.lock();
        for entry in entries {
            let ledger = self.ledger.clone();
            let bus = self.bus.clone();
            let rx = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                run_schedule(entry, ledger, bus, rx).await;
            }));
        }
        *shutdown = Some(stop_tx);
        info!(checks = tasks.len(), "diagnostic engine started");
    }

    /// Stop all scheduler tasks. Idempotent.
    pub async fn stop(&self) {
        let stop_tx = self.shutdown.lock().take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        } else {
            return;
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("diagnostic engine stopped");
    }

    /// Current descriptors, registration order, with last-run bookkeeping.
    pub fn get_checks(&self) -> Vec<CheckDescriptor> {
        self.checks
            .read()
            .iter()
            .map(|e| e.descriptor.read().clone())
            .collect()
    }

    /// Adjust a check's schedule in place. Takes effect on the check's
    /// next cycle without restarting the engine.
    pub fn update_check(&self, check_id: &str, update: CheckUpdate) -> Result<CheckDescriptor> {
        let checks = self.checks.read();
        let entry = checks
            .iter()
            .find(|e| e.descriptor.read().id == check_id)
            .ok_or_else(|| Error::NotFound(format!("diagnostic check '{}'", check_id)))?;
        let mut descriptor = entry.descriptor.write();
        if let Some(enabled) = update.enabled {
            descriptor.enabled = enabled;
        }
        if let Some(interval_ms) = update.interval_ms {
            if interval_ms < MIN_INTERVAL_MS {
                return Err(Error::Validation(format!(
                    "interval_ms must be at least {}",
                    MIN_INTERVAL_MS
                )));
            }
            descriptor.interval_ms = interval_ms;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            if timeout_ms == 0 {
                return Err(Error::Validation("timeout_ms must be positive".to_string()));
            }
            descriptor.timeout_ms = timeout_ms;
        }
        Ok(descriptor.clone())
    }

    pub fn get_errors(&self, filter: &ErrorFilter) -> Vec<DiagnosticError> {
        self.ledger.errors(filter)
    }

    /// Resolve a ledger record. Emits `DiagnosticErrorResolved` only when
    /// this call actually transitions the record.
    pub fn resolve_error(&self, error_id: &str, resolved_by: &str) -> Result<DiagnosticError> {
        let was_resolved = self
            .ledger
            .get(error_id)
            .ok_or_else(|| Error::NotFound(format!("diagnostic error '{}'", error_id)))?
            .resolved;
        let record = self
            .ledger
            .resolve_error(error_id, resolved_by)
            .ok_or_else(|| Error::NotFound(format!("diagnostic error '{}'", error_id)))?;
        if !was_resolved {
            self.bus.publish_with_source(
                GatewayEvent::DiagnosticErrorResolved {
                    error_id: record.id.clone(),
                    resolved_by: resolved_by.to_string(),
                },
                "diagnostics",
            );
        }
        Ok(record)
    }

    /// Record a finding on behalf of another component.
    pub fn report(
        &self,
        severity: Severity,
        category: Category,
        source: &str,
        code: &str,
        message: &str,
    ) -> Option<DiagnosticError> {
        let record = DiagnosticError::new(
            severity,
            category,
            source,
            code,
            message,
            suggested_actions(category, source),
        );
        publish_record(&self.ledger, &self.bus, record)
    }

    /// Roll unresolved records up into a verdict: any Critical record is
    /// Critical; any High record, or more unresolved records than the
    /// warning threshold, is Warning; otherwise Healthy.
    pub fn system_health(&self) -> HealthSummary {
        let unresolved = self.ledger.errors(&ErrorFilter::unresolved());
        let critical = unresolved
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .count();
        let high = unresolved
            .iter()
            .filter(|e| e.severity == Severity::High)
            .count();
        let level = if critical > 0 {
            HealthLevel::Critical
        } else if high > 0 || unresolved.len() > self.warning_threshold {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        };
        HealthSummary {
            level,
            unresolved: unresolved.len(),
            critical,
            high,
        }
    }
}

impl Drop for DiagnosticEngine {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn run_schedule(
    entry: CheckEntry,
    ledger: Arc<ErrorLedger>,
    bus: SharedEventBus,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let (enabled, interval_ms) = {
            let d = entry.descriptor.read();
            (d.enabled, d.interval_ms)
        };
        if enabled {
            run_once(&entry, &ledger, &bus).await;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(interval_ms.max(MIN_INTERVAL_MS))) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_once(entry: &CheckEntry, ledger: &Arc<ErrorLedger>, bus: &SharedEventBus) {
    let (id, category, timeout_ms) = {
        let d = entry.descriptor.read();
        (d.id.clone(), d.category, d.timeout_ms)
    };

    let result = tokio::time::timeout(Duration::from_millis(timeout_ms), entry.check.run()).await;
    let now = chrono::Utc::now().timestamp_millis();

    // (level, code, detail, structured context)
    type Failure = (FindingLevel, String, String, Option<serde_json::Value>);
    let failure: Option<Failure> = match result {
        Ok(Ok(CheckOutcome::Pass)) => None,
        Ok(Ok(CheckOutcome::Finding { level, detail })) => {
            Some((level, "CHECK_FAILED".to_string(), detail, None))
        }
        Ok(Err(Error::DiagnosticCheck { code, message })) => {
            Some((FindingLevel::Warning, code, message, None))
        }
        Ok(Err(err)) => Some((
            FindingLevel::Warning,
            "CHECK_ERROR".to_string(),
            err.to_string(),
            None,
        )),
        Err(_elapsed) => Some((
            FindingLevel::Warning,
            "TIMEOUT".to_string(),
            Error::check_timeout(&id).to_string(),
            Some(serde_json::json!({ "timeout_ms": timeout_ms })),
        )),
    };

    {
        let mut d = entry.descriptor.write();
        d.last_run = Some(now);
        d.last_result = Some(failure.is_none());
        d.last_error = failure.as_ref().map(|(_, _, detail, _)| detail.clone());
    }

    if let Some((level, code, detail, details)) = failure {
        let severity = classify(category, level);
        debug!(check = %id, severity = severity.as_str(), %code, %detail, "diagnostic check failed");
        let mut record = DiagnosticError::new(
            severity,
            category,
            &id,
            code,
            detail,
            suggested_actions(category, &id),
        );
        if let Some(details) = details {
            record = record.with_details(details);
        }
        publish_record(ledger, bus, record);
    }
}

fn publish_record(
    ledger: &Arc<ErrorLedger>,
    bus: &SharedEventBus,
    record: DiagnosticError,
) -> Option<DiagnosticError> {
    if !ledger.insert(record.clone()) {
        // Same unresolved finding already on the ledger.
        return None;
    }
    bus.publish_with_source(
        GatewayEvent::DiagnosticErrorReported {
            error_id: record.id.clone(),
            severity: record.severity.as_str().to_string(),
            category: record.category.as_str().to_string(),
            source: record.source.clone(),
            message: record.message.clone(),
        },
        "diagnostics",
    );
    Some(record)
}

/// Severity table: connectivity failures are High, resource findings are
/// Medium or Critical by band, configuration findings Medium, anything
/// else Low.
pub(crate) fn classify(category: Category, level: FindingLevel) -> Severity {
    match (category, level) {
        (Category::Network, _) => Severity::High,
        (Category::Hardware, FindingLevel::Warning) => Severity::Medium,
        (Category::Hardware, FindingLevel::Critical) => Severity::Critical,
        (Category::Configuration, _) => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Remediation hints keyed on category, with protocol-specific text when
/// the source names a known transport.
fn suggested_actions(category: Category, source: &str) -> Vec<String> {
    let mut actions: Vec<String> = match category {
        Category::Network => vec![
            "Check that the remote endpoint is reachable from the gateway".to_string(),
            "Review the adapter's connection settings".to_string(),
        ],
        Category::Hardware => vec![
            "Free memory or disk space on the gateway host".to_string(),
            "Consider raising the retention limits only after adding capacity".to_string(),
        ],
        Category::Configuration => vec![
            "Review the adapter configuration for missing or stale keys".to_string(),
        ],
        Category::Software => vec!["Inspect the gateway logs around the failure time".to_string()],
    };
    if source.contains("mqtt") {
        actions.push("Verify the MQTT broker is running and host/port are correct".to_string());
    } else if source.contains("mesh") {
        actions.push("Restart the mesh bridge and confirm its listen address".to_string());
    } else if source.contains("scan") {
        actions.push("Confirm the scan root URL answers HTTP requests".to_string());
    }
    actions
}
