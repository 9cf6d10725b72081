//! Diagnostic checks.
//!
//! A check is a small probe with a descriptor (schedule, timeout, enabled
//! flag) and an async `run` that reports either a pass or a finding. The
//! engine owns scheduling; checks only inspect state.

use crate::ledger::Category;
use async_trait::async_trait;
use polyhub_adapters::adapter::ConnectionState;
use polyhub_adapters::manager::AdapterManager;
use polyhub_core::error::Result;
use polyhub_storage::{AdapterRecordStatus, AdapterStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Check schedule and last-execution bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDescriptor {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
    /// Unix millis of the last execution, if any.
    pub last_run: Option<i64>,
    /// `true` = passed, `false` = finding or error.
    pub last_result: Option<bool>,
    pub last_error: Option<String>,
}

impl CheckDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        interval_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            interval_ms,
            timeout_ms,
            enabled: true,
            last_run: None,
            last_result: None,
            last_error: None,
        }
    }
}

/// Weight of a failed check, before severity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingLevel {
    Warning,
    Critical,
}

/// Result of one check execution.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Pass,
    Finding { level: FindingLevel, detail: String },
}

impl CheckOutcome {
    pub fn warning(detail: impl Into<String>) -> Self {
        Self::Finding {
            level: FindingLevel::Warning,
            detail: detail.into(),
        }
    }

    pub fn critical(detail: impl Into<String>) -> Self {
        Self::Finding {
            level: FindingLevel::Critical,
            detail: detail.into(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[async_trait]
pub trait DiagnosticCheck: Send + Sync {
    fn descriptor(&self) -> CheckDescriptor;

    /// Execute the probe. `Err` means the check itself could not run,
    /// which the engine records as a finding too.
    async fn run(&self) -> Result<CheckOutcome>;
}

// ---------------------------------------------------------------------------
// Adapter connectivity

/// Flags any registered adapter that is not in the `Connected` state.
pub struct AdapterConnectivityCheck {
    manager: Arc<AdapterManager>,
}

impl AdapterConnectivityCheck {
    pub fn new(manager: Arc<AdapterManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl DiagnosticCheck for AdapterConnectivityCheck {
    fn descriptor(&self) -> CheckDescriptor {
        CheckDescriptor::new(
            "adapter_connectivity",
            "Adapter connectivity",
            Category::Network,
            30_000,
            5_000,
        )
    }

    async fn run(&self) -> Result<CheckOutcome> {
        let mut down = Vec::new();
        for adapter in self.manager.list().await {
            let status = adapter.status();
            if status.connection != ConnectionState::Connected {
                down.push(format!(
                    "{} ({})",
                    adapter.name(),
                    status.connection.as_str()
                ));
            }
        }
        if down.is_empty() {
            Ok(CheckOutcome::Pass)
        } else {
            Ok(CheckOutcome::warning(format!(
                "adapters not connected: {}",
                down.join(", ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Resources

/// A point-in-time resource usage sample, in percent used.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    pub memory_used_pct: f64,
    /// `None` when the platform offers no cheap disk figure.
    pub disk_used_pct: Option<f64>,
}

pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> Result<ResourceSample>;
}

/// Reads memory usage from `/proc/meminfo`.
pub struct ProcResourceProbe;

impl ResourceProbe for ProcResourceProbe {
    fn sample(&self) -> Result<ResourceSample> {
        let meminfo = std::fs::read_to_string("/proc/meminfo")?;
        let mut total_kb: Option<u64> = None;
        let mut available_kb: Option<u64> = None;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kb = rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
            }
        }
        match (total_kb, available_kb) {
            (Some(total), Some(available)) if total > 0 => Ok(ResourceSample {
                memory_used_pct: 100.0 * (total.saturating_sub(available)) as f64 / total as f64,
                disk_used_pct: None,
            }),
            _ => Err(polyhub_core::error::Error::DiagnosticCheck {
                code: "PROBE".to_string(),
                message: "could not parse /proc/meminfo".to_string(),
            }),
        }
    }
}

/// Memory/disk usage bands. Crossing `warning_pct` is a warning finding,
/// crossing `critical_pct` a critical one.
pub struct ResourceCheck {
    probe: Arc<dyn ResourceProbe>,
    warning_pct: f64,
    critical_pct: f64,
}

impl ResourceCheck {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            probe,
            warning_pct: 80.0,
            critical_pct: 95.0,
        }
    }

    pub fn with_bands(mut self, warning_pct: f64, critical_pct: f64) -> Self {
        self.warning_pct = warning_pct;
        self.critical_pct = critical_pct;
        self
    }

    fn classify(&self, label: &str, used_pct: f64) -> Option<CheckOutcome> {
        if used_pct >= self.critical_pct {
            Some(CheckOutcome::critical(format!(
                "{} usage at {:.1}% (critical threshold {:.0}%)",
                label, used_pct, self.critical_pct
            )))
        } else if used_pct >= self.warning_pct {
            Some(CheckOutcome::warning(format!(
                "{} usage at {:.1}% (warning threshold {:.0}%)",
                label, used_pct, self.warning_pct
            )))
        } else {
            None
        }
    }
}

#[async_trait]
impl DiagnosticCheck for ResourceCheck {
    fn descriptor(&self) -> CheckDescriptor {
        CheckDescriptor::new(
            "resources",
            "System resources",
            Category::Hardware,
            60_000,
            5_000,
        )
    }

    async fn run(&self) -> Result<CheckOutcome> {
        let sample = self.probe.sample()?;
        let mut findings = Vec::new();
        if let Some(outcome) = self.classify("memory", sample.memory_used_pct) {
            findings.push(outcome);
        }
        if let Some(disk) = sample.disk_used_pct {
            if let Some(outcome) = self.classify("disk", disk) {
                findings.push(outcome);
            }
        }
        // Report the worst finding.
        let worst = findings.into_iter().max_by_key(|o| match o {
            CheckOutcome::Finding {
                level: FindingLevel::Critical,
                ..
            } => 1,
            _ => 0,
        });
        Ok(worst.unwrap_or(CheckOutcome::Pass))
    }
}

// ---------------------------------------------------------------------------
// Configuration sanity

/// Flags adapter records with an empty config or a persisted error status.
pub struct ConfigSanityCheck {
    adapters: Arc<AdapterStore>,
}

impl ConfigSanityCheck {
    pub fn new(adapters: Arc<AdapterStore>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl DiagnosticCheck for ConfigSanityCheck {
    fn descriptor(&self) -> CheckDescriptor {
        CheckDescriptor::new(
            "config_sanity",
            "Adapter configuration sanity",
            Category::Configuration,
            300_000,
            5_000,
        )
    }

    async fn run(&self) -> Result<CheckOutcome> {
        let mut suspect = Vec::new();
        for record in self.adapters.list_adapters()? {
            let empty_config = record.config.is_null()
                || record
                    .config
                    .as_object()
                    .map(|m| m.is_empty())
                    .unwrap_or(false);
            if empty_config {
                suspect.push(format!("{}: empty configuration", record.name));
            }
            if record.status == AdapterRecordStatus::Error {
                suspect.push(format!("{}: persisted error status", record.name));
            }
        }
        if suspect.is_empty() {
            Ok(CheckOutcome::Pass)
        } else {
            Ok(CheckOutcome::warning(suspect.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(ResourceSample);

    impl ResourceProbe for FixedProbe {
        fn sample(&self) -> Result<ResourceSample> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_resource_bands() {
        let mk = |memory, disk| {
            ResourceCheck::new(Arc::new(FixedProbe(ResourceSample {
                memory_used_pct: memory,
                disk_used_pct: disk,
            })))
        };

        assert!(mk(40.0, Some(40.0)).run().await.unwrap().passed());

        match mk(85.0, None).run().await.unwrap() {
            CheckOutcome::Finding { level, detail } => {
                assert_eq!(level, FindingLevel::Warning);
                assert!(detail.contains("memory"));
            }
            other => panic!("expected warning, got {:?}", other),
        }

        // Critical on either axis wins over a warning on the other.
        match mk(85.0, Some(97.0)).run().await.unwrap() {
            CheckOutcome::Finding { level, detail } => {
                assert_eq!(level, FindingLevel::Critical);
                assert!(detail.contains("disk"));
            }
            other => panic!("expected critical, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_config_sanity_flags_empty_and_error_records() {
        use polyhub_storage::{AdapterRecord, MemoryBackend};

        let store = Arc::new(AdapterStore::new(Arc::new(MemoryBackend::new())));
        let mut healthy = AdapterRecord::new(
            "mqtt-main",
            "mqtt",
            serde_json::json!({"host": "broker.local"}),
        );
        healthy.status = AdapterRecordStatus::Active;
        store.insert_adapter(&healthy).unwrap();

        let mut broken = AdapterRecord::new("mesh-main", "mesh", serde_json::json!({}));
        broken.status = AdapterRecordStatus::Error;
        store.insert_adapter(&broken).unwrap();

        let check = ConfigSanityCheck::new(store);
        match check.run().await.unwrap() {
            CheckOutcome::Finding { detail, .. } => {
                assert!(detail.contains("mesh-main: empty configuration"));
                assert!(detail.contains("mesh-main: persisted error status"));
                assert!(!detail.contains("mqtt-main"));
            }
            other => panic!("expected finding, got {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = CheckDescriptor::new("x", "X", Category::Software, 1000, 100);
        assert!(desc.enabled);
        assert!(desc.last_run.is_none());
        assert!(desc.last_result.is_none());
    }
}
