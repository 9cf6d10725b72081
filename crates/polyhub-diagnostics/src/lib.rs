//! Self-diagnostics for the gateway.
//!
//! Periodic checks (adapter connectivity, host resources, configuration
//! sanity) run on their own schedules under [`engine::DiagnosticEngine`].
//! Failures become bounded [`ledger::ErrorLedger`] records and
//! `DiagnosticErrorReported` events; unresolved records roll up into a
//! single system health verdict.

pub mod checks;
pub mod engine;
pub mod ledger;

pub use checks::{
    AdapterConnectivityCheck, CheckDescriptor, CheckOutcome, ConfigSanityCheck, DiagnosticCheck,
    FindingLevel, ProcResourceProbe, ResourceCheck, ResourceProbe, ResourceSample,
};
pub use engine::{CheckUpdate, DiagnosticEngine, HealthLevel, HealthSummary};
pub use ledger::{Category, DiagnosticError, ErrorFilter, ErrorLedger, Severity};
