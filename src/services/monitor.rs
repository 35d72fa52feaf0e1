//! Operator monitoring seam.

use tracing::{error, info, warn};

/// Severity attached to a monitoring notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something degraded.
    Warning,
    /// Operator attention required.
    Severe,
}

/// External log sink / alerting hook.
pub trait Monitor: Send + Sync {
    /// Deliver a notice.
    fn notify(&self, severity: Severity, message: &str);
}

/// Monitor that writes to the `monitor` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "monitor", "{}", message),
            Severity::Warning => warn!(target: "monitor", "{}", message),
            Severity::Severe => error!(target: "monitor", "{}", message),
        }
    }
}
