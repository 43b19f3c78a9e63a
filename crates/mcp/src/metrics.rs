//! Per-tool invocation metrics recorded by the endpoint pipeline.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Aggregate statistics for one external tool name.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStats {
    pub calls: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub last_ms: u64,
}

impl ToolCallStats {
    pub fn average_ms(&self) -> u64 {
        if self.calls == 0 { 0 } else { self.total_ms / self.calls }
    }
}

/// Thread-safe metrics store. Updates are synchronous map edits; no lock is
/// held across an await.
#[derive(Default)]
pub struct CallMetrics {
    stats: Mutex<HashMap<String, ToolCallStats>>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, tool: &str, elapsed: Duration) {
        self.record(tool, elapsed, false);
    }

    pub fn record_failure(&self, tool: &str, elapsed: Duration) {
        self.record(tool, elapsed, true);
    }

    fn record(&self, tool: &str, elapsed: Duration, failed: bool) {
        let millis = elapsed.as_millis() as u64;
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(tool.to_string()).or_default();
        entry.calls += 1;
        if failed {
            entry.failures += 1;
        }
        entry.total_ms += millis;
        entry.max_ms = entry.max_ms.max(millis);
        entry.last_ms = millis;
    }

    /// Copy of the current statistics for the admin surface.
    pub fn snapshot(&self) -> HashMap<String, ToolCallStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_successes_and_failures() {
        let metrics = CallMetrics::new();
        metrics.record_success("add", Duration::from_millis(10));
        metrics.record_success("add", Duration::from_millis(30));
        metrics.record_failure("add", Duration::from_millis(20));

        let snapshot = metrics.snapshot();
        let stats = &snapshot["add"];
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.total_ms, 60);
        assert_eq!(stats.max_ms, 30);
        assert_eq!(stats.last_ms, 20);
        assert_eq!(stats.average_ms(), 20);
    }

    #[test]
    fn empty_snapshot() {
        let metrics = CallMetrics::new();
        assert!(metrics.snapshot().is_empty());
        assert_eq!(ToolCallStats::default().average_ms(), 0);
    }
}
