//! Per-operation call statistics.
//!
//! Updated synchronously after every invocation with the incremental mean
//! `avg = n/(n+1) * avg + ms/(n+1)`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub calls: u64,
    pub average_ms: f64,
}

impl OperationStats {
    pub fn record(&mut self, elapsed: Duration) {
        let n = self.calls as f64;
        let ms = elapsed.as_millis() as f64;
        self.average_ms = (n / (n + 1.0)) * self.average_ms + ms / (n + 1.0);
        self.calls += 1;
    }
}

/// Statistics keyed by operation name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallStats {
    operations: BTreeMap<&'static str, OperationStats>,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, operation: &'static str, elapsed: Duration) {
        self.operations.entry(operation).or_default().record(elapsed);
    }

    pub fn get(&self, operation: &str) -> Option<&OperationStats> {
        self.operations.get(operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &OperationStats)> + '_ {
        self.operations.iter().map(|(name, stats)| (*name, stats))
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
