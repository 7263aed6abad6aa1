//! Metric names and the `metrics`-crate backed [`StoreMetrics`] sink.
//!
//! Naming: prefix `alertstore_`, suffix `_total` for counters. Whichever
//! recorder the host process installs receives the values.

use metrics::counter;

use alertstore_core::{StoreMetrics, WriteOp, WriteOutcome};

pub const LABEL_ORG_ID: &str = "org_id";
pub const LABEL_OP: &str = "op";
pub const LABEL_RESULT: &str = "result";

/// Rule cache lookups served from the cache (counter, label: org_id).
pub const CACHE_HITS_TOTAL: &str = "alertstore_rule_cache_hits_total";

/// Rule cache lookups that fell through to the database (counter, label: org_id).
pub const CACHE_MISSES_TOTAL: &str = "alertstore_rule_cache_misses_total";

/// Rule writes by operation and outcome (counter, labels: op, result).
pub const WRITES_TOTAL: &str = "alertstore_rule_writes_total";

pub fn describe_all() {
    use metrics::describe_counter;

    describe_counter!(CACHE_HITS_TOTAL, "Rule cache lookups served from the cache");
    describe_counter!(CACHE_MISSES_TOTAL, "Rule cache lookups that queried the database");
    describe_counter!(WRITES_TOTAL, "Alert rule writes by operation and outcome");
}

/// Forwards store events to the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl StoreMetrics for RecorderMetrics {
    fn cache_hit(&self, org_id: i64) {
        counter!(CACHE_HITS_TOTAL, LABEL_ORG_ID => org_id.to_string()).increment(1);
    }

    fn cache_miss(&self, org_id: i64) {
        counter!(CACHE_MISSES_TOTAL, LABEL_ORG_ID => org_id.to_string()).increment(1);
    }

    fn write_outcome(&self, op: WriteOp, outcome: WriteOutcome) {
        counter!(WRITES_TOTAL, LABEL_OP => op.to_string(), LABEL_RESULT => outcome.to_string())
            .increment(1);
    }
}
