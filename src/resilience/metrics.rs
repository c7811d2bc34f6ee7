use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::time::{format_offset, now_utc};
use crate::store::Operation;

/// How a single store attempt ended, when it did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Throttled,
    Unavailable,
    Conflict,
    NotFound,
    Rejected,
}

impl AttemptOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::Unavailable => "unavailable",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Rejected => "rejected",
        }
    }
}

// `count` and latency cover every attempt; cost only the charged ones.
#[derive(Debug, Default, Clone, Copy)]
struct Aggregate {
    count: u64,
    failed: u64,
    total_cost: f64,
    total_latency: Duration,
    max_cost: f64,
}

impl Aggregate {
    fn record(&mut self, cost: f64, latency: Duration) {
        self.count += 1;
        self.total_cost += cost;
        self.total_latency += latency;
        if cost > self.max_cost {
            self.max_cost = cost;
        }
    }

    fn record_failure(&mut self, latency: Duration) {
        self.count += 1;
        self.failed += 1;
        self.total_latency += latency;
    }

    fn summary(&self) -> AggregateSummary {
        let charged = self.count - self.failed;
        let avg_cost = if charged == 0 { 0.0 } else { self.total_cost / charged as f64 };
        let avg_latency_ms = if self.count == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.count as f64
        };
        AggregateSummary {
            count: self.count,
            failed: self.failed,
            total_cost: self.total_cost,
            avg_cost,
            avg_latency_ms,
            max_cost: self.max_cost,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct AggregateSummary {
    pub(crate) count: u64,
    pub(crate) failed: u64,
    pub(crate) total_cost: f64,
    pub(crate) avg_cost: f64,
    pub(crate) avg_latency_ms: f64,
    pub(crate) max_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StoreMetricsSnapshot {
    pub(crate) backend: &'static str,
    pub(crate) since: String,
    pub(crate) total: AggregateSummary,
    pub(crate) operations: BTreeMap<&'static str, AggregateSummary>,
    pub(crate) throttled: u64,
    pub(crate) conflicts: u64,
    pub(crate) rejected: u64,
    pub(crate) transient_failures: u64,
    pub(crate) cost_high_water_mark: f64,
    pub(crate) high_cost_operations: u64,
}

#[derive(Debug, Default)]
struct Aggregates {
    total: Aggregate,
    by_operation: BTreeMap<Operation, Aggregate>,
}

/// Cost and latency accounting for every store attempt, failed ones included.
/// One instance is created per process and shared by the access layer.
#[derive(Debug)]
pub(crate) struct StoreMetrics {
    backend: &'static str,
    started_at: OffsetDateTime,
    cost_high_water_mark: f64,
    aggregates: Mutex<Aggregates>,
    throttled: AtomicU64,
    conflicts: AtomicU64,
    rejected: AtomicU64,
    transient_failures: AtomicU64,
    high_cost_operations: AtomicU64,
}

impl StoreMetrics {
    pub(crate) fn new(backend: &'static str, cost_high_water_mark: f64) -> Self {
        Self {
            backend,
            started_at: now_utc(),
            cost_high_water_mark,
            aggregates: Mutex::new(Aggregates::default()),
            throttled: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            transient_failures: AtomicU64::new(0),
            high_cost_operations: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self, operation: Operation, cost: f64, latency: Duration) {
        {
            let mut aggregates =
                self.aggregates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            aggregates.total.record(cost, latency);
            aggregates.by_operation.entry(operation).or_default().record(cost, latency);
        }

        metrics::counter!("store_operations_total", "operation" => operation.as_str(), "outcome" => "ok")
            .increment(1);
        metrics::histogram!("store_operation_cost_units", "operation" => operation.as_str())
            .record(cost);
        metrics::histogram!("store_operation_latency_seconds", "operation" => operation.as_str())
            .record(latency.as_secs_f64());

        if cost > self.cost_high_water_mark {
            self.high_cost_operations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                operation = operation.as_str(),
                cost,
                high_water_mark = self.cost_high_water_mark,
                latency_ms = latency.as_millis() as u64,
                "Store operation exceeded cost high-water mark"
            );
        }
    }

    /// Records an attempt that returned an error instead of a charged result.
    pub(crate) fn record_failure(
        &self,
        operation: Operation,
        outcome: AttemptOutcome,
        latency: Duration,
    ) {
        {
            let mut aggregates =
                self.aggregates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            aggregates.total.record_failure(latency);
            aggregates.by_operation.entry(operation).or_default().record_failure(latency);
        }

        match outcome {
            AttemptOutcome::Throttled => {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("store_throttled_total", "operation" => operation.as_str())
                    .increment(1);
            }
            AttemptOutcome::Conflict => {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            AttemptOutcome::Rejected => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            AttemptOutcome::Unavailable | AttemptOutcome::NotFound => {}
        }

        metrics::counter!(
            "store_operations_total",
            "operation" => operation.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!("store_operation_latency_seconds", "operation" => operation.as_str())
            .record(latency.as_secs_f64());
    }

    pub(crate) fn record_transient_failure(&self, operation: Operation) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "store_operations_total",
            "operation" => operation.as_str(),
            "outcome" => "exhausted"
        )
        .increment(1);
    }

    pub(crate) fn snapshot(&self) -> StoreMetricsSnapshot {
        let aggregates = self.aggregates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StoreMetricsSnapshot {
            backend: self.backend,
            since: format_offset(self.started_at),
            total: aggregates.total.summary(),
            operations: aggregates
                .by_operation
                .iter()
                .map(|(operation, aggregate)| (operation.as_str(), aggregate.summary()))
                .collect(),
            throttled: self.throttled.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            cost_high_water_mark: self.cost_high_water_mark,
            high_cost_operations: self.high_cost_operations.load(Ordering::Relaxed),
        }
    }
}
