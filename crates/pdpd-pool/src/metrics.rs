//! Pooling metrics.
//!
//! Counts what happened to each routed event: handled locally, forwarded to
//! the owning host, queued until assignments arrive, or dropped. Counters are
//! exported through the `metrics` facade labelled by controller, and kept
//! locally for status queries and tests.

use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

static DESCRIBE: Once = Once::new();

fn describe() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "pooling_events_local_total",
            "Events processed on the host that received them"
        );
        describe_counter!(
            "pooling_events_forwarded_total",
            "Events forwarded to the host owning their bucket"
        );
        describe_counter!(
            "pooling_events_queued_total",
            "Forwarded events queued until bucket assignments are known"
        );
        describe_counter!(
            "pooling_events_dropped_total",
            "Events dropped by the pooling feature"
        );
    });
}

/// Snapshot of a manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolingStats {
    pub local: u64,
    pub forwarded: u64,
    pub queued: u64,
    pub dropped: u64,
}

/// Per-controller pooling counters.
#[derive(Debug)]
pub struct PoolingMetrics {
    controller: String,
    local: AtomicU64,
    forwarded: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl PoolingMetrics {
    pub fn new(controller: &str) -> Self {
        describe();
        Self {
            controller: controller.to_string(),
            local: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_local(&self) {
        self.local.fetch_add(1, Ordering::Relaxed);
        counter!("pooling_events_local_total", "controller" => self.controller.clone()).increment(1);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        counter!("pooling_events_forwarded_total", "controller" => self.controller.clone())
            .increment(1);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        counter!("pooling_events_queued_total", "controller" => self.controller.clone()).increment(1);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("pooling_events_dropped_total", "controller" => self.controller.clone())
            .increment(1);
    }

    pub fn snapshot(&self) -> PoolingStats {
        PoolingStats {
            local: self.local.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = PoolingMetrics::new("usecases");
        metrics.record_local();
        metrics.record_local();
        metrics.record_forwarded();
        metrics.record_queued();
        metrics.record_dropped();

        assert_eq!(
            metrics.snapshot(),
            PoolingStats {
                local: 2,
                forwarded: 1,
                queued: 1,
                dropped: 1,
            }
        );
    }
}
