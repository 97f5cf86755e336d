//! Per-output capture counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of an output's capture counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Packets queued to the capture thread.
    pub packets_received: u64,

    /// Packets handed to the instance.
    pub packets_forwarded: u64,

    /// Packets discarded because capture was not running.
    pub packets_discarded: u64,

    /// Payload bytes handed to the instance.
    pub bytes_forwarded: u64,

    /// Packets still referenced by the instance after its hook returned.
    pub retained_after_hook: u64,

    /// Stop hooks run.
    pub stops: u64,
}

/// Collects capture counters for one output.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    packets_received: AtomicU64,
    packets_forwarded: AtomicU64,
    packets_discarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    retained_after_hook: AtomicU64,
    stops: AtomicU64,
}

impl CaptureMetrics {
    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, bytes: u64) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retained(&self) {
        self.retained_after_hook.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters.
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            packets_discarded: self.packets_discarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            retained_after_hook: self.retained_after_hook.load(Ordering::Relaxed),
            stops: self.stops.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counts() {
        let metrics = CaptureMetrics::default();
        metrics.record_received();
        metrics.record_received();
        metrics.record_forwarded(188);
        metrics.record_discarded();
        metrics.record_stop();

        let stats = metrics.snapshot();
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_forwarded, 1);
        assert_eq!(stats.bytes_forwarded, 188);
        assert_eq!(stats.packets_discarded, 1);
        assert_eq!(stats.retained_after_hook, 0);
        assert_eq!(stats.stops, 1);
    }
}
