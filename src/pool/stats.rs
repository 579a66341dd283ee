//! Pool statistics and metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters kept by the pool
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    forced_evictions: AtomicU64,
    growths: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tilepool_hits_total").increment(1);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tilepool_misses_total").increment(1);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tilepool_evictions_total").increment(1);
    }

    pub(crate) fn record_forced_eviction(&self) {
        self.forced_evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tilepool_forced_evictions_total").increment(1);
    }

    pub(crate) fn record_growth(&self) {
        self.growths.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tilepool_growths_total").increment(1);
    }

    pub(crate) fn record_total(&self, total_bytes: u64) {
        metrics::gauge!("tilepool_bytes").set(total_bytes as f64);
    }

    pub(crate) fn snapshot(
        &self,
        slots: usize,
        occupied: usize,
        total_bytes: u64,
        max_bytes: u64,
    ) -> PoolStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        PoolStats {
            slots,
            occupied,
            total_bytes,
            max_bytes,
            hits,
            misses,
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            forced_evictions: self.forced_evictions.load(Ordering::Relaxed),
            growths: self.growths.load(Ordering::Relaxed),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub slots: usize,
    pub occupied: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Unreferenced items dropped to make room
    pub evictions: u64,
    /// Items displaced while still referenced outside the pool
    pub forced_evictions: u64,
    pub growths: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = PoolCounters::default();
        assert_eq!(counters.snapshot(0, 0, 0, 0).hit_rate, 0.0);

        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_eviction();
        counters.record_growth();

        let stats = counters.snapshot(8, 3, 300, 1000);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.forced_evictions, 0);
        assert_eq!(stats.growths, 1);
        assert_eq!(stats.slots, 8);
        assert_eq!(stats.occupied, 3);
    }
}
