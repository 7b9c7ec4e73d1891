//! Explicitly-owned stats counters (§9: no process-wide metric singletons —
//! the reference implementation's global mutable state is replaced here by
//! an object the Engine owns and threads through its own lifetime).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::DistanceMetric;

/// Engine-wide counters backing `get_stats()` (§6).
#[derive(Debug, Default)]
pub struct EngineStats {
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    checksum_failures: AtomicU64,
    total_gets: AtomicU64,
    total_puts: AtomicU64,
    get_time_us_sum: AtomicU64,
    put_time_us_sum: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStatsSnapshot {
    pub total_pages: u64,
    pub total_reads: u64,
    pub total_writes: u64,
    pub checksum_failures: u64,
    pub total_entries: u64,
    pub avg_get_time_us: f64,
    pub avg_put_time_us: f64,
    pub total_gets: u64,
    pub total_puts: u64,
}

impl EngineStats {
    pub fn new() -> EngineStats {
        EngineStats::default()
    }

    pub fn record_disk_read(&self) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get(&self, micros: u64) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);
        self.get_time_us_sum.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_put(&self, micros: u64) {
        self.total_puts.fetch_add(1, Ordering::Relaxed);
        self.put_time_us_sum.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self, total_pages: u64, total_entries: u64) -> EngineStatsSnapshot {
        let total_gets = self.total_gets.load(Ordering::Relaxed);
        let total_puts = self.total_puts.load(Ordering::Relaxed);
        let avg_get_time_us = if total_gets == 0 {
            0.0
        } else {
            self.get_time_us_sum.load(Ordering::Relaxed) as f64 / total_gets as f64
        };
        let avg_put_time_us = if total_puts == 0 {
            0.0
        } else {
            self.put_time_us_sum.load(Ordering::Relaxed) as f64 / total_puts as f64
        };
        EngineStatsSnapshot {
            total_pages,
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            total_entries,
            avg_get_time_us,
            avg_put_time_us,
            total_gets,
            total_puts,
        }
    }
}

/// Vector-index counters backing `get_vector_stats()` (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorStats {
    pub index_enabled: bool,
    pub num_vectors: u64,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub num_layers: usize,
    pub avg_connections_per_node: f64,
}

pub type VectorStatsSnapshot = VectorStats;
