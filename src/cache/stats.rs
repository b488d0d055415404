//! Cache Statistics
//!
//! Lock-free counters bumped on every request path. Rates and averages are
//! derived when a snapshot is taken, never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Statistics collector shared by the tiers and the facade
#[derive(Debug, Default)]
pub struct StatsCollector {
    // Request outcomes
    requests: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,

    // Disk tier
    disk_errors: AtomicU64,
    disk_writes: AtomicU64,
    failed_disk_writes: AtomicU64,

    // Memory tier movement
    evictions: AtomicU64,
    promotions: AtomicU64,

    // Cumulative time spent producing payloads after a miss (microseconds)
    generation_time_us: AtomicU64,

    // Lookup latencies (microseconds, exponential moving average)
    memory_lookup_latency_us: AtomicU64,
    disk_lookup_latency_us: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_error(&self) {
        self.disk_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_disk_write(&self) {
        self.failed_disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Add time spent generating a payload the cache did not have
    pub fn record_generation_time(&self, duration: Duration) {
        self.generation_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_memory_lookup_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.memory_lookup_latency_us, duration);
    }

    pub fn record_disk_lookup_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.disk_lookup_latency_us, duration);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn disk_errors(&self) -> u64 {
        self.disk_errors.load(Ordering::Relaxed)
    }

    pub fn generation_time(&self) -> Duration {
        Duration::from_micros(self.generation_time_us.load(Ordering::Relaxed))
    }

    pub fn memory_lookup_latency(&self) -> Duration {
        Duration::from_micros(self.memory_lookup_latency_us.load(Ordering::Relaxed))
    }

    pub fn disk_lookup_latency(&self) -> Duration {
        Duration::from_micros(self.disk_lookup_latency_us.load(Ordering::Relaxed))
    }

    /// Point-in-time copy with derived rates
    ///
    /// Counters are read individually, so a snapshot taken under load may
    /// mix values from adjacent requests.
    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests();
        let memory_hits = self.memory_hits();
        let disk_hits = self.disk_hits();
        let misses = self.misses();
        let generation_time = self.generation_time();

        let avg_generation_time_millis = if misses == 0 {
            0.0
        } else {
            generation_time.as_secs_f64() * 1000.0 / misses as f64
        };

        StatsSnapshot {
            requests,
            memory_hits,
            disk_hits,
            misses,
            disk_errors: self.disk_errors(),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            failed_disk_writes: self.failed_disk_writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            generation_time_millis: generation_time.as_millis() as u64,
            memory_hit_rate: ratio(memory_hits, requests),
            disk_hit_rate: ratio(disk_hits, requests),
            overall_hit_rate: ratio(memory_hits + disk_hits, requests),
            miss_rate: ratio(misses, requests),
            avg_generation_time_millis,
            memory_lookup_latency_us: self.memory_lookup_latency_us.load(Ordering::Relaxed),
            disk_lookup_latency_us: self.disk_lookup_latency_us.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.memory_hits,
            &self.disk_hits,
            &self.misses,
            &self.disk_errors,
            &self.disk_writes,
            &self.failed_disk_writes,
            &self.evictions,
            &self.promotions,
            &self.generation_time_us,
            &self.memory_lookup_latency_us,
            &self.disk_lookup_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Snapshot of all cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub requests: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub disk_errors: u64,
    pub disk_writes: u64,
    pub failed_disk_writes: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub generation_time_millis: u64,

    // Derived
    pub memory_hit_rate: f64,
    pub disk_hit_rate: f64,
    pub overall_hit_rate: f64,
    pub miss_rate: f64,
    pub avg_generation_time_millis: f64,

    pub memory_lookup_latency_us: u64,
    pub disk_lookup_latency_us: u64,
}

/// Latency tracker for timing operations
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
