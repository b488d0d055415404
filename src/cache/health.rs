//! Health Checks
//!
//! Aggregates statistics, tier occupancy and disk state into a report.
//! Each probe yields a [`HealthCheckResult`]; degraded results become
//! warnings and unhealthy ones become errors. The cache is healthy iff there
//! are no errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::disk::DiskTier;
use super::memory::MemoryTier;
use super::stats::StatsSnapshot;
use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// No warnings or errors
    Healthy,
    /// Warnings only; still serving
    Degraded,
    /// At least one error
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Limits the checker compares against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthThresholds {
    /// Overall hit rate below this raises a warning
    pub min_hit_rate: f64,
    /// Hit rate is only judged once requests exceed this count
    pub min_requests_for_hit_rate: u64,
    /// Free space on the cache volume below this raises a warning
    pub min_free_disk_bytes: u64,
    /// Memory tier fill ratio at or above this raises a warning
    pub memory_full_ratio: f64,
    /// Average generation time above this raises a warning
    pub max_avg_generation_millis: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.30,
            min_requests_for_hit_rate: 100,
            min_free_disk_bytes: 100 * MIB,
            memory_full_ratio: 0.90,
            max_avg_generation_millis: 500.0,
        }
    }
}

impl HealthThresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("health.minHitRate", self.min_hit_rate),
            ("health.memoryFullRatio", self.memory_full_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.max_avg_generation_millis < 0.0 {
            return Err(Error::Config(
                "health.maxAvgGenerationMillis must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Computed health of one cache instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// True iff `errors` is empty
    pub healthy: bool,
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub checks: Vec<HealthCheckResult>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report from probe results
    pub fn new(checks: Vec<HealthCheckResult>, metrics: BTreeMap<String, f64>) -> Self {
        let messages = |status: HealthStatus| -> Vec<String> {
            checks
                .iter()
                .filter(|c| c.status == status)
                .map(|c| c.message.clone().unwrap_or_else(|| c.name.clone()))
                .collect()
        };
        let warnings = messages(HealthStatus::Degraded);
        let errors = messages(HealthStatus::Unhealthy);

        let status = if !errors.is_empty() {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            healthy: errors.is_empty(),
            status,
            warnings,
            errors,
            metrics,
            checks,
            checked_at: Utc::now(),
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }
}

/// Runs every probe against a cache's tiers
pub struct HealthChecker {
    thresholds: HealthThresholds,
    max_disk_size_bytes: u64,
    disk_enabled: bool,
}

impl HealthChecker {
    pub fn new(thresholds: HealthThresholds, max_disk_size_bytes: u64, disk_enabled: bool) -> Self {
        Self {
            thresholds,
            max_disk_size_bytes,
            disk_enabled,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Evaluate all probes
    ///
    /// `disk` is `None` when the disk tier is disabled or failed to open;
    /// the latter is reported as an error.
    pub fn check(
        &self,
        stats: &StatsSnapshot,
        memory: &MemoryTier,
        disk: Option<&DiskTier>,
    ) -> HealthReport {
        let mut checks = Vec::new();
        let mut metrics = BTreeMap::new();

        metrics.insert("requests".to_string(), stats.requests as f64);
        metrics.insert("overallHitRate".to_string(), stats.overall_hit_rate);
        metrics.insert("memoryHitRate".to_string(), stats.memory_hit_rate);
        metrics.insert("diskHitRate".to_string(), stats.disk_hit_rate);
        metrics.insert("diskErrors".to_string(), stats.disk_errors as f64);
        metrics.insert(
            "avgGenerationTimeMillis".to_string(),
            stats.avg_generation_time_millis,
        );

        match disk {
            Some(disk) => {
                checks.push(self.check_writable(disk.root()));
                checks.push(self.check_free_space(disk.root(), &mut metrics));
                checks.push(self.check_disk_size(disk, &mut metrics));
            }
            None if self.disk_enabled => {
                checks.push(HealthCheckResult::unhealthy(
                    "disk_tier",
                    "Disk tier is enabled but could not be opened",
                ));
            }
            None => {}
        }

        checks.push(self.check_hit_rate(stats));
        checks.push(self.check_disk_errors(stats));
        checks.push(self.check_memory(memory, &mut metrics));
        checks.push(self.check_generation_time(stats));

        HealthReport::new(checks, metrics)
    }

    fn check_writable(&self, root: &Path) -> HealthCheckResult {
        let started = Instant::now();
        let probe = root.join(format!(".health-{}", uuid::Uuid::new_v4()));

        let result = match fs::write(&probe, b"ok").and_then(|_| fs::remove_file(&probe)) {
            Ok(()) => HealthCheckResult::healthy("directory_writable"),
            Err(e) => {
                let _ = fs::remove_file(&probe);
                HealthCheckResult::unhealthy(
                    "directory_writable",
                    format!("Cache directory {} is not writable: {}", root.display(), e),
                )
            }
        };
        result.with_duration(started.elapsed())
    }

    fn check_free_space(&self, root: &Path, metrics: &mut BTreeMap<String, f64>) -> HealthCheckResult {
        match fs2::available_space(root) {
            Ok(free) => {
                metrics.insert("freeDiskBytes".to_string(), free as f64);
                if free < self.thresholds.min_free_disk_bytes {
                    HealthCheckResult::degraded(
                        "free_disk_space",
                        format!(
                            "Low disk space: {} MB free, threshold {} MB",
                            free / MIB,
                            self.thresholds.min_free_disk_bytes / MIB
                        ),
                    )
                } else {
                    HealthCheckResult::healthy("free_disk_space")
                }
            }
            Err(e) => HealthCheckResult::degraded(
                "free_disk_space",
                format!("Unable to determine free disk space: {}", e),
            ),
        }
    }

    fn check_disk_size(&self, disk: &DiskTier, metrics: &mut BTreeMap<String, f64>) -> HealthCheckResult {
        let entries = disk.entries();
        let size: u64 = entries.iter().map(|e| e.size_bytes).sum();
        metrics.insert("diskSizeBytes".to_string(), size as f64);
        metrics.insert("diskFileCount".to_string(), entries.len() as f64);

        if self.max_disk_size_bytes > 0 && size > self.max_disk_size_bytes {
            HealthCheckResult::degraded(
                "disk_size_limit",
                format!(
                    "Disk cache uses {} MB, above the configured {} MB",
                    size / MIB,
                    self.max_disk_size_bytes / MIB
                ),
            )
        } else {
            HealthCheckResult::healthy("disk_size_limit")
        }
    }

    fn check_hit_rate(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        if stats.requests > self.thresholds.min_requests_for_hit_rate
            && stats.overall_hit_rate < self.thresholds.min_hit_rate
        {
            HealthCheckResult::degraded(
                "hit_rate",
                format!(
                    "Low cache hit rate: {:.1}% over {} requests, threshold {:.1}%",
                    stats.overall_hit_rate * 100.0,
                    stats.requests,
                    self.thresholds.min_hit_rate * 100.0
                ),
            )
        } else {
            HealthCheckResult::healthy("hit_rate")
        }
    }

    fn check_disk_errors(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        if stats.disk_errors > 0 {
            HealthCheckResult::degraded(
                "disk_errors",
                format!("{} disk errors recorded", stats.disk_errors),
            )
        } else {
            HealthCheckResult::healthy("disk_errors")
        }
    }

    fn check_memory(&self, memory: &MemoryTier, metrics: &mut BTreeMap<String, f64>) -> HealthCheckResult {
        let utilization = memory.utilization();
        metrics.insert("memoryEntries".to_string(), memory.len() as f64);
        metrics.insert("memoryCapacity".to_string(), memory.capacity() as f64);
        metrics.insert("memoryUtilization".to_string(), utilization);

        if utilization >= self.thresholds.memory_full_ratio {
            HealthCheckResult::degraded(
                "memory_capacity",
                format!(
                    "Memory cache is {:.0}% full ({} of {} entries)",
                    utilization * 100.0,
                    memory.len(),
                    memory.capacity()
                ),
            )
        } else {
            HealthCheckResult::healthy("memory_capacity")
        }
    }

    fn check_generation_time(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        if stats.avg_generation_time_millis > self.thresholds.max_avg_generation_millis {
            HealthCheckResult::degraded(
                "generation_time",
                format!(
                    "Average generation time {:.1} ms exceeds {:.1} ms",
                    stats.avg_generation_time_millis, self.thresholds.max_avg_generation_millis
                ),
            )
        } else {
            HealthCheckResult::healthy("generation_time")
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
