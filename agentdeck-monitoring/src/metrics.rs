//! System resource sampling and service health probes

use crate::error::{MonitoringError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{error, warn};

/// One raw reading from a [`ResourceSampler`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    /// CPU usage percentage
    pub cpu_usage: f64,
    /// Memory usage in bytes
    pub memory_used: u64,
    /// Total memory in bytes
    pub memory_total: u64,
    /// Disk usage in bytes, summed over mounted disks
    pub disk_used: u64,
    /// Total disk space in bytes
    pub disk_total: u64,
    /// One minute load average
    pub load_average: f64,
    /// Number of running processes
    pub process_count: usize,
}

impl ResourceSnapshot {
    pub fn memory_percentage(&self) -> f64 {
        percentage(self.memory_used, self.memory_total)
    }

    pub fn disk_available(&self) -> u64 {
        self.disk_total.saturating_sub(self.disk_used)
    }
}

fn percentage(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Point-in-time system metrics published to the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percentage: f64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub disk_available: u64,
    pub load_average: f64,
    pub process_count: usize,
    /// Named service health flags
    pub services: BTreeMap<String, bool>,
}

impl SystemMetrics {
    pub fn from_snapshot(
        snapshot: &ResourceSnapshot,
        services: BTreeMap<String, bool>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            cpu_usage: snapshot.cpu_usage,
            memory_used: snapshot.memory_used,
            memory_total: snapshot.memory_total,
            memory_percentage: snapshot.memory_percentage(),
            disk_used: snapshot.disk_used,
            disk_total: snapshot.disk_total,
            disk_available: snapshot.disk_available(),
            load_average: snapshot.load_average,
            process_count: snapshot.process_count,
            services,
        }
    }

    /// Push the values to the metrics facade
    pub fn publish_gauges(&self) {
        metrics::gauge!("system_cpu_usage_percent").set(self.cpu_usage);
        metrics::gauge!("system_memory_used_bytes").set(self.memory_used as f64);
        metrics::gauge!("system_memory_usage_percent").set(self.memory_percentage);
        metrics::gauge!("system_disk_available_bytes").set(self.disk_available as f64);
        metrics::gauge!("system_load_average").set(self.load_average);
        metrics::gauge!("system_process_count").set(self.process_count as f64);
    }
}

/// Series tracked in the resource history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceMetric {
    Cpu,
    Memory,
    Disk,
    Load,
}

impl ResourceMetric {
    pub const ALL: [ResourceMetric; 4] = [
        ResourceMetric::Cpu,
        ResourceMetric::Memory,
        ResourceMetric::Disk,
        ResourceMetric::Load,
    ];

    /// Value of this series in a sample; memory and disk are percentages
    pub fn value_of(&self, metrics: &SystemMetrics) -> f64 {
        match self {
            ResourceMetric::Cpu => metrics.cpu_usage,
            ResourceMetric::Memory => metrics.memory_percentage,
            ResourceMetric::Disk => percentage(metrics.disk_used, metrics.disk_total),
            ResourceMetric::Load => metrics.load_average,
        }
    }
}

/// One timestamped value of a resource series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub metric: ResourceMetric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Capability returning the current resource usage
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceSnapshot>;
}

/// Host sampler backed by sysinfo
pub struct SysinfoSampler {
    system: Arc<Mutex<System>>,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // prime CPU counters so the first real sample has a baseline
        system.refresh_cpu();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    fn collect(system: &mut System) -> ResourceSnapshot {
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_available) = disks.list().iter().fold((0u64, 0u64), |acc, disk| {
            (acc.0 + disk.total_space(), acc.1 + disk.available_space())
        });

        ResourceSnapshot {
            cpu_usage: system.global_cpu_info().cpu_usage() as f64,
            memory_used: system.used_memory(),
            memory_total: system.total_memory(),
            disk_used: disk_total.saturating_sub(disk_available),
            disk_total,
            load_average: System::load_average().one,
            process_count: system.processes().len(),
        }
    }
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> Result<ResourceSnapshot> {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || Self::collect(&mut system.lock()))
            .await
            .map_err(|e| MonitoringError::Sampling(format!("Sampler task failed: {}", e)))
    }
}

/// Sampler returning a settable fixed snapshot
#[derive(Debug, Default)]
pub struct StaticSampler {
    snapshot: Mutex<ResourceSnapshot>,
    fail: Mutex<Option<String>>,
}

impl StaticSampler {
    pub fn new(snapshot: ResourceSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            fail: Mutex::new(None),
        }
    }

    pub fn set(&self, snapshot: ResourceSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Make subsequent samples fail with `message`, or succeed again with `None`
    pub fn fail_with(&self, message: Option<&str>) {
        *self.fail.lock() = message.map(str::to_string);
    }
}

#[async_trait]
impl ResourceSampler for StaticSampler {
    async fn sample(&self) -> Result<ResourceSnapshot> {
        if let Some(message) = self.fail.lock().clone() {
            return Err(MonitoringError::Sampling(message));
        }
        Ok(self.snapshot.lock().clone())
    }
}

/// Named health check of a collaborating service
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the service is healthy
    async fn check(&self) -> anyhow::Result<bool>;
}

/// Probe evaluating a synchronous closure
pub struct FnProbe<F> {
    name: String,
    check: F,
}

impl<F> FnProbe<F>
where
    F: Fn() -> bool + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

#[async_trait]
impl<F> ServiceProbe for FnProbe<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> anyhow::Result<bool> {
        Ok((self.check)())
    }
}

/// Run every probe concurrently.
///
/// A probe that errors, panics or exceeds `timeout` is reported unhealthy;
/// it never affects the other probes.
pub async fn run_probes(
    probes: &[Arc<dyn ServiceProbe>],
    timeout: Duration,
) -> BTreeMap<String, bool> {
    let checks = probes.iter().map(|probe| async move {
        let call = AssertUnwindSafe(probe.check()).catch_unwind();
        let healthy = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(healthy))) => healthy,
            Ok(Ok(Err(e))) => {
                warn!(probe = probe.name(), error = %e, "Service probe failed");
                false
            }
            Ok(Err(_)) => {
                error!(probe = probe.name(), "Service probe panicked");
                false
            }
            Err(_) => {
                warn!(probe = probe.name(), timeout_ms = timeout.as_millis() as u64, "Service probe timed out");
                false
            }
        };
        (probe.name().to_string(), healthy)
    });

    futures::future::join_all(checks).await.into_iter().collect()
}
