/// System metrics consumed by prevention rules
use super::controls::PreventionControls;
use crate::error::SpaceProbe;
use crate::SentinelResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

/// Window for the network-failure and latency metrics
pub const NETWORK_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Metric a rule threshold compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    DiskUsagePct,
    MemoryUsagePct,
    CpuUsagePct,
    NetworkFailures,
    RequestsPerMinute,
    LatencyMs,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::DiskUsagePct => "disk_usage_pct",
            MetricKind::MemoryUsagePct => "memory_usage_pct",
            MetricKind::CpuUsagePct => "cpu_usage_pct",
            MetricKind::NetworkFailures => "network_failures",
            MetricKind::RequestsPerMinute => "requests_per_minute",
            MetricKind::LatencyMs => "latency_ms",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub disk_usage_pct: f64,
    pub memory_usage_pct: f64,
    pub cpu_usage_pct: f64,
    /// Network failures in the last ten minutes
    pub network_failures: u32,
    pub requests_per_minute: u32,
    pub avg_latency_ms: f64,
}

impl SystemMetrics {
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::DiskUsagePct => self.disk_usage_pct,
            MetricKind::MemoryUsagePct => self.memory_usage_pct,
            MetricKind::CpuUsagePct => self.cpu_usage_pct,
            MetricKind::NetworkFailures => self.network_failures as f64,
            MetricKind::RequestsPerMinute => self.requests_per_minute as f64,
            MetricKind::LatencyMs => self.avg_latency_ms,
        }
    }
}

/// Source of system metrics
#[cfg_attr(test, mockall::automock)]
pub trait MetricsProvider: Send + Sync {
    fn collect(&self) -> SentinelResult<SystemMetrics>;
}

/// Host metrics from `sysinfo`, disk usage from a [`SpaceProbe`]
pub struct SysinfoMetrics {
    system: Mutex<System>,
    probe: Arc<dyn SpaceProbe>,
    watch_path: PathBuf,
    controls: Option<Arc<PreventionControls>>,
}

impl SysinfoMetrics {
    pub fn new(probe: Arc<dyn SpaceProbe>, watch_path: impl Into<PathBuf>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            probe,
            watch_path: watch_path.into(),
            controls: None,
        }
    }

    /// Read request and failure counts from the controls' traffic monitor
    pub fn with_traffic(mut self, controls: Arc<PreventionControls>) -> Self {
        self.controls = Some(controls);
        self
    }
}

impl MetricsProvider for SysinfoMetrics {
    fn collect(&self) -> SentinelResult<SystemMetrics> {
        let (memory_usage_pct, cpu_usage_pct) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu();

            let total = system.total_memory();
            let memory = if total == 0 {
                0.0
            } else {
                system.used_memory() as f64 / total as f64 * 100.0
            };
            (memory, system.global_cpu_info().cpu_usage() as f64)
        };

        let disk_usage_pct = match self.probe.space(&self.watch_path) {
            Ok(report) => report.used_pct(),
            Err(e) => {
                tracing::warn!(path = %self.watch_path.display(), error = %e, "Disk probe failed");
                0.0
            }
        };

        let mut metrics = SystemMetrics {
            disk_usage_pct,
            memory_usage_pct,
            cpu_usage_pct,
            ..SystemMetrics::default()
        };
        if let Some(controls) = &self.controls {
            let traffic = controls.traffic();
            metrics.network_failures = traffic.network_failures(NETWORK_WINDOW);
            metrics.requests_per_minute = traffic.requests_per_minute();
            metrics.avg_latency_ms = traffic.avg_latency_ms(Duration::from_secs(60));
        }

        Ok(metrics)
    }
}
