use async_trait::async_trait;
use foreman_core::ForemanResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Normalized per-worker metrics over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Mean invocation latency in seconds.
    pub latency_secs: f64,
    /// Failed share of invocations, 0-100.
    pub error_rate_pct: f64,
    /// Reported CPU usage.
    pub cpu_pct: f64,
    /// Reported memory usage.
    pub memory_pct: f64,
    /// Reported queue depth.
    pub queue_depth: u64,
    /// Invocations observed in the window.
    pub samples: u64,
}

/// Resource usage reported for a single worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage, 0-100.
    pub cpu_pct: f64,
    /// Memory usage, 0-100.
    pub memory_pct: f64,
    /// Queued tasks.
    pub queue_depth: u64,
}

/// System-wide resource usage, 0-100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUsage {
    /// CPU usage.
    pub cpu_pct: f64,
    /// Memory usage.
    pub memory_pct: f64,
}

/// Supplies raw timing and resource numbers to the health monitor.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Metrics for `worker_id` over the trailing `window`.
    async fn get_metrics(&self, worker_id: &str, window: Duration) -> ForemanResult<WorkerMetrics>;

    /// Current system-wide usage.
    async fn system_usage(&self) -> ForemanResult<SystemUsage>;
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency: Duration,
    success: bool,
}

const DEFAULT_MAX_SAMPLES: usize = 1000;

/// Telemetry held in memory: invocation samples recorded by the dispatcher
/// plus resource figures reported by an operator or agent.
#[derive(Debug)]
pub struct InMemoryTelemetry {
    max_samples: usize,
    samples: Mutex<HashMap<String, VecDeque<Sample>>>,
    resources: Mutex<HashMap<String, ResourceUsage>>,
    system: Mutex<SystemUsage>,
}

impl Default for InMemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTelemetry {
    /// Store keeping the default number of samples per worker.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAMPLES)
    }

    /// Keep at most `max_samples` invocations per worker.
    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            samples: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            system: Mutex::new(SystemUsage::default()),
        }
    }

    /// Record one invocation.
    pub fn record(&self, worker_id: &str, latency: Duration, success: bool) {
        let mut samples = self.samples.lock();
        let entry = samples.entry(worker_id.to_string()).or_default();
        entry.push_back(Sample {
            at: Instant::now(),
            latency,
            success,
        });
        while entry.len() > self.max_samples {
            entry.pop_front();
        }
    }

    /// Replace the resource figures for `worker_id`.
    pub fn report_resources(&self, worker_id: &str, usage: ResourceUsage) {
        self.resources.lock().insert(worker_id.to_string(), usage);
    }

    /// Replace the system-wide figures.
    pub fn report_system(&self, usage: SystemUsage) {
        *self.system.lock() = usage;
    }

    /// Synchronous form of [`MetricsSource::get_metrics`].
    pub fn metrics(&self, worker_id: &str, window: Duration) -> WorkerMetrics {
        let resources = self
            .resources
            .lock()
            .get(worker_id)
            .copied()
            .unwrap_or_default();

        let (count, failed, total_latency) = {
            let samples = self.samples.lock();
            let now = Instant::now();
            samples
                .get(worker_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|s| now.duration_since(s.at) <= window)
                        .fold((0u64, 0u64, Duration::ZERO), |(n, f, total), s| {
                            (n + 1, f + u64::from(!s.success), total + s.latency)
                        })
                })
                .unwrap_or((0, 0, Duration::ZERO))
        };

        let (latency_secs, error_rate_pct) = if count == 0 {
            (0.0, 0.0)
        } else {
            (
                total_latency.as_secs_f64() / count as f64,
                failed as f64 / count as f64 * 100.0,
            )
        };

        WorkerMetrics {
            latency_secs,
            error_rate_pct,
            cpu_pct: resources.cpu_pct,
            memory_pct: resources.memory_pct,
            queue_depth: resources.queue_depth,
            samples: count,
        }
    }
}

#[async_trait]
impl MetricsSource for InMemoryTelemetry {
    async fn get_metrics(&self, worker_id: &str, window: Duration) -> ForemanResult<WorkerMetrics> {
        Ok(self.metrics(worker_id, window))
    }

    async fn system_usage(&self) -> ForemanResult<SystemUsage> {
        Ok(*self.system.lock())
    }
}
