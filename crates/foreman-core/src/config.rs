use crate::error::{ForemanError, ForemanResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, usually read from `foreman.toml`.
///
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForemanConfig {
    /// Routing settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,
    /// Health monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Tracing output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker selection policy used by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First capable worker in registration order.
    #[default]
    FirstCapable,
    /// First idle capable worker, falling back to registration order.
    IdleFirst,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-invocation timeout in seconds.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Worker selection policy.
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout(),
            selection: SelectionPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Per-invocation timeout.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Message bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of messages retained in history.
    #[serde(default = "default_bus_history")]
    pub history_limit: usize,
    /// Bounded wait of the consumer loop on an empty queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_limit: default_bus_history(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl BusConfig {
    /// Consumer wait on an empty queue.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between polling cycles; also bounds each health check.
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// Snapshots retained per worker.
    #[serde(default = "default_monitor_history")]
    pub history_limit: usize,
    /// Window passed to the metrics source.
    #[serde(default = "default_metrics_window")]
    pub metrics_window_secs: u64,
    /// Run the optimizer after every polling cycle.
    #[serde(default = "default_true")]
    pub auto_optimize: bool,
    /// Per-worker alert thresholds.
    #[serde(default)]
    pub thresholds: AlertThresholds,
    /// System-wide scaling policy.
    #[serde(default)]
    pub autoscaling: AutoscalingConfig,
    /// Limits for the trend report's bottleneck list.
    #[serde(default)]
    pub bottlenecks: BottleneckThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            history_limit: default_monitor_history(),
            metrics_window_secs: default_metrics_window(),
            auto_optimize: default_true(),
            thresholds: AlertThresholds::default(),
            autoscaling: AutoscalingConfig::default(),
            bottlenecks: BottleneckThresholds::default(),
        }
    }
}

impl MonitorConfig {
    /// Polling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Metrics window.
    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }
}

/// Per-worker alert thresholds. Percentages are on a 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Mean latency in seconds.
    #[serde(default = "default_response_time")]
    pub response_time_secs: f64,
    /// Failed share of invocations.
    #[serde(default = "default_error_rate")]
    pub error_rate_pct: f64,
    /// Memory usage.
    #[serde(default = "default_memory")]
    pub memory_pct: f64,
    /// CPU usage.
    #[serde(default = "default_cpu")]
    pub cpu_pct: f64,
    /// Queued plus in-flight tasks.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time_secs: default_response_time(),
            error_rate_pct: default_error_rate(),
            memory_pct: default_memory(),
            cpu_pct: default_cpu(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Latest-snapshot limits above which a worker is reported as a bottleneck
/// in the trend report. Stricter than the alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckThresholds {
    /// Mean latency in seconds.
    #[serde(default = "default_bottleneck_response_time")]
    pub response_time_secs: f64,
    /// Failed share of invocations.
    #[serde(default = "default_bottleneck_error_rate")]
    pub error_rate_pct: f64,
}

impl Default for BottleneckThresholds {
    fn default() -> Self {
        Self {
            response_time_secs: default_bottleneck_response_time(),
            error_rate_pct: default_bottleneck_error_rate(),
        }
    }
}

/// System-wide scaling thresholds. `scale_down_pct` must stay below
/// `scale_up_pct` so that decisions do not oscillate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    /// Scale up when CPU or memory exceeds this.
    #[serde(default = "default_scale_up")]
    pub scale_up_pct: f64,
    /// Scale down when both CPU and memory are below this.
    #[serde(default = "default_scale_down")]
    pub scale_down_pct: f64,
    /// Lower bound on instances.
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,
    /// Upper bound on instances.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            scale_up_pct: default_scale_up(),
            scale_down_pct: default_scale_down(),
            min_instances: default_min_instances(),
            max_instances: default_max_instances(),
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

fn default_task_timeout() -> u64 {
    300
}
fn default_bus_history() -> usize {
    1000
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_monitor_interval() -> u64 {
    30
}
fn default_monitor_history() -> usize {
    100
}
fn default_metrics_window() -> u64 {
    900
}
fn default_true() -> bool {
    true
}
fn default_response_time() -> f64 {
    5.0
}
fn default_error_rate() -> f64 {
    10.0
}
fn default_memory() -> f64 {
    80.0
}
fn default_cpu() -> f64 {
    90.0
}
fn default_queue_depth() -> u64 {
    1000
}
fn default_bottleneck_response_time() -> f64 {
    3.0
}
fn default_bottleneck_error_rate() -> f64 {
    2.0
}
fn default_scale_up() -> f64 {
    75.0
}
fn default_scale_down() -> f64 {
    25.0
}
fn default_min_instances() -> u32 {
    1
}
fn default_max_instances() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ForemanConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ForemanResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ForemanError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> ForemanResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForemanError::Config(format!(
                "Failed to read config '{}': {e}",
                path.display()
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Reject values that would stall loops or make thresholds meaningless.
    pub fn validate(&self) -> ForemanResult<()> {
        if self.dispatch.task_timeout_secs == 0 {
            return Err(ForemanError::Config(
                "dispatch.task_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.bus.history_limit == 0 || self.bus.poll_interval_ms == 0 {
            return Err(ForemanError::Config(
                "bus.history_limit and bus.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.monitor.interval_secs == 0 || self.monitor.history_limit == 0 {
            return Err(ForemanError::Config(
                "monitor.interval_secs and monitor.history_limit must be greater than zero".into(),
            ));
        }
        let scaling = &self.monitor.autoscaling;
        if scaling.scale_down_pct >= scaling.scale_up_pct {
            return Err(ForemanError::Config(format!(
                "monitor.autoscaling.scale_down_pct ({}) must be below scale_up_pct ({})",
                scaling.scale_down_pct, scaling.scale_up_pct
            )));
        }
        if scaling.min_instances > scaling.max_instances {
            return Err(ForemanError::Config(
                "monitor.autoscaling.min_instances exceeds max_instances".into(),
            ));
        }
        Ok(())
    }
}
