use crate::optimizer::{ActionExecutor, ActionKind, OptimizationReport, Optimizer};
use crate::telemetry::{MetricsSource, WorkerMetrics};
use chrono::{DateTime, Utc};
use foreman_core::{panic_message, BottleneckThresholds, ForemanError, ForemanResult, MonitorConfig};
use foreman_workers::{CapabilityRegistry, WorkerHandle, WorkerStatus};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pending alerts kept when the optimizer does not drain them.
const MAX_PENDING_ALERTS: usize = 1000;

/// Relative change between the two halves of the history window below
/// which a metric counts as stable.
const TREND_TOLERANCE: f64 = 0.10;
/// Absolute changes smaller than these are never a trend.
const MIN_RESPONSE_TIME_CHANGE_SECS: f64 = 0.1;
const MIN_ERROR_RATE_CHANGE_PCT: f64 = 1.0;

/// One worker's health at the end of a polling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Id of the observed worker.
    pub worker_id: String,
    /// Name of the observed worker.
    pub worker_name: String,
    /// Status at collection time.
    pub status: WorkerStatus,
    /// Mean latency over the metrics window.
    pub response_time_secs: f64,
    /// Failed share of samples in the window, 0-100.
    pub error_rate_pct: f64,
    /// `100 - error_rate_pct`, or 100 with no samples.
    pub success_rate_pct: f64,
    /// Reported CPU usage.
    pub cpu_pct: f64,
    /// Reported memory usage.
    pub memory_pct: f64,
    /// Reported queue depth, at least the in-flight count.
    pub queue_depth: u64,
    /// Lifetime completed count.
    pub tasks_completed: u64,
    /// Lifetime failed count.
    pub tasks_failed: u64,
    /// Last invocation start or settle.
    pub last_activity: Option<DateTime<Utc>>,
    /// When the snapshot was taken.
    pub collected_at: DateTime<Utc>,
    /// Set when metrics could not be collected and the snapshot is synthetic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_error: Option<String>,
}

impl HealthSnapshot {
    fn from_metrics(worker: &WorkerHandle, metrics: WorkerMetrics) -> Self {
        let success_rate_pct = if metrics.samples == 0 {
            100.0
        } else {
            100.0 - metrics.error_rate_pct
        };
        Self {
            worker_id: worker.id().to_string(),
            worker_name: worker.name().to_string(),
            status: worker.status(),
            response_time_secs: metrics.latency_secs,
            error_rate_pct: metrics.error_rate_pct,
            success_rate_pct,
            cpu_pct: metrics.cpu_pct,
            memory_pct: metrics.memory_pct,
            queue_depth: metrics.queue_depth.max(u64::from(worker.in_flight())),
            tasks_completed: worker.tasks_completed(),
            tasks_failed: worker.tasks_failed(),
            last_activity: worker.last_activity(),
            collected_at: Utc::now(),
            collection_error: None,
        }
    }

    fn collection_failed(worker: &WorkerHandle, error: &ForemanError) -> Self {
        Self {
            worker_id: worker.id().to_string(),
            worker_name: worker.name().to_string(),
            status: WorkerStatus::Error,
            response_time_secs: 0.0,
            error_rate_pct: 100.0,
            success_rate_pct: 0.0,
            cpu_pct: 0.0,
            memory_pct: 0.0,
            queue_depth: u64::from(worker.in_flight()),
            tasks_completed: worker.tasks_completed(),
            tasks_failed: worker.tasks_failed(),
            last_activity: worker.last_activity(),
            collected_at: Utc::now(),
            collection_error: Some(error.to_string()),
        }
    }
}

/// Grouping used by the health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    /// Response time.
    Performance,
    /// Memory, CPU, or queue depth.
    Resource,
    /// Error rate or worker status.
    Reliability,
}

/// Metric an alert was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Mean latency.
    ResponseTime,
    /// Failed share of samples.
    ErrorRate,
    /// Memory usage.
    Memory,
    /// CPU usage.
    Cpu,
    /// Queued plus in-flight work.
    QueueDepth,
    /// Worker reported `error` or `offline`.
    Status,
}

impl AlertMetric {
    /// Category the metric reports under.
    pub fn category(&self) -> AlertCategory {
        match self {
            AlertMetric::ResponseTime => AlertCategory::Performance,
            AlertMetric::ErrorRate | AlertMetric::Status => AlertCategory::Reliability,
            AlertMetric::Memory | AlertMetric::Cpu | AlertMetric::QueueDepth => {
                AlertCategory::Resource
            }
        }
    }

    /// Corrective action the optimizer takes for this metric.
    pub fn suggested_action(&self) -> ActionKind {
        match self {
            AlertMetric::ResponseTime | AlertMetric::Cpu | AlertMetric::QueueDepth => {
                ActionKind::ScaleUp
            }
            AlertMetric::ErrorRate | AlertMetric::Status => ActionKind::Restart,
            AlertMetric::Memory => ActionKind::ClearCache,
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertMetric::ResponseTime => "response_time",
            AlertMetric::ErrorRate => "error_rate",
            AlertMetric::Memory => "memory",
            AlertMetric::Cpu => "cpu",
            AlertMetric::QueueDepth => "queue_depth",
            AlertMetric::Status => "status",
        };
        f.write_str(s)
    }
}

/// A threshold violation observed in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert id.
    pub id: Uuid,
    /// Category of `metric`.
    pub category: AlertCategory,
    /// Metric that crossed its threshold.
    pub metric: AlertMetric,
    /// Worker the alert is about.
    pub worker_id: String,
    /// Observed value.
    pub value: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Action the optimizer will take.
    pub suggested_action: ActionKind,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Alert for `metric`, with category and action derived from it.
    pub fn new(metric: AlertMetric, worker_id: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: metric.category(),
            metric,
            worker_id: worker_id.into(),
            value,
            threshold,
            suggested_action: metric.suggested_action(),
            created_at: Utc::now(),
        }
    }
}

/// System-wide health derived from pending alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    /// No pending alerts.
    Healthy,
    /// Pending alerts, none about reliability.
    Warning,
    /// At least one pending reliability alert.
    Critical,
}

/// Summary of the latest cycle and the pending alert queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall classification.
    pub overall: OverallHealth,
    /// Registered workers, coordinator included.
    pub total_workers: usize,
    /// Alerts waiting for the optimizer.
    pub pending_alerts: usize,
    /// Pending performance alerts.
    pub performance_alerts: usize,
    /// Pending resource alerts.
    pub resource_alerts: usize,
    /// Pending reliability alerts.
    pub reliability_alerts: usize,
    /// Latest snapshot per worker, registration order.
    pub workers: Vec<HealthSnapshot>,
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
}

/// Direction of a metric across the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Later samples are meaningfully higher.
    Increasing,
    /// Later samples are meaningfully lower.
    Decreasing,
    /// Within tolerance, or too few samples.
    Stable,
}

impl TrendDirection {
    /// Classify the change from `earlier` to `later`.
    fn between(earlier: f64, later: f64, min_change: f64) -> Self {
        let change = later - earlier;
        if change.abs() < min_change.max(earlier.abs() * TREND_TOLERANCE) {
            TrendDirection::Stable
        } else if change > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        }
    }
}

/// Per-worker trend over the retained snapshot history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTrend {
    /// Worker the trend is about.
    pub worker_id: String,
    /// Snapshots the trend was computed from.
    pub samples: usize,
    /// Direction of mean response time.
    pub response_time: TrendDirection,
    /// Direction of error rate.
    pub error_rate: TrendDirection,
    /// Later-half mean minus earlier-half mean, in seconds.
    pub response_time_change_secs: f64,
    /// Later-half mean minus earlier-half mean, in percentage points.
    pub error_rate_change_pct: f64,
}

impl WorkerTrend {
    /// Synthetic snapshots from failed collections are skipped.
    fn from_history<'a>(worker_id: &str, history: impl Iterator<Item = &'a HealthSnapshot>) -> Self {
        let samples: Vec<&HealthSnapshot> = history.filter(|s| s.collection_error.is_none()).collect();
        let (earlier, later) = samples.split_at(samples.len() / 2);

        let (response_time_change_secs, error_rate_change_pct) = if earlier.is_empty() {
            (0.0, 0.0)
        } else {
            (
                mean(later, |s| s.response_time_secs) - mean(earlier, |s| s.response_time_secs),
                mean(later, |s| s.error_rate_pct) - mean(earlier, |s| s.error_rate_pct),
            )
        };
        let direction = |metric: fn(&HealthSnapshot) -> f64, min_change: f64| {
            if earlier.is_empty() {
                TrendDirection::Stable
            } else {
                TrendDirection::between(mean(earlier, metric), mean(later, metric), min_change)
            }
        };

        Self {
            worker_id: worker_id.to_string(),
            samples: samples.len(),
            response_time: direction(|s| s.response_time_secs, MIN_RESPONSE_TIME_CHANGE_SECS),
            error_rate: direction(|s| s.error_rate_pct, MIN_ERROR_RATE_CHANGE_PCT),
            response_time_change_secs,
            error_rate_change_pct,
        }
    }
}

fn mean(snapshots: &[&HealthSnapshot], metric: impl Fn(&HealthSnapshot) -> f64) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    snapshots.iter().map(|&s| metric(s)).sum::<f64>() / snapshots.len() as f64
}

/// What makes a worker a bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckIssue {
    /// Response time above the bottleneck limit.
    SlowResponse,
    /// Error rate above the bottleneck limit.
    HighErrors,
}

/// How urgently a bottleneck should be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckPriority {
    /// Degraded performance.
    High,
    /// Failing work.
    Critical,
}

/// A worker whose latest snapshot exceeds a bottleneck limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Worker the bottleneck is about.
    pub worker_id: String,
    /// What was exceeded.
    pub issue: BottleneckIssue,
    /// Observed value.
    pub value: f64,
    /// Configured limit.
    pub threshold: f64,
    /// Urgency.
    pub priority: BottleneckPriority,
}

impl Bottleneck {
    fn detect(snapshot: &HealthSnapshot, limits: &BottleneckThresholds) -> Vec<Bottleneck> {
        let mut found = Vec::new();
        if snapshot.response_time_secs > limits.response_time_secs {
            found.push(Bottleneck {
                worker_id: snapshot.worker_id.clone(),
                issue: BottleneckIssue::SlowResponse,
                value: snapshot.response_time_secs,
                threshold: limits.response_time_secs,
                priority: BottleneckPriority::High,
            });
        }
        if snapshot.error_rate_pct > limits.error_rate_pct {
            found.push(Bottleneck {
                worker_id: snapshot.worker_id.clone(),
                issue: BottleneckIssue::HighErrors,
                value: snapshot.error_rate_pct,
                threshold: limits.error_rate_pct,
                priority: BottleneckPriority::Critical,
            });
        }
        found
    }
}

/// Trends and bottlenecks over every worker with retained history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    /// One entry per monitored worker, registration order.
    pub workers: Vec<WorkerTrend>,
    /// Bottlenecks, most urgent first.
    pub bottlenecks: Vec<Bottleneck>,
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
}

/// Polls every registered worker, keeps bounded snapshot history, and raises alerts.
///
/// Alerts are not deduplicated across cycles; a persisting problem re-alerts
/// each cycle until [`auto_optimize`](Self::auto_optimize) drains them.
pub struct HealthMonitor {
    registry: Arc<CapabilityRegistry>,
    metrics: Arc<dyn MetricsSource>,
    optimizer: Optimizer,
    config: MonitorConfig,
    history: Mutex<HashMap<String, VecDeque<HealthSnapshot>>>,
    pending: Mutex<VecDeque<Alert>>,
}

impl HealthMonitor {
    /// Monitor over `registry`, reading metrics from `metrics` and applying
    /// corrective actions through `executor`.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        metrics: Arc<dyn MetricsSource>,
        executor: Arc<dyn ActionExecutor>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            optimizer: Optimizer::new(executor, config.autoscaling.clone()),
            config,
            history: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Optimizer fed by [`auto_optimize`](Self::auto_optimize).
    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    /// Collect one worker's snapshot. Never fails: a check error or panic
    /// yields a synthetic `error` snapshot.
    pub async fn collect_snapshot(&self, worker: &WorkerHandle) -> HealthSnapshot {
        let check = async {
            worker.worker().health_check().await?;
            self.metrics
                .get_metrics(worker.id(), self.config.metrics_window())
                .await
        };
        let outcome = tokio::time::timeout(
            self.config.interval(),
            AssertUnwindSafe(check).catch_unwind(),
        )
        .await;

        let collected = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ForemanError::Monitor(format!(
                "health check panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(ForemanError::Monitor("health check timed out".into())),
        };

        match collected {
            Ok(metrics) => HealthSnapshot::from_metrics(worker, metrics),
            Err(e) => {
                warn!(worker_id = %worker.id(), error = %e, "Health collection failed");
                HealthSnapshot::collection_failed(worker, &e)
            }
        }
    }

    /// Alerts for `snapshot`, at most one per metric.
    pub fn evaluate(&self, snapshot: &HealthSnapshot) -> Vec<Alert> {
        let t = &self.config.thresholds;
        let id = snapshot.worker_id.as_str();
        let mut alerts = Vec::new();

        if snapshot.response_time_secs > t.response_time_secs {
            alerts.push(Alert::new(
                AlertMetric::ResponseTime,
                id,
                snapshot.response_time_secs,
                t.response_time_secs,
            ));
        }
        if snapshot.error_rate_pct > t.error_rate_pct {
            alerts.push(Alert::new(
                AlertMetric::ErrorRate,
                id,
                snapshot.error_rate_pct,
                t.error_rate_pct,
            ));
        } else if matches!(snapshot.status, WorkerStatus::Error | WorkerStatus::Offline) {
            alerts.push(Alert::new(
                AlertMetric::Status,
                id,
                snapshot.error_rate_pct,
                t.error_rate_pct,
            ));
        }
        if snapshot.memory_pct > t.memory_pct {
            alerts.push(Alert::new(AlertMetric::Memory, id, snapshot.memory_pct, t.memory_pct));
        }
        if snapshot.cpu_pct > t.cpu_pct {
            alerts.push(Alert::new(AlertMetric::Cpu, id, snapshot.cpu_pct, t.cpu_pct));
        }
        if snapshot.queue_depth > t.queue_depth {
            alerts.push(Alert::new(
                AlertMetric::QueueDepth,
                id,
                snapshot.queue_depth as f64,
                t.queue_depth as f64,
            ));
        }
        alerts
    }

    /// Run one polling cycle over every registered worker.
    ///
    /// Returns the alerts raised in this cycle; they are also queued for
    /// [`auto_optimize`](Self::auto_optimize).
    pub async fn run_cycle(&self) -> Vec<Alert> {
        let workers = self.registry.workers();
        let mut alerts = Vec::new();
        for worker in &workers {
            let snapshot = self.collect_snapshot(worker).await;
            alerts.extend(self.evaluate(&snapshot));
            self.store(snapshot);
        }

        for alert in &alerts {
            warn!(
                worker_id = %alert.worker_id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "Health alert"
            );
        }
        self.enqueue(&alerts);
        debug!(workers = workers.len(), alerts = alerts.len(), "Health cycle finished");
        alerts
    }

    fn store(&self, snapshot: HealthSnapshot) {
        let mut history = self.history.lock();
        let entries = history.entry(snapshot.worker_id.clone()).or_default();
        entries.push_back(snapshot);
        while entries.len() > self.config.history_limit {
            entries.pop_front();
        }
    }

    fn enqueue(&self, alerts: &[Alert]) {
        let mut pending = self.pending.lock();
        pending.extend(alerts.iter().cloned());
        let overflow = pending.len().saturating_sub(MAX_PENDING_ALERTS);
        if overflow > 0 {
            pending.drain(..overflow);
            warn!(dropped = overflow, "Pending alert queue full; dropped oldest alerts");
        }
    }

    /// Most recent snapshot for `worker_id`.
    pub fn latest_snapshot(&self, worker_id: &str) -> Option<HealthSnapshot> {
        self.history
            .lock()
            .get(worker_id)
            .and_then(|entries| entries.back().cloned())
    }

    /// Retained snapshots for `worker_id`, oldest first.
    pub fn history(&self, worker_id: &str) -> Vec<HealthSnapshot> {
        self.history
            .lock()
            .get(worker_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Alerts raised since the last [`auto_optimize`](Self::auto_optimize), oldest first.
    pub fn pending_alerts(&self) -> Vec<Alert> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Overall health from pending alerts, plus each worker's latest snapshot.
    pub fn health_report(&self) -> HealthReport {
        let pending = self.pending_alerts();
        let count = |category: AlertCategory| pending.iter().filter(|a| a.category == category).count();
        let reliability_alerts = count(AlertCategory::Reliability);
        let overall = if reliability_alerts > 0 {
            OverallHealth::Critical
        } else if !pending.is_empty() {
            OverallHealth::Warning
        } else {
            OverallHealth::Healthy
        };

        let workers = self.registry.workers();
        HealthReport {
            overall,
            total_workers: workers.len(),
            pending_alerts: pending.len(),
            performance_alerts: count(AlertCategory::Performance),
            resource_alerts: count(AlertCategory::Resource),
            reliability_alerts,
            workers: workers
                .iter()
                .filter_map(|w| self.latest_snapshot(w.id()))
                .collect(),
            generated_at: Utc::now(),
        }
    }

    /// Per-worker [`TrendDirection`] of response time and error rate, from the
    /// earlier and later halves of the retained history. Bottlenecks come from
    /// each worker's latest snapshot.
    pub fn trends(&self) -> TrendReport {
        let workers = self.registry.workers();
        let history = self.history.lock();
        let mut trends = Vec::new();
        let mut bottlenecks = Vec::new();
        for worker in &workers {
            let Some(entries) = history.get(worker.id()) else {
                continue;
            };
            trends.push(WorkerTrend::from_history(worker.id(), entries.iter()));
            if let Some(latest) = entries.back() {
                bottlenecks.extend(Bottleneck::detect(latest, &self.config.bottlenecks));
            }
        }
        drop(history);

        // Stable sort keeps registration order within a priority.
        bottlenecks.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(
            workers = trends.len(),
            bottlenecks = bottlenecks.len(),
            "Trend report built"
        );
        TrendReport {
            workers: trends,
            bottlenecks,
            generated_at: Utc::now(),
        }
    }

    /// Drain pending alerts and hand them to the optimizer.
    pub async fn auto_optimize(&self) -> OptimizationReport {
        let alerts: Vec<Alert> = self.pending.lock().drain(..).collect();
        let usage = match self.metrics.system_usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                warn!(error = %e, "System usage unavailable; skipping autoscaling");
                None
            }
        };
        self.optimizer.optimize(&alerts, usage).await
    }

    /// Spawn the polling loop. It runs until the returned handle is stopped.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let interval = self.config.interval();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Health monitor started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        monitor.run_cycle().await;
                        if monitor.config.auto_optimize {
                            monitor.auto_optimize().await;
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        });
        MonitorHandle { shutdown, join }
    }
}

/// Owned lifecycle of a running monitor loop.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) -> ForemanResult<()> {
        // A send error means the loop already exited.
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| ForemanError::Monitor(format!("monitor task failed: {e}")))
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
