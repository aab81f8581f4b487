use crate::monitor::Alert;
use crate::telemetry::SystemUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_core::{AutoscalingConfig, ForemanResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Kind of corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Add capacity.
    ScaleUp,
    /// Remove capacity.
    ScaleDown,
    /// Restart a worker.
    Restart,
    /// Flush a worker's caches.
    ClearCache,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::ScaleUp => "scale_up",
            ActionKind::ScaleDown => "scale_down",
            ActionKind::Restart => "restart",
            ActionKind::ClearCache => "clear_cache",
        };
        f.write_str(s)
    }
}

/// A planned action. `worker_id` is `None` for system-wide scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveAction {
    /// What to do.
    pub kind: ActionKind,
    /// Target worker.
    pub worker_id: Option<String>,
    /// Why the action was planned.
    pub reason: String,
    /// Alert that triggered the action, if any.
    pub alert_id: Option<Uuid>,
}

/// Result of applying one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// The planned action.
    pub action: CorrectiveAction,
    /// Whether the executor succeeded.
    pub applied: bool,
    /// Executor output, or its error.
    pub detail: String,
}

/// Result of one optimizer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Alerts drained for this run.
    pub alerts_consumed: usize,
    /// System usage, when available.
    pub system_usage: Option<SystemUsage>,
    /// Every attempted action.
    pub actions: Vec<ActionOutcome>,
    /// System instance count after the run.
    pub instances: u32,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

impl OptimizationReport {
    /// Number of actions applied successfully.
    pub fn applied(&self) -> usize {
        self.actions.iter().filter(|a| a.applied).count()
    }
}

/// Carries out corrective actions (container scaling, restarts, cache flushes).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Apply `action` and describe what was done.
    async fn apply(&self, action: &CorrectiveAction) -> ForemanResult<String>;
}

/// Executor that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActionExecutor;

#[async_trait]
impl ActionExecutor for NoopActionExecutor {
    async fn apply(&self, action: &CorrectiveAction) -> ForemanResult<String> {
        info!(
            action = %action.kind,
            worker_id = action.worker_id.as_deref().unwrap_or("system"),
            reason = %action.reason,
            "No-op corrective action"
        );
        Ok(format!("{} acknowledged (no-op)", action.kind))
    }
}

/// Maps alerts and system usage to corrective actions and applies them.
///
/// System scaling uses separate up and down thresholds and stays within
/// `[min_instances, max_instances]`.
pub struct Optimizer {
    executor: Arc<dyn ActionExecutor>,
    autoscaling: AutoscalingConfig,
    instances: Mutex<u32>,
}

impl Optimizer {
    /// Optimizer starting at `min_instances`.
    pub fn new(executor: Arc<dyn ActionExecutor>, autoscaling: AutoscalingConfig) -> Self {
        let instances = autoscaling.min_instances;
        Self {
            executor,
            autoscaling,
            instances: Mutex::new(instances),
        }
    }

    /// Current system instance count.
    pub fn instances(&self) -> u32 {
        *self.instances.lock()
    }

    /// One action per alert, in alert order.
    pub fn plan_for_alerts(alerts: &[Alert]) -> Vec<CorrectiveAction> {
        alerts
            .iter()
            .map(|alert| CorrectiveAction {
                kind: alert.suggested_action,
                worker_id: Some(alert.worker_id.clone()),
                reason: format!("{} {:.2} exceeds {:.2}", alert.metric, alert.value, alert.threshold),
                alert_id: Some(alert.id),
            })
            .collect()
    }

    /// System scaling decisions for `usage`.
    pub fn plan_for_system(&self, usage: SystemUsage) -> Vec<CorrectiveAction> {
        let up = self.autoscaling.scale_up_pct;
        let down = self.autoscaling.scale_down_pct;
        let system = |kind, reason: &str| CorrectiveAction {
            kind,
            worker_id: None,
            reason: reason.to_string(),
            alert_id: None,
        };

        let mut actions = Vec::new();
        if usage.cpu_pct > up {
            actions.push(system(ActionKind::ScaleUp, "cpu_high"));
        }
        if usage.memory_pct > up {
            actions.push(system(ActionKind::ScaleUp, "memory_high"));
        }
        if actions.is_empty() && usage.cpu_pct < down && usage.memory_pct < down {
            actions.push(system(ActionKind::ScaleDown, "resources_low"));
        }
        actions
    }

    /// Plan and apply actions for `alerts` and `usage`.
    ///
    /// Executor failures are recorded in the report, never returned.
    pub async fn optimize(&self, alerts: &[Alert], usage: Option<SystemUsage>) -> OptimizationReport {
        let mut planned = Self::plan_for_alerts(alerts);
        if let Some(usage) = usage {
            planned.extend(self.plan_for_system(usage));
        }

        let mut actions = Vec::with_capacity(planned.len());
        for action in planned {
            if action.worker_id.is_none() && !self.within_bounds(action.kind) {
                actions.push(ActionOutcome {
                    detail: format!("skipped: instance bound reached ({})", self.instances()),
                    applied: false,
                    action,
                });
                continue;
            }
            let outcome = match self.executor.apply(&action).await {
                Ok(detail) => {
                    if action.worker_id.is_none() {
                        self.adjust_instances(action.kind);
                    }
                    ActionOutcome {
                        action,
                        applied: true,
                        detail,
                    }
                }
                Err(e) => {
                    warn!(action = %action.kind, error = %e, "Corrective action failed");
                    ActionOutcome {
                        action,
                        applied: false,
                        detail: e.to_string(),
                    }
                }
            };
            actions.push(outcome);
        }

        let report = OptimizationReport {
            alerts_consumed: alerts.len(),
            system_usage: usage,
            actions,
            instances: self.instances(),
            completed_at: Utc::now(),
        };
        info!(
            alerts = report.alerts_consumed,
            actions = report.actions.len(),
            applied = report.applied(),
            instances = report.instances,
            "Optimization run finished"
        );
        report
    }

    fn within_bounds(&self, kind: ActionKind) -> bool {
        let instances = self.instances();
        match kind {
            ActionKind::ScaleUp => instances < self.autoscaling.max_instances,
            ActionKind::ScaleDown => instances > self.autoscaling.min_instances,
            ActionKind::Restart | ActionKind::ClearCache => true,
        }
    }

    fn adjust_instances(&self, kind: ActionKind) {
        let mut instances = self.instances.lock();
        match kind {
            ActionKind::ScaleUp => *instances = instances.saturating_add(1),
            ActionKind::ScaleDown => *instances = instances.saturating_sub(1),
            ActionKind::Restart | ActionKind::ClearCache => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::monitor::AlertMetric;
    use foreman_core::ForemanError;

    struct Recording {
        applied: Mutex<Vec<CorrectiveAction>>,
        fail_restarts: bool,
    }

    #[async_trait]
    impl ActionExecutor for Recording {
        async fn apply(&self, action: &CorrectiveAction) -> ForemanResult<String> {
            if self.fail_restarts && action.kind == ActionKind::Restart {
                return Err(ForemanError::Monitor("orchestrator unreachable".into()));
            }
            self.applied.lock().push(action.clone());
            Ok("ok".into())
        }
    }

    fn recording(fail_restarts: bool) -> Arc<Recording> {
        Arc::new(Recording {
            applied: Mutex::new(Vec::new()),
            fail_restarts,
        })
    }

    fn alert(metric: AlertMetric) -> Alert {
        Alert::new(metric, "w1", 10.0, 5.0)
    }

    #[test]
    fn test_alert_mapping() {
        let plan = Optimizer::plan_for_alerts(&[
            alert(AlertMetric::ResponseTime),
            alert(AlertMetric::ErrorRate),
            alert(AlertMetric::Memory),
            alert(AlertMetric::QueueDepth),
            alert(AlertMetric::Cpu),
            alert(AlertMetric::Status),
        ]);
        let kinds: Vec<ActionKind> = plan.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::ScaleUp,
                ActionKind::Restart,
                ActionKind::ClearCache,
                ActionKind::ScaleUp,
                ActionKind::ScaleUp,
                ActionKind::Restart,
            ]
        );
        assert!(plan.iter().all(|a| a.worker_id.as_deref() == Some("w1")));
    }

    #[test]
    fn test_hysteresis() {
        let optimizer = Optimizer::new(Arc::new(NoopActionExecutor), AutoscalingConfig::default());
        let both_high = optimizer.plan_for_system(SystemUsage {
            cpu_pct: 95.0,
            memory_pct: 80.0,
        });
        assert_eq!(both_high.len(), 2);
        assert!(both_high.iter().all(|a| a.kind == ActionKind::ScaleUp));

        let low = optimizer.plan_for_system(SystemUsage {
            cpu_pct: 10.0,
            memory_pct: 20.0,
        });
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].kind, ActionKind::ScaleDown);

        // Between the thresholds nothing happens.
        let middle = optimizer.plan_for_system(SystemUsage {
            cpu_pct: 50.0,
            memory_pct: 20.0,
        });
        assert!(middle.is_empty());
    }

    #[tokio::test]
    async fn test_executor_errors_are_recorded() {
        let executor = recording(true);
        let optimizer = Optimizer::new(executor.clone(), AutoscalingConfig::default());
        let report = optimizer
            .optimize(&[alert(AlertMetric::ErrorRate), alert(AlertMetric::Memory)], None)
            .await;

        assert_eq!(report.alerts_consumed, 2);
        assert_eq!(report.actions.len(), 2);
        assert!(!report.actions[0].applied);
        assert!(report.actions[0].detail.contains("orchestrator unreachable"));
        assert!(report.actions[1].applied);
        assert_eq!(executor.applied.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_instance_bounds() {
        let executor = recording(false);
        let optimizer = Optimizer::new(
            executor.clone(),
            AutoscalingConfig {
                min_instances: 1,
                max_instances: 2,
                ..AutoscalingConfig::default()
            },
        );
        let hot = SystemUsage {
            cpu_pct: 99.0,
            memory_pct: 99.0,
        };

        // Two scale-ups planned, only one fits under the maximum.
        let report = optimizer.optimize(&[], Some(hot)).await;
        assert_eq!(report.applied(), 1);
        assert_eq!(optimizer.instances(), 2);

        let cold = SystemUsage {
            cpu_pct: 1.0,
            memory_pct: 1.0,
        };
        optimizer.optimize(&[], Some(cold)).await;
        assert_eq!(optimizer.instances(), 1);
        let report = optimizer.optimize(&[], Some(cold)).await;
        assert_eq!(report.applied(), 0);
        assert_eq!(optimizer.instances(), 1);
    }
}
