use crate::coordinator::{CoordinatorRequest, DelegationResult};
use crate::invoker::Invoker;
use crate::selection::{strategy_for, SelectionStrategy};
use crate::telemetry::InMemoryTelemetry;
use foreman_core::{DispatchConfig, ForemanError, Task, TaskError, TaskResult};
use foreman_workers::{CapabilityRegistry, WorkerHandle, WorkerStatusRecord};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes tasks to registered workers by capability.
///
/// Every call returns a [`TaskResult`]; expected failures (invalid task, no
/// worker, worker error, timeout, missing coordinator) are reported in the
/// result, never as an `Err`.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    invoker: Invoker,
}

impl Dispatcher {
    /// Dispatcher over `registry` using the configured timeout and selection policy.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        telemetry: Arc<InMemoryTelemetry>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            invoker: Invoker::new(strategy_for(config.selection), telemetry, config.task_timeout()),
        }
    }

    /// Replace the selection strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.invoker = Invoker::new(
            strategy,
            Arc::clone(self.invoker.telemetry()),
            self.invoker.timeout(),
        );
        self
    }

    /// Execute `task` on a worker declaring its capability.
    pub async fn execute(&self, task: &Task) -> TaskResult {
        let candidates = self.registry.find_by_capability(&task.capability);
        debug!(
            task_id = %task.id,
            capability = %task.capability,
            candidates = candidates.len(),
            strategy = self.invoker.strategy().name(),
            "Dispatching task"
        );
        self.invoker.run(&candidates, task).await
    }

    /// Route `task` through the coordinator rather than by capability.
    pub async fn delegate(&self, task: &Task) -> TaskResult {
        if let Err(e) = task.validate() {
            return TaskResult::failure(task, None, &e, Duration::ZERO);
        }
        let Some(coordinator) = self.registry.coordinator() else {
            warn!(task_id = %task.id, "Delegate requested with no coordinator registered");
            return TaskResult::failure(
                task,
                None,
                &ForemanError::CoordinatorUnavailable,
                Duration::ZERO,
            );
        };
        let result = self.invoker.invoke(&coordinator, task).await;
        Self::surface_delegation_failure(task, &coordinator, result)
    }

    /// A delegation whose subordinate failed comes back from the coordinator
    /// as a successful outcome. Re-report it as a failure carrying the
    /// subordinate's error. The coordinator itself was charged with a success.
    fn surface_delegation_failure(
        task: &Task,
        coordinator: &WorkerHandle,
        result: TaskResult,
    ) -> TaskResult {
        if !result.is_success()
            || !matches!(
                CoordinatorRequest::from_task(task),
                Ok(CoordinatorRequest::Delegate(_))
            )
        {
            return result;
        }
        let Some(outcome) = result
            .result()
            .and_then(|v| serde_json::from_value::<DelegationResult>(v.clone()).ok())
        else {
            return result;
        };
        let Some(inner) = outcome.result.error() else {
            return result;
        };
        warn!(
            task_id = %task.id,
            delegated_to = outcome.delegated_to.as_deref().unwrap_or("none"),
            kind = %inner.kind,
            "Delegated task failed"
        );
        let error = TaskError {
            kind: inner.kind,
            message: format!("delegation failed: {}", inner.message),
        };
        TaskResult::failure_with(task, Some(coordinator.executor()), error, result.elapsed())
    }

    /// Capabilities advertised by the registered workers.
    pub fn capabilities(&self) -> BTreeSet<String> {
        self.registry.all_capabilities()
    }

    /// Status records of every registered worker.
    pub fn status(&self) -> Vec<WorkerStatusRecord> {
        self.registry.status_snapshot()
    }

    /// The registry tasks are routed over.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Invocation settings shared with the coordinator.
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }
}
