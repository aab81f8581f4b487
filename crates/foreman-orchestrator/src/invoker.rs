use crate::selection::SelectionStrategy;
use crate::telemetry::InMemoryTelemetry;
use foreman_core::{panic_message, ForemanError, Task, TaskResult};
use foreman_workers::WorkerHandle;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Selects a worker for a task and runs it with bookkeeping.
///
/// Shared by the dispatcher and the coordinator so both apply the same
/// timeout, failure mapping, and telemetry.
#[derive(Clone)]
pub struct Invoker {
    strategy: Arc<dyn SelectionStrategy>,
    telemetry: Arc<InMemoryTelemetry>,
    timeout: Duration,
}

impl Invoker {
    /// Invoker applying `timeout` to every call it makes.
    pub fn new(
        strategy: Arc<dyn SelectionStrategy>,
        telemetry: Arc<InMemoryTelemetry>,
        timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            telemetry,
            timeout,
        }
    }

    /// Per-invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Selection strategy.
    pub fn strategy(&self) -> &Arc<dyn SelectionStrategy> {
        &self.strategy
    }

    /// Telemetry sink fed by every invocation.
    pub fn telemetry(&self) -> &Arc<InMemoryTelemetry> {
        &self.telemetry
    }

    /// Validate `task`, select among `candidates`, and run the selected worker.
    ///
    /// Always yields a result; expected failures come back as failed results.
    pub async fn run(&self, candidates: &[Arc<WorkerHandle>], task: &Task) -> TaskResult {
        if let Err(e) = task.validate() {
            return TaskResult::failure(task, None, &e, Duration::ZERO);
        }
        let Some(worker) = self.strategy.select(candidates) else {
            let err = ForemanError::NoWorkerAvailable(task.capability.clone());
            tracing::warn!(task_id = %task.id, capability = %task.capability, "No worker available");
            return TaskResult::failure(task, None, &err, Duration::ZERO);
        };
        self.invoke(&worker, task).await
    }

    /// Run `worker` on `task` under the invocation timeout.
    ///
    /// Status and counters are settled exactly once, including when the
    /// worker errors, panics, or is abandoned on timeout.
    pub async fn invoke(&self, worker: &Arc<WorkerHandle>, task: &Task) -> TaskResult {
        let invocation = worker.begin();
        let started = Instant::now();
        let call = AssertUnwindSafe(worker.worker().process(task)).catch_unwind();
        let outcome = tokio::time::timeout(self.timeout, call).await;
        let elapsed = started.elapsed();

        let err = match outcome {
            Ok(Ok(Ok(value))) => {
                invocation.succeed();
                self.telemetry.record(worker.id(), elapsed, true);
                info!(
                    task_id = %task.id,
                    worker_id = %worker.id(),
                    capability = %task.capability,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Task completed"
                );
                return TaskResult::success(task, worker.executor(), value, elapsed);
            }
            Ok(Ok(Err(e))) => match e {
                ForemanError::WorkerExecution { .. } => e,
                other => ForemanError::worker(worker.id(), other.to_string()),
            },
            Ok(Err(panic)) => ForemanError::worker(
                worker.id(),
                format!("panicked: {}", panic_message(panic.as_ref())),
            ),
            Err(_) => ForemanError::Timeout {
                worker: worker.id().to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        invocation.fail();
        self.telemetry.record(worker.id(), elapsed, false);
        error!(
            task_id = %task.id,
            worker_id = %worker.id(),
            capability = %task.capability,
            kind = %err.kind(),
            error = %err,
            "Task failed"
        );
        TaskResult::failure(task, Some(worker.executor()), &err, elapsed)
    }
}
