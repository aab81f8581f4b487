use crate::invoker::Invoker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_core::{ForemanError, ForemanResult, Task, TaskResult, TaskSpec};
use foreman_workers::{
    TaskKind, Worker, WorkerDescriptor, WorkerHandle, WorkerRole, WorkerStatusRecord,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of a single workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Created, not started.
    Pending,
    /// Executing steps.
    Running,
    /// Every step succeeded.
    Completed,
    /// Stopped at a failed step.
    Aborted,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Running => "running",
            WorkflowState::Completed => "completed",
            WorkflowState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Outcome of delegating one task to a subordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    /// Name of the worker that handled the task, if one was selected.
    pub delegated_to: Option<String>,
    /// The subordinate's result.
    pub result: TaskResult,
}

impl DelegationResult {
    /// Whether the subordinate succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Summary returned by [`Coordinator::coordinate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    /// Id of the run.
    pub workflow_id: Uuid,
    /// Final state.
    pub state: WorkflowState,
    /// Whether every step succeeded.
    pub workflow_completed: bool,
    /// Steps attempted, including a failing final step.
    pub steps_completed: usize,
    /// Steps in the workflow.
    pub total_steps: usize,
    /// Outcome of each attempted step, in order.
    pub results: Vec<DelegationResult>,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
}

/// State machine for one workflow: `Pending -> Running -> {Completed, Aborted}`.
#[derive(Debug)]
pub struct WorkflowRun {
    id: Uuid,
    state: WorkflowState,
    total_steps: usize,
    results: Vec<DelegationResult>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// A pending run over `total_steps` steps.
    pub fn new(total_steps: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: WorkflowState::Pending,
            total_steps,
            results: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Run id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    fn transition(&mut self, next: WorkflowState) -> ForemanResult<()> {
        use WorkflowState::*;
        let allowed = matches!(
            (self.state, next),
            (Pending, Running) | (Running, Completed) | (Running, Aborted)
        );
        if !allowed {
            return Err(ForemanError::Internal(format!(
                "illegal workflow transition {} -> {next}",
                self.state
            )));
        }
        match next {
            Running => self.started_at = Some(Utc::now()),
            Completed | Aborted => self.finished_at = Some(Utc::now()),
            Pending => {}
        }
        self.state = next;
        Ok(())
    }

    /// Begin execution. A workflow with no steps completes immediately.
    pub fn start(&mut self) -> ForemanResult<()> {
        self.transition(WorkflowState::Running)?;
        if self.total_steps == 0 {
            self.transition(WorkflowState::Completed)?;
        }
        Ok(())
    }

    /// Record the next step's outcome. A failed step aborts the run.
    pub fn record(&mut self, step: DelegationResult) -> ForemanResult<()> {
        if self.state != WorkflowState::Running {
            return Err(ForemanError::Internal(format!(
                "cannot record a step while workflow is {}",
                self.state
            )));
        }
        let failed = !step.is_success();
        self.results.push(step);
        if failed {
            self.transition(WorkflowState::Aborted)
        } else if self.results.len() >= self.total_steps {
            self.transition(WorkflowState::Completed)
        } else {
            Ok(())
        }
    }

    /// Summary of the run so far.
    pub fn into_report(self) -> WorkflowReport {
        WorkflowReport {
            workflow_id: self.id,
            state: self.state,
            workflow_completed: self.state == WorkflowState::Completed,
            steps_completed: self.results.len(),
            total_steps: self.total_steps,
            results: self.results,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Summary produced by [`Coordinator::aggregate_results`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    /// Results considered.
    pub total_results: usize,
    /// Successful results.
    pub successful: usize,
    /// Failed results.
    pub failed: usize,
    /// `successful / total_results`, 0 when there are no results.
    pub success_rate: f64,
    /// The inputs, unchanged.
    pub aggregated_data: Vec<TaskResult>,
}

/// Subordinates known to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSummary {
    /// Number of subordinates.
    pub total_agents: usize,
    /// Status record per subordinate, registration order.
    pub agents: Vec<WorkerStatusRecord>,
}

/// Parsed form of a task addressed to the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorRequest {
    /// Run the task on a capable subordinate.
    Delegate(Task),
    /// Run the steps in order, stopping at the first failure.
    Coordinate(Vec<TaskSpec>),
    /// Summarize existing results.
    Aggregate(Vec<TaskResult>),
}

#[derive(Deserialize)]
struct CoordinatePayload {
    #[serde(default)]
    workflow: Vec<TaskSpec>,
}

#[derive(Deserialize)]
struct AggregatePayload {
    #[serde(default)]
    results: Vec<TaskResult>,
}

impl CoordinatorRequest {
    /// Parse `task`. A task whose type is not a coordinator kind is itself
    /// the delegation target.
    pub fn from_task(task: &Task) -> ForemanResult<Self> {
        let payload = Value::Object(task.payload.clone());
        let invalid = |e: serde_json::Error| {
            ForemanError::InvalidTask(format!("Malformed {} request: {e}", task.task_type))
        };

        match TaskKind::parse_for(WorkerRole::Boss, &task.task_type) {
            Some(TaskKind::Delegate) => {
                let spec: TaskSpec = serde_json::from_value(payload).map_err(invalid)?;
                Ok(Self::Delegate(spec.to_task(task.correlation_id.as_deref())))
            }
            Some(TaskKind::Coordinate) => {
                let body: CoordinatePayload = serde_json::from_value(payload).map_err(invalid)?;
                Ok(Self::Coordinate(body.workflow))
            }
            Some(TaskKind::Aggregate) => {
                let body: AggregatePayload = serde_json::from_value(payload).map_err(invalid)?;
                Ok(Self::Aggregate(body.results))
            }
            _ if WorkerRole::Boss
                .default_capabilities()
                .contains(&task.capability.as_str()) =>
            {
                Err(ForemanError::InvalidTask(format!(
                    "Unknown task type: {}",
                    task.task_type
                )))
            }
            _ => Ok(Self::Delegate(task.clone())),
        }
    }
}

/// Worker that delegates to subordinates, runs workflows, and aggregates results.
///
/// Its subordinate list is separate from the global registry and bounds the
/// scope of delegation.
pub struct Coordinator {
    descriptor: WorkerDescriptor,
    subordinates: RwLock<Vec<Arc<WorkerHandle>>>,
    invoker: Invoker,
}

impl Coordinator {
    /// Coordinator with no subordinates, invoking through `invoker`.
    pub fn new(invoker: Invoker) -> Self {
        let role = WorkerRole::Boss;
        Self {
            descriptor: WorkerDescriptor::new(role.to_string(), role.default_capabilities().iter().copied())
                .with_role(role),
            subordinates: RwLock::new(Vec::new()),
            invoker,
        }
    }

    /// Add a subordinate. Rejects the coordinator itself and repeated ids.
    pub fn register_agent(&self, worker: Arc<WorkerHandle>) -> ForemanResult<()> {
        if worker.id() == self.descriptor.id() {
            return Err(ForemanError::InvalidWorker(
                "coordinator cannot be its own subordinate".into(),
            ));
        }
        let mut subordinates = self.subordinates.write();
        if subordinates.iter().any(|w| w.id() == worker.id()) {
            return Err(ForemanError::DuplicateWorker(worker.id().to_string()));
        }
        info!(worker_id = %worker.id(), worker = %worker.name(), "Registered subordinate");
        subordinates.push(worker);
        Ok(())
    }

    /// Status of every subordinate.
    pub fn get_agent_status_summary(&self) -> AgentStatusSummary {
        let agents: Vec<WorkerStatusRecord> = self
            .subordinates
            .read()
            .iter()
            .map(|w| w.status_record())
            .collect();
        AgentStatusSummary {
            total_agents: agents.len(),
            agents,
        }
    }

    fn subordinates_for(&self, capability: &str) -> Vec<Arc<WorkerHandle>> {
        self.subordinates
            .read()
            .iter()
            .filter(|w| w.descriptor().supports(capability))
            .cloned()
            .collect()
    }

    /// Run `task` on the first suitable subordinate.
    pub async fn delegate_task(&self, task: &Task) -> DelegationResult {
        let candidates = self.subordinates_for(&task.capability);
        let result = self.invoker.run(&candidates, task).await;
        DelegationResult {
            delegated_to: result.worker_name().map(str::to_string),
            result,
        }
    }

    /// Run `workflow` steps in order, stopping at the first failed step.
    ///
    /// Completed steps are not rolled back when a later one fails.
    pub async fn coordinate(
        &self,
        workflow: &[TaskSpec],
        correlation_id: Option<&str>,
    ) -> ForemanResult<WorkflowReport> {
        let mut run = WorkflowRun::new(workflow.len());
        let correlation = correlation_id
            .map(str::to_string)
            .unwrap_or_else(|| run.id().to_string());
        run.start()?;
        info!(workflow_id = %run.id(), steps = workflow.len(), "Workflow started");

        for (index, spec) in workflow.iter().enumerate() {
            let step = spec.to_task(Some(&correlation));
            let outcome = self.delegate_task(&step).await;
            let failed = !outcome.is_success();
            run.record(outcome)?;
            if failed {
                warn!(
                    workflow_id = %run.id(),
                    step = index + 1,
                    capability = %spec.capability,
                    "Workflow aborted"
                );
                break;
            }
        }

        let report = run.into_report();
        info!(
            workflow_id = %report.workflow_id,
            state = %report.state,
            steps_completed = report.steps_completed,
            "Workflow finished"
        );
        Ok(report)
    }

    /// Partition `results` by success flag.
    pub fn aggregate_results(results: &[TaskResult]) -> Aggregation {
        let aggregated_data: Vec<TaskResult> =
            results.iter().filter(|r| r.is_success()).cloned().collect();
        let total = results.len();
        let successful = aggregated_data.len();
        Aggregation {
            total_results: total,
            successful,
            failed: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            aggregated_data,
        }
    }
}

#[async_trait]
impl Worker for Coordinator {
    fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    async fn process(&self, task: &Task) -> ForemanResult<Value> {
        match CoordinatorRequest::from_task(task)? {
            CoordinatorRequest::Delegate(target) => {
                // A subordinate failure is reported in the outcome; the
                // coordinator itself did its job.
                let outcome = self.delegate_task(&target).await;
                Ok(serde_json::to_value(outcome)?)
            }
            CoordinatorRequest::Coordinate(workflow) => {
                let report = self
                    .coordinate(&workflow, task.correlation_id.as_deref())
                    .await?;
                Ok(serde_json::to_value(report)?)
            }
            CoordinatorRequest::Aggregate(results) => {
                Ok(serde_json::to_value(Self::aggregate_results(&results))?)
            }
        }
    }
}
