use crate::error::{ErrorKind, ForemanError, ForemanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Structured key/value payload carried by tasks.
pub type Payload = Map<String, Value>;

/// A unit of requested work.
///
/// Immutable once dispatched; workflows create a fresh task per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Capability used to route the task. Required.
    #[serde(default)]
    pub capability: String,
    /// Discriminator parsed by the receiving worker.
    #[serde(default, rename = "type", alias = "task_type")]
    pub task_type: String,
    /// Opaque structured payload.
    #[serde(default)]
    pub payload: Payload,
    /// Optional caller-supplied correlation id.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// UTC timestamp of creation.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task for the given capability and task type with an empty payload.
    pub fn new(capability: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability: capability.into(),
            task_type: task_type.into(),
            payload: Payload::new(),
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    /// Replace the payload. Non-object values are stored under the `"value"` key.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = into_payload(payload);
        self
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Reject tasks that cannot be routed.
    pub fn validate(&self) -> ForemanResult<()> {
        if self.capability.trim().is_empty() {
            return Err(ForemanError::InvalidTask(
                "No capability specified in task".to_string(),
            ));
        }
        Ok(())
    }

    /// Deserialize a field of the payload into a typed value.
    pub fn payload_field<T: serde::de::DeserializeOwned>(&self, key: &str) -> ForemanResult<T> {
        let value = self.payload.get(key).cloned().ok_or_else(|| {
            ForemanError::InvalidTask(format!("Missing payload field '{key}'"))
        })?;
        serde_json::from_value(value)
            .map_err(|e| ForemanError::InvalidTask(format!("Invalid payload field '{key}': {e}")))
    }
}

/// Declarative description of a task, used for workflow steps and the request boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Capability to route on.
    #[serde(default)]
    pub capability: String,
    /// Task kind discriminator.
    #[serde(default, rename = "type", alias = "task_type")]
    pub task_type: String,
    /// Structured payload; `data` is accepted as an alias.
    #[serde(default, alias = "data")]
    pub payload: Payload,
}

impl TaskSpec {
    /// Create a step description with an empty payload.
    pub fn new(capability: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            task_type: task_type.into(),
            payload: Payload::new(),
        }
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = into_payload(payload);
        self
    }

    /// Materialize a fresh [`Task`] from this spec.
    pub fn to_task(&self, correlation_id: Option<&str>) -> Task {
        let mut task = Task::new(self.capability.clone(), self.task_type.clone());
        task.payload = self.payload.clone();
        task.correlation_id = correlation_id.map(str::to_string);
        task
    }
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Error half of a failed [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal outcome of executing a task.
///
/// Exactly one is produced per dispatched task and it is never mutated after
/// creation; construct it through [`TaskResult::success`] or
/// [`TaskResult::failure`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    task_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
    #[serde(default)]
    executing_worker: Option<String>,
    #[serde(default)]
    worker_name: Option<String>,
    completed_at: DateTime<Utc>,
    elapsed_ms: u64,
}

/// Identity of the worker that handled a task.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'a> {
    /// Worker id.
    pub id: &'a str,
    /// Human-readable worker name.
    pub name: &'a str,
}

impl TaskResult {
    /// A successful result carrying the worker's payload.
    pub fn success(task: &Task, worker: Executor<'_>, result: Value, elapsed: Duration) -> Self {
        Self {
            task_id: task.id,
            correlation_id: task.correlation_id.clone(),
            success: true,
            result: Some(result),
            error: None,
            executing_worker: Some(worker.id.to_string()),
            worker_name: Some(worker.name.to_string()),
            completed_at: Utc::now(),
            elapsed_ms: duration_ms(elapsed),
        }
    }

    /// A failed result. `worker` is `None` when no worker was selected.
    pub fn failure(
        task: &Task,
        worker: Option<Executor<'_>>,
        error: &ForemanError,
        elapsed: Duration,
    ) -> Self {
        let error = TaskError {
            kind: error.kind(),
            message: error.to_string(),
        };
        Self::failure_with(task, worker, error, elapsed)
    }

    /// A failed result carrying an already-classified error, e.g. one
    /// reported by a nested result.
    pub fn failure_with(
        task: &Task,
        worker: Option<Executor<'_>>,
        error: TaskError,
        elapsed: Duration,
    ) -> Self {
        Self {
            task_id: task.id,
            correlation_id: task.correlation_id.clone(),
            success: false,
            result: None,
            error: Some(error),
            executing_worker: worker.map(|w| w.id.to_string()),
            worker_name: worker.map(|w| w.name.to_string()),
            completed_at: Utc::now(),
            elapsed_ms: duration_ms(elapsed),
        }
    }

    /// Id of the task this result terminates.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Correlation id copied from the task.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Result payload, present on success only.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Error description, present on failure only.
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Error kind, present on failure only.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Id of the worker that executed the task, if one was selected.
    pub fn executing_worker(&self) -> Option<&str> {
        self.executing_worker.as_deref()
    }

    /// Name of the worker that executed the task, if one was selected.
    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    /// Completion timestamp.
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Wall-clock time spent on the invocation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> Executor<'static> {
        Executor {
            id: "W1",
            name: "mailer",
        }
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new("email", "send").with_payload(json!({"to": "a@b.c"}));
        assert_eq!(task.capability, "email");
        assert_eq!(task.task_type, "send");
        assert_eq!(task.payload["to"], "a@b.c");
        assert!(task.correlation_id.is_none());
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_task_without_capability_is_invalid() {
        let task = Task::new("   ", "send");
        let err = task.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTask);
    }

    #[test]
    fn test_task_deserialize_from_boundary_shape() {
        let task: Task =
            serde_json::from_value(json!({"type": "create_campaign", "payload": {"budget": 10}}))
                .unwrap();
        assert!(task.capability.is_empty());
        assert_eq!(task.task_type, "create_campaign");
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_non_object_payload_is_wrapped() {
        let task = Task::new("email", "send").with_payload(json!(42));
        assert_eq!(task.payload["value"], 42);
        let task = Task::new("email", "send").with_payload(Value::Null);
        assert!(task.payload.is_empty());
    }

    #[test]
    fn test_payload_field() {
        let task = Task::new("finance", "calc").with_payload(json!({"amount": 12.5}));
        let amount: f64 = task.payload_field("amount").unwrap();
        assert!((amount - 12.5).abs() < f64::EPSILON);
        assert!(task.payload_field::<f64>("missing").is_err());
    }

    #[test]
    fn test_spec_to_task_keeps_correlation() {
        let spec = TaskSpec::new("sms", "notify").with_payload(json!({"n": 1}));
        let a = spec.to_task(Some("wf-1"));
        let b = spec.to_task(Some("wf-1"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.correlation_id.as_deref(), Some("wf-1"));
        assert_eq!(a.payload["n"], 1);
    }

    #[test]
    fn test_spec_accepts_data_alias() {
        let spec: TaskSpec =
            serde_json::from_value(json!({"capability": "sms", "data": {"to": "x"}})).unwrap();
        assert_eq!(spec.payload["to"], "x");
    }

    #[test]
    fn test_success_result_shape() {
        let task = Task::new("email", "send").with_correlation_id("c-1");
        let result = TaskResult::success(
            &task,
            executor(),
            json!({"sent": true}),
            Duration::from_millis(12),
        );
        assert!(result.is_success());
        assert_eq!(result.task_id(), task.id);
        assert_eq!(result.correlation_id(), Some("c-1"));
        assert_eq!(result.executing_worker(), Some("W1"));
        assert!(result.error().is_none());
        assert_eq!(result.elapsed(), Duration::from_millis(12));
    }

    #[test]
    fn test_failure_result_shape() {
        let task = Task::new("email", "send");
        let err = ForemanError::worker("W1", "smtp down");
        let result = TaskResult::failure(&task, Some(executor()), &err, Duration::ZERO);
        assert!(!result.is_success());
        assert!(result.result().is_none());
        assert_eq!(result.error_kind(), Some(ErrorKind::WorkerExecutionError));
        assert!(result.error().unwrap().message.contains("smtp down"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "worker_execution_error");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_failure_with_keeps_nested_kind() {
        let task = Task::new("task_delegation", "delegate").with_correlation_id("req-7");
        let error = TaskError {
            kind: ErrorKind::Timeout,
            message: "delegation failed: W1 timed out".into(),
        };
        let result = TaskResult::failure_with(&task, Some(executor()), error.clone(), Duration::ZERO);
        assert_eq!(result.error(), Some(&error));
        assert_eq!(result.correlation_id(), Some("req-7"));
        assert_eq!(result.executing_worker(), Some("W1"));
    }
}
