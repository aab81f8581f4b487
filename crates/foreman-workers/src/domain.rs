use crate::registry::{CapabilityRegistry, WorkerHandle};
use crate::roles::{TaskKind, WorkerRole};
use crate::worker::{Worker, WorkerDescriptor};
use async_trait::async_trait;
use foreman_core::{ForemanError, ForemanResult, Task};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Domain logic behind a role-based worker.
///
/// The worker shell handles routing and task-kind parsing; implementations
/// only see tasks whose kind belongs to `role`.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Handle `task`, already parsed as `kind`.
    async fn handle(&self, role: WorkerRole, kind: TaskKind, task: &Task) -> ForemanResult<Value>;
}

/// Handler that accepts every task and echoes what it received.
///
/// Useful as a placeholder until a real integration is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgeHandler;

#[async_trait]
impl DomainHandler for AcknowledgeHandler {
    async fn handle(&self, role: WorkerRole, kind: TaskKind, task: &Task) -> ForemanResult<Value> {
        Ok(json!({
            "status": "accepted",
            "role": role,
            "task_type": kind,
            "task_id": task.id,
            "payload": task.payload,
        }))
    }
}

/// A worker for one [`WorkerRole`], backed by a [`DomainHandler`].
pub struct DomainWorker {
    descriptor: WorkerDescriptor,
    role: WorkerRole,
    handler: Arc<dyn DomainHandler>,
}

impl DomainWorker {
    /// Worker declaring the role's default capabilities.
    pub fn new(role: WorkerRole, handler: Arc<dyn DomainHandler>) -> Self {
        let descriptor = WorkerDescriptor::new(role.to_string(), role.default_capabilities().iter().copied())
            .with_role(role);
        Self {
            descriptor,
            role,
            handler,
        }
    }

    /// Worker with an explicit id and capability set.
    pub fn with_descriptor(
        role: WorkerRole,
        descriptor: WorkerDescriptor,
        handler: Arc<dyn DomainHandler>,
    ) -> Self {
        Self {
            descriptor: descriptor.with_role(role),
            role,
            handler,
        }
    }

    /// Role this worker serves.
    pub fn role(&self) -> WorkerRole {
        self.role
    }
}

#[async_trait]
impl Worker for DomainWorker {
    fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    async fn process(&self, task: &Task) -> ForemanResult<Value> {
        let kind = TaskKind::parse_for(self.role, &task.task_type).ok_or_else(|| {
            ForemanError::InvalidTask(format!(
                "Unknown task type '{}' for {} worker",
                task.task_type, self.role
            ))
        })?;
        debug!(worker = %self.descriptor.name(), task_type = %kind, task_id = %task.id, "Handling task");
        self.handler.handle(self.role, kind, task).await
    }
}

/// Register one [`DomainWorker`] per non-coordinator role.
///
/// Returns the handles in registration order.
pub fn register_default_workers(
    registry: &CapabilityRegistry,
    handler: Arc<dyn DomainHandler>,
) -> ForemanResult<Vec<Arc<WorkerHandle>>> {
    WorkerRole::ALL
        .iter()
        .filter(|role| **role != WorkerRole::Boss)
        .map(|role| registry.register(Arc::new(DomainWorker::new(*role, Arc::clone(&handler)))))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn finance() -> DomainWorker {
        DomainWorker::new(WorkerRole::Finance, Arc::new(AcknowledgeHandler))
    }

    #[tokio::test]
    async fn test_known_kind_is_handled() {
        let worker = finance();
        let task = Task::new("invoice_generation", "generate_invoice")
            .with_payload(json!({"customer": "acme"}));
        let out = worker.process(&task).await.unwrap();
        assert_eq!(out["status"], "accepted");
        assert_eq!(out["role"], "finance");
        assert_eq!(out["task_type"], "generate_invoice");
        assert_eq!(out["payload"]["customer"], "acme");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_invalid_task() {
        let worker = finance();
        let task = Task::new("invoice_generation", "design_logo");
        let err = worker.process(&task).await.unwrap_err();
        assert!(matches!(err, ForemanError::InvalidTask(_)));
        assert!(err.to_string().contains("design_logo"));
    }

    #[test]
    fn test_descriptor_uses_role_defaults() {
        let worker = finance();
        assert_eq!(worker.descriptor().name(), "finance");
        assert_eq!(worker.descriptor().role(), Some(WorkerRole::Finance));
        assert!(worker.descriptor().supports("payment_processing"));
    }

    #[test]
    fn test_register_default_workers_skips_coordinator() {
        let registry = CapabilityRegistry::new();
        let handles = register_default_workers(&registry, Arc::new(AcknowledgeHandler)).unwrap();
        assert_eq!(handles.len(), WorkerRole::ALL.len() - 1);
        assert!(registry.coordinator().is_none());
        assert!(registry.find_by_name("marketing").is_some());

        // Both engineering and devops declare deployment automation; engineering registered first.
        let deployers = registry.find_by_capability("deployment_automation");
        assert_eq!(deployers.len(), 2);
        assert_eq!(deployers[0].name(), "engineering");
    }
}
