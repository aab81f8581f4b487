use crate::roles::WorkerRole;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_core::{ForemanResult, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Identity and capability set of a worker.
///
/// The capability set is fixed at construction; there is no way to mutate it
/// once the worker has been registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    id: String,
    name: String,
    role: Option<WorkerRole>,
    capabilities: BTreeSet<String>,
    created_at: DateTime<Utc>,
}

impl WorkerDescriptor {
    /// Create a descriptor with a generated id.
    pub fn new<I, S>(name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role: None,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            created_at: Utc::now(),
        }
    }

    /// Use an explicit id instead of the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Tag the descriptor with the worker's role.
    pub fn with_role(mut self, role: WorkerRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Unique worker id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role, for the built-in domain workers.
    pub fn role(&self) -> Option<WorkerRole> {
        self.role
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// When the descriptor was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the worker declares `capability`.
    ///
    /// Optional operations are declared as capabilities too, so this is also
    /// how callers check for an optional operation before requesting it.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Trait that every worker implements, whether a domain plugin or the coordinator.
///
/// Workers never touch their own status or counters; the dispatcher applies
/// that bookkeeping around each `process` call.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identity and capabilities.
    fn descriptor(&self) -> &WorkerDescriptor;

    /// Run the worker's logic for `task` and return its result payload.
    async fn process(&self, task: &Task) -> ForemanResult<serde_json::Value>;

    /// Lightweight liveness check used by the health monitor.
    async fn health_check(&self) -> ForemanResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_supports() {
        let desc = WorkerDescriptor::new("ml", ["model_training", "probability_estimates"])
            .with_id("ml-1")
            .with_role(WorkerRole::Ml);
        assert_eq!(desc.id(), "ml-1");
        assert_eq!(desc.role(), Some(WorkerRole::Ml));
        assert!(desc.supports("probability_estimates"));
        assert!(!desc.supports("invoice_generation"));
    }

    #[test]
    fn test_descriptor_deduplicates_capabilities() {
        let desc = WorkerDescriptor::new("mailer", ["email", "email", "sms"]);
        assert_eq!(desc.capabilities().len(), 2);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = WorkerDescriptor::new("a", ["x"]);
        let b = WorkerDescriptor::new("a", ["x"]);
        assert_ne!(a.id(), b.id());
    }
}
