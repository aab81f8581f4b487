use foreman_core::SelectionPolicy;
use foreman_workers::{WorkerHandle, WorkerStatus};
use std::sync::Arc;

/// Picks one worker out of the capable candidates.
///
/// Candidates arrive in registration order; `None` means none can take the task.
/// Offline candidates are never chosen.
pub trait SelectionStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Choose a candidate, or `None` when every candidate is offline.
    fn select(&self, candidates: &[Arc<WorkerHandle>]) -> Option<Arc<WorkerHandle>>;
}

/// The first-registered candidate that is not offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstCapable;

impl SelectionStrategy for FirstCapable {
    fn name(&self) -> &'static str {
        "first_capable"
    }

    fn select(&self, candidates: &[Arc<WorkerHandle>]) -> Option<Arc<WorkerHandle>> {
        candidates.iter().find(|w| !w.is_offline()).cloned()
    }
}

/// The first idle candidate, otherwise the first one not offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleFirst;

impl SelectionStrategy for IdleFirst {
    fn name(&self) -> &'static str {
        "idle_first"
    }

    fn select(&self, candidates: &[Arc<WorkerHandle>]) -> Option<Arc<WorkerHandle>> {
        candidates
            .iter()
            .find(|w| w.status() == WorkerStatus::Idle)
            .or_else(|| candidates.iter().find(|w| !w.is_offline()))
            .cloned()
    }
}

/// Strategy configured by `dispatch.selection`.
pub fn strategy_for(policy: SelectionPolicy) -> Arc<dyn SelectionStrategy> {
    match policy {
        SelectionPolicy::FirstCapable => Arc::new(FirstCapable),
        SelectionPolicy::IdleFirst => Arc::new(IdleFirst),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foreman_core::{ForemanResult, Task};
    use foreman_workers::{CapabilityRegistry, Worker, WorkerDescriptor};

    struct Idle(WorkerDescriptor);

    #[async_trait]
    impl Worker for Idle {
        fn descriptor(&self) -> &WorkerDescriptor {
            &self.0
        }

        async fn process(&self, _task: &Task) -> ForemanResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn candidates() -> Vec<Arc<WorkerHandle>> {
        let registry = CapabilityRegistry::new();
        for id in ["W1", "W2", "W3"] {
            registry
                .register(Arc::new(Idle(WorkerDescriptor::new(id, ["email"]).with_id(id))))
                .unwrap();
        }
        registry.find_by_capability("email")
    }

    #[test]
    fn test_first_capable() {
        let c = candidates();
        assert_eq!(FirstCapable.select(&c).unwrap().id(), "W1");
        assert!(FirstCapable.select(&[]).is_none());
    }

    #[test]
    fn test_idle_first_skips_busy_workers() {
        let c = candidates();
        let _busy = c[0].begin();
        assert_eq!(IdleFirst.select(&c).unwrap().id(), "W2");
    }

    #[test]
    fn test_idle_first_falls_back() {
        let c = candidates();
        c[0].set_offline(true);
        let _b = c[1].begin();
        let _c = c[2].begin();
        // No idle worker; W2 is the first one still online.
        assert_eq!(IdleFirst.select(&c).unwrap().id(), "W2");
    }

    #[test]
    fn test_offline_workers_are_never_selected() {
        let c = candidates();
        c[0].set_offline(true);
        assert_eq!(FirstCapable.select(&c).unwrap().id(), "W2");

        for w in &c {
            w.set_offline(true);
        }
        assert!(FirstCapable.select(&c).is_none());
        assert!(IdleFirst.select(&c).is_none());

        c[2].set_offline(false);
        assert_eq!(IdleFirst.select(&c).unwrap().id(), "W3");
    }

    #[test]
    fn test_strategy_for_policy() {
        assert_eq!(strategy_for(SelectionPolicy::IdleFirst).name(), "idle_first");
        assert_eq!(strategy_for(SelectionPolicy::FirstCapable).name(), "first_capable");
    }
}
