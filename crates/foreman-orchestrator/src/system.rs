use crate::coordinator::Coordinator;
use crate::dispatcher::Dispatcher;
use crate::monitor::{HealthMonitor, MonitorHandle};
use crate::optimizer::{ActionExecutor, NoopActionExecutor};
use crate::telemetry::InMemoryTelemetry;
use foreman_channels::MessageBus;
use foreman_core::{ForemanConfig, ForemanResult};
use foreman_workers::{register_default_workers, CapabilityRegistry, DomainHandler, WorkerHandle};
use std::sync::Arc;
use tracing::info;

/// The assembled system: every component is built once here and handed out
/// by reference.
pub struct Foreman {
    config: ForemanConfig,
    registry: Arc<CapabilityRegistry>,
    telemetry: Arc<InMemoryTelemetry>,
    dispatcher: Dispatcher,
    coordinator: Arc<Coordinator>,
    coordinator_handle: Arc<WorkerHandle>,
    bus: Arc<MessageBus>,
    monitor: Arc<HealthMonitor>,
}

impl Foreman {
    /// Wire the system with one domain worker per role, all backed by `handler`.
    pub fn bootstrap(config: ForemanConfig, handler: Arc<dyn DomainHandler>) -> ForemanResult<Self> {
        Self::bootstrap_with(config, handler, Arc::new(NoopActionExecutor))
    }

    /// Like [`bootstrap`](Self::bootstrap) with a custom corrective-action executor.
    pub fn bootstrap_with(
        config: ForemanConfig,
        handler: Arc<dyn DomainHandler>,
        executor: Arc<dyn ActionExecutor>,
    ) -> ForemanResult<Self> {
        config.validate()?;

        let registry = Arc::new(CapabilityRegistry::new());
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&telemetry), &config.dispatch);

        // The coordinator goes in first so `registry.coordinator()` finds it.
        let coordinator = Arc::new(Coordinator::new(dispatcher.invoker().clone()));
        let coordinator_handle = registry.register(coordinator.clone())?;
        for worker in register_default_workers(&registry, handler)? {
            coordinator.register_agent(worker)?;
        }

        let bus = Arc::new(MessageBus::new(&config.bus));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            telemetry.clone(),
            executor,
            config.monitor.clone(),
        ));

        info!(
            workers = registry.len(),
            capabilities = registry.all_capabilities().len(),
            "Foreman bootstrapped"
        );
        Ok(Self {
            config,
            registry,
            telemetry,
            dispatcher,
            coordinator,
            coordinator_handle,
            bus,
            monitor,
        })
    }

    /// Validated configuration.
    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    /// Registry of every worker, coordinator included.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Latency and error samples recorded by the dispatcher.
    pub fn telemetry(&self) -> &Arc<InMemoryTelemetry> {
        &self.telemetry
    }

    /// Entry point for routing tasks.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The coordinator worker.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Registry entry of the coordinator, holding its status and counters.
    pub fn coordinator_handle(&self) -> &Arc<WorkerHandle> {
        &self.coordinator_handle
    }

    /// Inter-worker message bus.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Health monitor over the registry.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Start the bus consumer and the monitor loop.
    pub fn start(&self) -> MonitorHandle {
        self.bus.start();
        self.monitor.start()
    }

    /// Stop what [`start`](Self::start) launched.
    pub async fn shutdown(&self, monitor: MonitorHandle) -> ForemanResult<()> {
        monitor.stop().await?;
        self.bus.stop().await?;
        info!("Foreman stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use foreman_core::ForemanError;
    use foreman_workers::{AcknowledgeHandler, WorkerRole, COORDINATOR_CAPABILITY};

    #[test]
    fn test_bootstrap_wires_coordinator_first() {
        let foreman = Foreman::bootstrap(ForemanConfig::default(), Arc::new(AcknowledgeHandler)).unwrap();
        let workers = foreman.registry().workers();
        let first = &workers[0];
        assert!(first.descriptor().supports(COORDINATOR_CAPABILITY));
        assert_eq!(
            foreman.registry().coordinator().unwrap().id(),
            foreman.coordinator_handle().id()
        );

        let summary = foreman.coordinator().get_agent_status_summary();
        assert_eq!(summary.total_agents, WorkerRole::ALL.len() - 1);
        assert_eq!(foreman.registry().len(), WorkerRole::ALL.len());
    }

    #[test]
    fn test_bootstrap_rejects_invalid_config() {
        let mut config = ForemanConfig::default();
        config.dispatch.task_timeout_secs = 0;
        let err = Foreman::bootstrap(config, Arc::new(AcknowledgeHandler))
            .err()
            .unwrap();
        assert!(matches!(err, ForemanError::Config(_)));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let foreman = Foreman::bootstrap(ForemanConfig::default(), Arc::new(AcknowledgeHandler)).unwrap();
        let monitor = foreman.start();
        assert!(foreman.bus().is_running());
        foreman.shutdown(monitor).await.unwrap();
        assert!(!foreman.bus().is_running());
    }
}
