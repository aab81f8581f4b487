//! Task routing, workflow coordination, and health monitoring for Foreman.
//!
//! The [`Dispatcher`] routes a task to a worker advertising its capability.
//! The [`Coordinator`] is itself a worker that delegates, runs sequential
//! workflows, and aggregates results. The [`HealthMonitor`] polls workers,
//! raises threshold alerts, reports trends, and hands alerts to the [`Optimizer`].
//!
//! # Main types
//!
//! - [`Foreman`]: Builds and owns every component.
//! - [`Dispatcher`]: Capability-based routing with timeouts and bookkeeping.
//! - [`Coordinator`]: Delegation, fail-fast workflows, and aggregation.
//! - [`HealthMonitor`]: Periodic health snapshots and alerts.
//! - [`InMemoryTelemetry`]: Latency and error samples read by the monitor.

/// Workflow coordination.
pub mod coordinator;
/// Capability-based task routing.
pub mod dispatcher;
/// Shared worker invocation path.
pub mod invoker;
/// Health snapshots, alerts, and the polling loop.
pub mod monitor;
/// Corrective actions and autoscaling decisions.
pub mod optimizer;
/// Worker selection strategies.
pub mod selection;
/// Component wiring.
pub mod system;
/// In-memory telemetry.
pub mod telemetry;

pub use coordinator::{
    AgentStatusSummary, Aggregation, Coordinator, CoordinatorRequest, DelegationResult,
    WorkflowReport, WorkflowRun, WorkflowState,
};
pub use dispatcher::Dispatcher;
pub use invoker::Invoker;
pub use monitor::{
    Alert, AlertCategory, AlertMetric, Bottleneck, BottleneckIssue, BottleneckPriority,
    HealthMonitor, HealthReport, HealthSnapshot, MonitorHandle, OverallHealth, TrendDirection,
    TrendReport, WorkerTrend,
};
pub use optimizer::{
    ActionExecutor, ActionKind, ActionOutcome, CorrectiveAction, NoopActionExecutor,
    OptimizationReport, Optimizer,
};
pub use selection::{strategy_for, FirstCapable, IdleFirst, SelectionStrategy};
pub use system::Foreman;
pub use telemetry::{InMemoryTelemetry, MetricsSource, ResourceUsage, SystemUsage, WorkerMetrics};
