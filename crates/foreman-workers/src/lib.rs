//! Worker contract and capability registry for Foreman.
//!
//! Workers advertise a fixed set of capabilities and are registered into a
//! [`CapabilityRegistry`], which the dispatcher queries to find candidates.
//!
//! # Main types
//!
//! - [`Worker`]: Trait every worker implements.
//! - [`WorkerDescriptor`]: Identity, role, and capability set of a worker.
//! - [`CapabilityRegistry`]: Capability-to-worker index, safe for concurrent use.
//! - [`WorkerHandle`]: A registered worker plus its status and counters.
//! - [`DomainWorker`]: Role-based worker shell around a [`DomainHandler`].

/// Role-based domain workers.
pub mod domain;
/// Capability registry and worker runtime state.
pub mod registry;
/// Worker roles and task kinds.
pub mod roles;
/// The worker trait and descriptor.
pub mod worker;

pub use domain::{register_default_workers, AcknowledgeHandler, DomainHandler, DomainWorker};
pub use registry::{CapabilityRegistry, Invocation, WorkerHandle, WorkerStatus, WorkerStatusRecord};
pub use roles::{TaskKind, WorkerRole, COORDINATOR_CAPABILITY};
pub use worker::{Worker, WorkerDescriptor};
