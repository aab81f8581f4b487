//! Core types and error definitions for the Foreman dispatch core.
//!
//! This crate provides the foundational types shared across all Foreman crates:
//! the error taxonomy, the task and result records exchanged between callers,
//! the dispatcher and workers, and the system configuration.
//!
//! # Main types
//!
//! - [`ForemanError`]: Unified error enum for all Foreman subsystems.
//! - [`ForemanResult`]: Convenience alias for `Result<T, ForemanError>`.
//! - [`ErrorKind`]: Serializable failure classification carried by failed results.
//! - [`Task`]: A unit of requested work routed by capability.
//! - [`TaskResult`]: The terminal outcome of executing a task.
//! - [`ForemanConfig`]: TOML-backed system configuration.

/// System configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Task and result records.
pub mod task;

pub use config::{
    AlertThresholds, AutoscalingConfig, BottleneckThresholds, BusConfig, DispatchConfig,
    ForemanConfig, LogFormat, LoggingConfig, MonitorConfig, SelectionPolicy,
};
pub use error::{panic_message, ErrorKind, ForemanError, ForemanResult};
pub use task::{Executor, Payload, Task, TaskError, TaskResult, TaskSpec};
