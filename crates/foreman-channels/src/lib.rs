//! In-process message bus for Foreman workers.
//!
//! Workers exchange best-effort messages through a [`MessageBus`]:
//! point-to-point sends are queued and drained by a single consumer task,
//! broadcasts reach every subscriber immediately.
//!
//! # Main types
//!
//! - [`MessageBus`]: Queue, subscriber table, and bounded message history.
//! - [`Message`]: A message plus its delivery status.
//! - [`MessageHandler`]: Subscriber callback trait; see [`handler_fn`] for closures.

/// The message bus and its consumer loop.
pub mod bus;
/// Subscriber callbacks.
pub mod handler;
/// Message records and delivery status.
pub mod message;

pub use bus::{CommunicationStats, MessageBus};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use message::{Message, MessageStatus, BROADCAST};
