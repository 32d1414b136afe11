//! Agent runtime integration for conduit.
//!
//! This crate connects the service to an external agent runtime:
//! - Supervises the runtime as a child process and detects readiness
//! - Creates, lists, updates and deletes agents through the active channel
//! - Routes user messages and degrades to a direct completion call on failure
//!
//! # Architecture
//!
//! One [`channel::AgentChannel`] is chosen at startup by [`mode::IntegrationMode`]:
//! 1. **Process** (`channel::remote`) - HTTP calls to a supervised runtime
//! 2. **Direct** (`channel::direct`) - agents booted inside this process
//!
//! [`registry::AgentRegistry`] keeps the database in step with the channel,
//! and [`router::MessageRouter`] owns the reply cache and the fallback chain.
//! [`service::RuntimeService`] wires everything together.
//!
//! # Delivery Guarantee
//!
//! Sending a message never fails towards the caller. When both the channel and
//! the completion fallback fail, the caller receives an apology that carries
//! the underlying error text.

pub mod cache;
pub mod channel;
pub mod completion;
pub mod mode;
pub mod registry;
pub mod response;
pub mod router;
pub mod service;
pub mod supervisor;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{AgentRegistry, AgentSource, DeleteOutcome, RegistryError};
pub use router::{MessageRouter, ReplySource, RoutedReply};
pub use service::{RuntimeService, ServiceError, ServiceParts};
pub use supervisor::{RuntimeState, RuntimeStatus, RuntimeSupervisor, SupervisorError};
