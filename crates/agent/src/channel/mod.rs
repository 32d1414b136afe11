//! Transports that reach the agent runtime.
//!
//! Exactly one [`AgentChannel`] is active per process. It is chosen once at
//! startup by [`crate::mode::IntegrationMode`] and shared by the registry and
//! the router.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use conduit_core::config::ChannelMode;
use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentPatch, AgentRecord};

pub mod direct;
pub mod remote;

pub use direct::{AgentRuntimeHandle, DirectChannel, LoopbackRuntimeFactory, RuntimeFactory};
pub use remote::RemoteRuntimeClient;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("runtime request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("runtime returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("runtime response could not be decoded: {0}")]
    Decode(String),
    #[error("agent `{0}` is not registered with the in-process runtime")]
    NotRegistered(AgentId),
    #[error("runtime channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AgentChannel: Send + Sync {
    fn mode(&self) -> ChannelMode;

    /// Registers the agent and returns the id the runtime assigned to it.
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentId, ChannelError>;

    async fn get_agent(&self, id: &AgentId) -> Result<Option<AgentRecord>, ChannelError>;

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ChannelError>;

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<(), ChannelError>;

    /// Deleting an agent the runtime does not know is not an error.
    async fn delete_agent(&self, id: &AgentId) -> Result<(), ChannelError>;

    /// Returns the runtime's raw reply payload; shape normalization happens in the router.
    async fn send_message(
        &self,
        id: &AgentId,
        text: &str,
        user_id: &str,
    ) -> Result<Value, ChannelError>;

    /// `Ok(None)` means the channel keeps no history of its own.
    async fn message_history(
        &self,
        id: &AgentId,
        user_id: &str,
    ) -> Result<Option<Vec<Value>>, ChannelError>;

    async fn is_available(&self) -> bool;
}

pub(crate) fn truncate_body(body: String) -> String {
    const MAX_BODY_CHARS: usize = 512;
    if body.chars().count() <= MAX_BODY_CHARS {
        return body;
    }
    let mut truncated = body.chars().take(MAX_BODY_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}
