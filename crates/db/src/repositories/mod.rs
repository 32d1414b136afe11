use async_trait::async_trait;
use thiserror::Error;

use conduit_core::domain::agent::{AgentId, AgentRecord};
use conduit_core::domain::message::MessageRecord;

pub mod agent;
pub mod memory;
pub mod message;

pub use agent::SqlAgentRepository;
pub use memory::{InMemoryAgentRepository, InMemoryMessageRepository};
pub use message::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<AgentRecord>, RepositoryError>;

    /// Inserts the record when its id is unknown, otherwise overwrites the mutable
    /// fields and `updated_at`. The stored `created_at` is never changed.
    async fn upsert(&self, record: AgentRecord) -> Result<(), RepositoryError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError>;

    /// Oldest first, capped at the `limit` most recent rows.
    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError>;
}
