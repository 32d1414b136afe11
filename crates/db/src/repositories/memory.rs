use std::collections::HashMap;

use tokio::sync::RwLock;

use conduit_core::domain::agent::{AgentId, AgentRecord};
use conduit_core::domain::message::MessageRecord;

use super::{AgentRepository, MessageRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentRecord>, RepositoryError> {
        let agents = self.agents.read().await;
        let mut all = agents.values().cloned().collect::<Vec<_>>();
        all.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(all)
    }

    async fn upsert(&self, mut record: AgentRecord) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(&record.id.0) {
            record.created_at = existing.created_at;
        }
        agents.insert(record.id.0.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        let mut agents = self.agents.write().await;
        Ok(agents.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<MessageRecord>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let messages = self.messages.read().await;
        let matching =
            messages.iter().filter(|message| &message.agent_id == agent_id).collect::<Vec<_>>();
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}
