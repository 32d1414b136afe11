use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use conduit_core::config::{AppConfig, ChannelMode};
use conduit_core::domain::agent::{AgentId, AgentOverrides, AgentPatch, AgentRecord};
use conduit_core::domain::message::MessageRecord;
use conduit_db::repositories::{
    AgentRepository, MessageRepository, SqlAgentRepository, SqlMessageRepository,
};
use conduit_db::DbPool;

use crate::cache::ResponseCache;
use crate::channel::{AgentChannel, ChannelError};
use crate::completion::{CompletionClient, CompletionDefaults, CompletionError, OpenAiCompletionClient};
use crate::mode::IntegrationMode;
use crate::registry::{AgentRegistry, AgentSource, DeleteOutcome, RegistryError};
use crate::router::{MessageRouter, RoutedReply};
use crate::supervisor::{RuntimeStatus, RuntimeSupervisor, SupervisorError, SupervisorSettings};
use crate::template::TemplateStore;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to build runtime channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("failed to build completion client: {0}")]
    Completion(#[from] CompletionError),
}

/// Collaborators the service is assembled from.
pub struct ServiceParts {
    pub channel: Arc<dyn AgentChannel>,
    pub agents: Arc<dyn AgentRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub completion: Arc<dyn CompletionClient>,
}

/// Composition root for agent management and messaging.
///
/// A supervisor exists only in process mode; in direct mode the runtime lives
/// inside this process and there is nothing to spawn.
pub struct RuntimeService {
    mode: IntegrationMode,
    channel: Arc<dyn AgentChannel>,
    supervisor: Option<RuntimeSupervisor>,
    registry: AgentRegistry,
    router: MessageRouter,
}

impl RuntimeService {
    pub fn from_config(config: &AppConfig, pool: DbPool) -> Result<Self, ServiceError> {
        let mode = IntegrationMode::from_config(&config.channel);
        let channel = mode.build_channel(&config.channel)?;
        let completion = Arc::new(OpenAiCompletionClient::from_config(&config.completion)?);

        Ok(Self::assemble(
            config,
            ServiceParts {
                channel,
                agents: Arc::new(SqlAgentRepository::new(pool.clone())),
                messages: Arc::new(SqlMessageRepository::new(pool)),
                completion,
            },
        ))
    }

    pub fn assemble(config: &AppConfig, parts: ServiceParts) -> Self {
        let mode = IntegrationMode::new(parts.channel.mode());
        let supervisor = (!mode.is_direct())
            .then(|| RuntimeSupervisor::new(SupervisorSettings::from_config(config)));

        let registry = AgentRegistry::new(
            Arc::clone(&parts.channel),
            Arc::clone(&parts.agents),
            TemplateStore::new(config.templates.dir.clone()),
            config.completion.definition_defaults(),
        );
        let router = MessageRouter::new(
            Arc::clone(&parts.channel),
            parts.agents,
            parts.messages,
            parts.completion,
            CompletionDefaults::from_config(&config.completion),
            ResponseCache::new(config.cache.ttl()),
        );

        info!(
            event_name = "service.assembled",
            mode = mode.mode().as_str(),
            supervised = supervisor.is_some(),
            "runtime service assembled"
        );
        Self { mode, channel: parts.channel, supervisor, registry, router }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode.mode()
    }

    pub fn is_direct(&self) -> bool {
        self.mode.is_direct()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn supervisor(&self) -> Option<&RuntimeSupervisor> {
        self.supervisor.as_ref()
    }

    pub async fn start_runtime(&self) -> Result<(), SupervisorError> {
        match &self.supervisor {
            Some(supervisor) => supervisor.start().await,
            None => Ok(()),
        }
    }

    pub async fn stop_runtime(&self) -> Result<(), SupervisorError> {
        match &self.supervisor {
            Some(supervisor) => supervisor.stop().await,
            None => Ok(()),
        }
    }

    pub async fn restart_runtime(&self) -> Result<(), SupervisorError> {
        match &self.supervisor {
            Some(supervisor) => supervisor.restart().await,
            None => Ok(()),
        }
    }

    /// `None` in direct mode.
    pub async fn runtime_status(&self) -> Option<RuntimeStatus> {
        match &self.supervisor {
            Some(supervisor) => Some(supervisor.status().await),
            None => None,
        }
    }

    pub async fn check_availability(&self) -> bool {
        match &self.supervisor {
            Some(supervisor) => supervisor.check_availability().await,
            None => self.channel.is_available().await,
        }
    }

    pub async fn create_agent(
        &self,
        source: AgentSource,
        overrides: AgentOverrides,
    ) -> Result<AgentRecord, RegistryError> {
        self.registry.create_agent(source, overrides).await
    }

    pub async fn get_agent(&self, id: &AgentId) -> Result<AgentRecord, RegistryError> {
        self.registry.get_agent(id).await
    }

    pub async fn list_agents(&self) -> Vec<AgentRecord> {
        self.registry.list_agents().await
    }

    pub async fn update_agent(
        &self,
        id: &AgentId,
        patch: &AgentPatch,
    ) -> Result<AgentRecord, RegistryError> {
        let record = self.registry.update_agent(id, patch).await?;
        self.router.cache().invalidate_agent(id).await;
        Ok(record)
    }

    pub async fn delete_agent(&self, id: &AgentId) -> DeleteOutcome {
        let outcome = self.registry.delete_agent(id).await;
        self.router.cache().invalidate_agent(id).await;
        outcome
    }

    pub async fn send_message(&self, agent_id: &AgentId, text: &str, user_id: &str) -> String {
        self.router.send_message(agent_id, text, user_id).await
    }

    pub async fn route_message(&self, agent_id: &AgentId, text: &str, user_id: &str) -> RoutedReply {
        self.router.route(agent_id, text, user_id).await
    }

    pub async fn history(&self, agent_id: &AgentId, user_id: &str) -> Vec<MessageRecord> {
        self.router.history(agent_id, user_id).await
    }

    pub async fn clear_cache(&self) {
        self.router.clear_cache().await;
    }

    pub async fn cache_len(&self) -> usize {
        self.router.cache_len().await
    }

    /// Stops the supervised runtime, if any.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.stop_runtime().await
    }
}
