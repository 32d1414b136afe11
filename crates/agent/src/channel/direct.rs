use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use conduit_core::config::{ChannelConfig, ChannelMode};
use conduit_core::domain::agent::{merge_json, AgentDefinition, AgentId, AgentPatch, AgentRecord};

use super::{truncate_body, AgentChannel, ChannelError};

/// A booted agent living inside this process.
#[async_trait]
pub trait AgentRuntimeHandle: Send + Sync {
    async fn handle_message(&self, text: &str, user_id: &str) -> Result<Value, ChannelError>;

    async fn shutdown(&self) {}
}

#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn boot(
        &self,
        id: &AgentId,
        definition: &AgentDefinition,
    ) -> Result<Arc<dyn AgentRuntimeHandle>, ChannelError>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Boots handles that reach the embedded runtime's local message interface.
#[derive(Clone, Debug)]
pub struct LoopbackRuntimeFactory {
    loopback_url: String,
    client: Client,
}

impl LoopbackRuntimeFactory {
    pub fn new(loopback_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { loopback_url: loopback_url.into().trim_end_matches('/').to_string(), client })
    }

    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        Self::new(config.loopback_url.clone(), config.request_timeout())
    }
}

#[async_trait]
impl RuntimeFactory for LoopbackRuntimeFactory {
    async fn boot(
        &self,
        id: &AgentId,
        _definition: &AgentDefinition,
    ) -> Result<Arc<dyn AgentRuntimeHandle>, ChannelError> {
        Ok(Arc::new(LoopbackAgentRuntime {
            endpoint: format!("{}/{id}/message", self.loopback_url),
            client: self.client.clone(),
        }))
    }
}

struct LoopbackAgentRuntime {
    endpoint: String,
    client: Client,
}

#[async_trait]
impl AgentRuntimeHandle for LoopbackAgentRuntime {
    async fn handle_message(&self, text: &str, user_id: &str) -> Result<Value, ChannelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("text", text), ("user", user_id)])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChannelError::Status { status: status.as_u16(), body: truncate_body(body) });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Entry in the in-process agent map.
#[derive(Clone)]
pub struct InProcessAgentHandle {
    definition: AgentDefinition,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    runtime: Arc<dyn AgentRuntimeHandle>,
}

impl InProcessAgentHandle {
    fn record(&self, id: &AgentId) -> AgentRecord {
        let mut record = AgentRecord::from_definition(id.clone(), &self.definition, self.created_at);
        record.updated_at = self.updated_at;
        record
    }
}

/// Channel that keeps agents in a process-local map instead of calling out.
pub struct DirectChannel {
    factory: Arc<dyn RuntimeFactory>,
    agents: RwLock<HashMap<AgentId, InProcessAgentHandle>>,
}

impl DirectChannel {
    pub fn new(factory: Arc<dyn RuntimeFactory>) -> Self {
        Self { factory, agents: RwLock::new(HashMap::new()) }
    }

    pub async fn registered_count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[async_trait]
impl AgentChannel for DirectChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::DirectInProcess
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentId, ChannelError> {
        let id = match definition.id.as_deref() {
            Some(raw) => {
                AgentId::parse(raw).map_err(|error| ChannelError::Decode(error.to_string()))?
            }
            None => AgentId::generate(),
        };
        let runtime = self.factory.boot(&id, definition).await?;
        let now = Utc::now();
        let handle =
            InProcessAgentHandle { definition: definition.clone(), created_at: now, updated_at: now, runtime };

        let replaced = self.agents.write().await.insert(id.clone(), handle);
        if let Some(previous) = replaced {
            previous.runtime.shutdown().await;
        }
        info!(event_name = "channel.direct.agent_registered", agent_id = %id, "in-process agent registered");
        Ok(id)
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<AgentRecord>, ChannelError> {
        Ok(self.agents.read().await.get(id).map(|handle| handle.record(id)))
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ChannelError> {
        let agents = self.agents.read().await;
        let mut records = agents.iter().map(|(id, handle)| handle.record(id)).collect::<Vec<_>>();
        records.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(records)
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<(), ChannelError> {
        let mut agents = self.agents.write().await;
        let handle = agents.get_mut(id).ok_or_else(|| ChannelError::NotRegistered(id.clone()))?;

        if let Some(name) = &patch.name {
            handle.definition.name = name.clone();
        }
        if let Some(description) = &patch.description {
            handle.definition.description = description.clone();
        }
        if let Some(system_prompt) = &patch.system_prompt {
            handle.definition.system = Some(system_prompt.clone());
        }
        if let Some(metadata) = &patch.metadata {
            if let Some(settings) = metadata.get("settings") {
                merge_json(&mut handle.definition.settings, settings);
            }
        }
        handle.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), ChannelError> {
        let removed = self.agents.write().await.remove(id);
        if let Some(handle) = removed {
            handle.runtime.shutdown().await;
            debug!(agent_id = %id, "in-process agent removed");
        }
        Ok(())
    }

    async fn send_message(
        &self,
        id: &AgentId,
        text: &str,
        user_id: &str,
    ) -> Result<Value, ChannelError> {
        let runtime = self
            .agents
            .read()
            .await
            .get(id)
            .map(|handle| Arc::clone(&handle.runtime))
            .ok_or_else(|| ChannelError::NotRegistered(id.clone()))?;

        runtime.handle_message(text, user_id).await
    }

    async fn message_history(
        &self,
        _id: &AgentId,
        _user_id: &str,
    ) -> Result<Option<Vec<Value>>, ChannelError> {
        Ok(None)
    }

    async fn is_available(&self) -> bool {
        self.factory.is_ready()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentPatch};

    use super::{AgentRuntimeHandle, DirectChannel, LoopbackRuntimeFactory, RuntimeFactory};
    use crate::channel::{AgentChannel, ChannelError};

    /// Replies with a fixed payload and counts shutdowns.
    pub(crate) struct EchoFactory {
        pub(crate) shutdowns: Arc<AtomicUsize>,
    }

    struct EchoRuntime {
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentRuntimeHandle for EchoRuntime {
        async fn handle_message(&self, text: &str, _user_id: &str) -> Result<Value, ChannelError> {
            Ok(json!({ "text": format!("echo: {text}") }))
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RuntimeFactory for EchoFactory {
        async fn boot(
            &self,
            _id: &AgentId,
            _definition: &AgentDefinition,
        ) -> Result<Arc<dyn AgentRuntimeHandle>, ChannelError> {
            Ok(Arc::new(EchoRuntime { shutdowns: Arc::clone(&self.shutdowns) }))
        }
    }

    fn channel() -> (DirectChannel, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let factory = EchoFactory { shutdowns: Arc::clone(&shutdowns) };
        (DirectChannel::new(Arc::new(factory)), shutdowns)
    }

    fn definition(name: &str) -> AgentDefinition {
        AgentDefinition { name: name.to_string(), ..AgentDefinition::default() }
    }

    #[tokio::test]
    async fn create_registers_agent_under_requested_or_generated_id() {
        let (channel, _) = channel();
        let mut pinned = definition("Pinned");
        pinned.id = Some("pinned-1".to_string());

        let pinned_id = channel.create_agent(&pinned).await.expect("created");
        let generated_id = channel.create_agent(&definition("Fresh")).await.expect("created");

        assert_eq!(pinned_id.as_str(), "pinned-1");
        assert_ne!(generated_id, pinned_id);
        assert_eq!(channel.registered_count().await, 2);
        let listed = channel.list_agents().await.expect("listed");
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn send_message_reaches_registered_runtime_only() {
        let (channel, _) = channel();
        let id = channel.create_agent(&definition("Bot")).await.expect("created");

        let reply = channel.send_message(&id, "ping", "user-1").await.expect("delivered");
        let missing = channel.send_message(&AgentId("nope".to_string()), "ping", "user-1").await;

        assert_eq!(reply, json!({ "text": "echo: ping" }));
        assert!(matches!(missing, Err(ChannelError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn update_changes_the_record_view() {
        let (channel, _) = channel();
        let id = channel.create_agent(&definition("Before")).await.expect("created");

        channel
            .update_agent(&id, &AgentPatch { name: Some("After".to_string()), ..AgentPatch::default() })
            .await
            .expect("updated");
        let record = channel.get_agent(&id).await.expect("lookup").expect("present");

        assert_eq!(record.name, "After");
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn settings_patch_merges_into_the_definition() {
        let (channel, _) = channel();
        let mut keyed = definition("Keyed");
        keyed.settings = json!({ "secrets": { "OPENAI_API_KEY": "sk-agent" } });
        let id = channel.create_agent(&keyed).await.expect("created");

        channel
            .update_agent(
                &id,
                &AgentPatch {
                    metadata: Some(json!({ "settings": { "model": "gpt-4.1" } })),
                    ..AgentPatch::default()
                },
            )
            .await
            .expect("updated");
        let record = channel.get_agent(&id).await.expect("lookup").expect("present");

        assert_eq!(record.metadata_str("settings.secrets.OPENAI_API_KEY"), Some("sk-agent"));
        assert_eq!(record.metadata_str("settings.model"), Some("gpt-4.1"));
    }

    #[tokio::test]
    async fn delete_shuts_down_runtime_and_is_idempotent() {
        let (channel, shutdowns) = channel();
        let id = channel.create_agent(&definition("Bot")).await.expect("created");

        channel.delete_agent(&id).await.expect("deleted");
        channel.delete_agent(&id).await.expect("second delete is a no-op");

        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(channel.get_agent(&id).await.expect("lookup").is_none());
        assert!(channel.message_history(&id, "user-1").await.expect("history").is_none());
    }

    #[tokio::test]
    async fn loopback_runtime_posts_to_local_message_interface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent-7/message"))
            .and(body_string_contains("text=hi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "hello" })))
            .expect(1)
            .mount(&server)
            .await;
        let factory =
            LoopbackRuntimeFactory::new(server.uri(), Duration::from_secs(5)).expect("factory builds");
        let channel = DirectChannel::new(Arc::new(factory));
        let mut bot = definition("Bot");
        bot.id = Some("agent-7".to_string());
        let id = channel.create_agent(&bot).await.expect("created");

        let reply = channel.send_message(&id, "hi", "user-1").await.expect("delivered");

        assert_eq!(reply, json!({ "response": "hello" }));
        assert!(channel.is_available().await);
    }
}
