use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use conduit_core::domain::agent::{AgentId, AgentRecord};
use conduit_core::domain::message::{MessageId, MessageRecord, MessageRole};
use conduit_db::repositories::{AgentRepository, MessageRepository};

use crate::cache::ResponseCache;
use crate::channel::remote::parse_remote_timestamp;
use crate::channel::{AgentChannel, ChannelError};
use crate::completion::{CompletionClient, CompletionDefaults, CompletionError};
use crate::response::extract_text;

const HISTORY_LIMIT: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplySource {
    Cache,
    Channel,
    Completion,
    Apology,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Channel => "channel",
            Self::Completion => "completion",
            Self::Apology => "apology",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedReply {
    pub text: String,
    pub source: ReplySource,
}

/// Delivers user messages to agents and always comes back with text.
pub struct MessageRouter {
    channel: Arc<dyn AgentChannel>,
    agents: Arc<dyn AgentRepository>,
    messages: Arc<dyn MessageRepository>,
    completion: Arc<dyn CompletionClient>,
    completion_defaults: CompletionDefaults,
    cache: ResponseCache,
}

impl MessageRouter {
    pub fn new(
        channel: Arc<dyn AgentChannel>,
        agents: Arc<dyn AgentRepository>,
        messages: Arc<dyn MessageRepository>,
        completion: Arc<dyn CompletionClient>,
        completion_defaults: CompletionDefaults,
        cache: ResponseCache,
    ) -> Self {
        Self { channel, agents, messages, completion, completion_defaults, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn send_message(&self, agent_id: &AgentId, text: &str, user_id: &str) -> String {
        self.route(agent_id, text, user_id).await.text
    }

    pub async fn route(&self, agent_id: &AgentId, text: &str, user_id: &str) -> RoutedReply {
        let started = Instant::now();
        if let Some(cached) = self.cache.get(agent_id, text).await {
            debug!(agent_id = %agent_id, "reply served from cache");
            return RoutedReply { text: cached, source: ReplySource::Cache };
        }

        let (reply, source) = match self.channel.send_message(agent_id, text, user_id).await {
            Ok(payload) => (extract_text(payload), ReplySource::Channel),
            Err(channel_error) => {
                warn!(
                    event_name = "router.channel_failed",
                    agent_id = %agent_id,
                    mode = self.channel.mode().as_str(),
                    error = %channel_error,
                    "primary delivery failed, trying completion fallback"
                );
                match self.complete_fallback(agent_id, text).await {
                    Ok(reply) => (reply, ReplySource::Completion),
                    Err(fallback_error) => {
                        error!(
                            event_name = "router.fallback_failed",
                            agent_id = %agent_id,
                            error = %fallback_error,
                            "completion fallback failed"
                        );
                        return RoutedReply {
                            text: apology(&channel_error, &fallback_error),
                            source: ReplySource::Apology,
                        };
                    }
                }
            }
        };

        self.cache.insert(agent_id, text, &reply).await;
        self.record_exchange(agent_id, text, &reply, user_id, source).await;

        info!(
            event_name = "router.message_delivered",
            agent_id = %agent_id,
            source = source.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "message delivered"
        );
        RoutedReply { text: reply, source }
    }

    /// Remote history when the channel keeps one, otherwise the stored turns for
    /// this user. Never fails.
    pub async fn history(&self, agent_id: &AgentId, user_id: &str) -> Vec<MessageRecord> {
        match self.channel.message_history(agent_id, user_id).await {
            Ok(Some(entries)) => {
                return entries
                    .into_iter()
                    .map(|entry| history_entry(agent_id, user_id, entry))
                    .collect();
            }
            Ok(None) => {}
            Err(error) => {
                warn!(agent_id = %agent_id, error = %error, "runtime history failed, using stored turns");
            }
        }

        match self.messages.list_for_agent(agent_id, HISTORY_LIMIT).await {
            Ok(messages) => messages
                .into_iter()
                .filter(|message| message.user_id() == Some(user_id))
                .collect(),
            Err(error) => {
                warn!(agent_id = %agent_id, error = %error, "stored history unavailable");
                Vec::new()
            }
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.len().await
    }

    async fn complete_fallback(&self, agent_id: &AgentId, text: &str) -> Result<String, CompletionError> {
        let agent = self.lookup_agent(agent_id).await;
        let name = agent.as_ref().map(|record| record.name.as_str()).unwrap_or(agent_id.as_str());
        let request = self.completion_defaults.request_for(agent.as_ref(), name, text)?;
        debug!(agent_id = %agent_id, model = %request.model, "issuing completion fallback");
        self.completion.complete(request).await
    }

    async fn lookup_agent(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        match self.agents.find_by_id(agent_id).await {
            Ok(found) => found,
            Err(error) => {
                debug!(agent_id = %agent_id, error = %error, "agent lookup for fallback failed");
                None
            }
        }
    }

    async fn record_exchange(
        &self,
        agent_id: &AgentId,
        text: &str,
        reply: &str,
        user_id: &str,
        source: ReplySource,
    ) {
        let turns = [
            MessageRecord::new(agent_id.clone(), MessageRole::User, text, user_id, "user"),
            MessageRecord::new(agent_id.clone(), MessageRole::Assistant, reply, user_id, source.as_str()),
        ];
        for turn in turns {
            if let Err(error) = self.messages.append(turn).await {
                debug!(agent_id = %agent_id, error = %error, "message turn not recorded");
                return;
            }
        }
    }
}

fn apology(channel_error: &ChannelError, fallback_error: &CompletionError) -> String {
    format!(
        "Sorry, I can't answer right now (error: {fallback_error}; runtime: {channel_error})."
    )
}

fn history_entry(agent_id: &AgentId, user_id: &str, entry: Value) -> MessageRecord {
    let role = entry
        .get("role")
        .and_then(Value::as_str)
        .and_then(MessageRole::parse)
        .unwrap_or_else(|| {
            let author = entry.get("userId").or_else(|| entry.get("user")).and_then(Value::as_str);
            if author == Some(user_id) {
                MessageRole::User
            } else {
                MessageRole::Assistant
            }
        });
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .map(|raw| MessageId(raw.to_string()))
        .unwrap_or_else(MessageId::generate);
    let created_at = entry.get("createdAt").and_then(parse_remote_timestamp).unwrap_or_else(Utc::now);

    MessageRecord {
        id,
        agent_id: agent_id.clone(),
        role,
        content: extract_text(entry.clone()),
        created_at,
        metadata: entry,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;

    use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentRecord};
    use conduit_core::domain::message::MessageRole;
    use conduit_db::repositories::{
        AgentRepository, InMemoryAgentRepository, InMemoryMessageRepository, MessageRepository,
    };

    use super::{MessageRouter, ReplySource};
    use crate::cache::ResponseCache;
    use crate::completion::CompletionDefaults;
    use crate::testing::{ScriptedChannel, ScriptedCompletion};

    struct Fixture {
        channel: Arc<ScriptedChannel>,
        completion: Arc<ScriptedCompletion>,
        agents: Arc<InMemoryAgentRepository>,
        messages: Arc<InMemoryMessageRepository>,
        router: MessageRouter,
    }

    fn fixture(channel: ScriptedChannel, completion: ScriptedCompletion, key: Option<&str>) -> Fixture {
        fixture_with_ttl(channel, completion, key, Duration::from_secs(300))
    }

    fn fixture_with_ttl(
        channel: ScriptedChannel,
        completion: ScriptedCompletion,
        key: Option<&str>,
        ttl: Duration,
    ) -> Fixture {
        let channel = Arc::new(channel);
        let completion = Arc::new(completion);
        let agents = Arc::new(InMemoryAgentRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let router = MessageRouter::new(
            channel.clone(),
            agents.clone(),
            messages.clone(),
            completion.clone(),
            CompletionDefaults {
                api_key: key.map(|key| SecretString::from(key.to_string())),
                model: "gpt-4o-mini".to_string(),
            },
            ResponseCache::new(ttl),
        );
        Fixture { channel, completion, agents, messages, router }
    }

    fn agent_id() -> AgentId {
        AgentId("a-1".to_string())
    }

    #[tokio::test]
    async fn channel_reply_is_normalized_cached_and_recorded() {
        let fx = fixture(
            ScriptedChannel::replying(json!([{ "text": "hello back" }])),
            ScriptedCompletion::failing(),
            None,
        );

        let first = fx.router.route(&agent_id(), "hello", "user-1").await;
        let second = fx.router.route(&agent_id(), "hello", "user-2").await;

        assert_eq!(first.text, "hello back");
        assert_eq!(first.source, ReplySource::Channel);
        assert_eq!(second.source, ReplySource::Cache);
        assert_eq!(second.text, "hello back");
        assert_eq!(fx.channel.messages_sent.load(Ordering::SeqCst), 1);

        let stored = fx.messages.list_for_agent(&agent_id(), 10).await.expect("stored turns");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[1].content, "hello back");
    }

    #[tokio::test]
    async fn expired_reply_is_fetched_from_the_channel_again() {
        let fx = fixture_with_ttl(
            ScriptedChannel::replying(json!({ "text": "fresh" })),
            ScriptedCompletion::failing(),
            None,
            Duration::from_millis(50),
        );

        let first = fx.router.route(&agent_id(), "hi", "user-1").await;
        let cached = fx.router.route(&agent_id(), "hi", "user-1").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let refreshed = fx.router.route(&agent_id(), "hi", "user-1").await;

        assert_eq!(first.source, ReplySource::Channel);
        assert_eq!(cached.source, ReplySource::Cache);
        assert_eq!(refreshed.source, ReplySource::Channel);
        assert_eq!(refreshed.text, first.text);
        assert_eq!(fx.channel.messages_sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn channel_failure_falls_back_to_completion_with_agent_credentials() {
        let fx = fixture(ScriptedChannel::default(), ScriptedCompletion::replying("fallback hi"), None);
        let record = AgentRecord::from_definition(
            agent_id(),
            &AgentDefinition {
                name: "Trader".to_string(),
                system: Some("You trade.".to_string()),
                settings: json!({ "secrets": { "OPENAI_API_KEY": "sk-agent" } }),
                ..AgentDefinition::default()
            },
            Utc::now(),
        );
        fx.agents.upsert(record).await.expect("seed agent");

        let reply = fx.router.route(&agent_id(), "price?", "user-1").await;

        assert_eq!(reply.text, "fallback hi");
        assert_eq!(reply.source, ReplySource::Completion);
        let requests = fx.completion.requests.lock().unwrap();
        assert_eq!(requests[0].api_key.expose_secret(), "sk-agent");
        assert_eq!(requests[0].system, "You trade.");
        assert_eq!(requests[0].user, "price?");
    }

    #[tokio::test]
    async fn fallback_uses_process_key_for_unknown_agent() {
        let fx = fixture(
            ScriptedChannel::default(),
            ScriptedCompletion::replying("generic reply"),
            Some("sk-process"),
        );

        let reply = fx.router.send_message(&agent_id(), "hi", "user-1").await;

        assert_eq!(reply, "generic reply");
        let requests = fx.completion.requests.lock().unwrap();
        assert_eq!(requests[0].api_key.expose_secret(), "sk-process");
        assert_eq!(requests[0].system, "You are a-1, a helpful assistant.");
    }

    #[tokio::test]
    async fn double_failure_returns_uncached_apology() {
        let fx = fixture(ScriptedChannel::default(), ScriptedCompletion::failing(), Some("sk-process"));

        let first = fx.router.route(&agent_id(), "hi", "user-1").await;
        let second = fx.router.route(&agent_id(), "hi", "user-1").await;

        assert_eq!(first.source, ReplySource::Apology);
        assert!(first.text.contains("error:"));
        assert!(first.text.contains("completion provider down"));
        assert_eq!(second.source, ReplySource::Apology);
        assert_eq!(fx.completion.calls(), 2);
        assert_eq!(fx.router.cache_len().await, 0);
    }

    #[tokio::test]
    async fn missing_credential_is_reported_in_apology() {
        let fx = fixture(ScriptedChannel::default(), ScriptedCompletion::replying("unused"), None);

        let reply = fx.router.send_message(&agent_id(), "hi", "user-1").await;

        assert!(reply.contains("error: no completion API key"));
        assert_eq!(fx.completion.calls(), 0);
    }

    #[tokio::test]
    async fn opaque_payload_still_produces_text() {
        let fx = fixture(
            ScriptedChannel::replying(json!({ "status": "queued" })),
            ScriptedCompletion::failing(),
            None,
        );

        let reply = fx.router.send_message(&agent_id(), "hi", "user-1").await;

        assert_eq!(reply, r#"{"status":"queued"}"#);
    }

    #[tokio::test]
    async fn history_prefers_channel_entries() {
        let channel = ScriptedChannel::default();
        *channel.history.lock().unwrap() = Some(vec![
            json!({ "id": "m-1", "userId": "user-1", "text": "question" }),
            json!({ "id": "m-2", "role": "assistant", "content": "answer", "createdAt": "2024-01-01T00:00:00Z" }),
        ]);
        let fx = fixture(channel, ScriptedCompletion::failing(), None);

        let history = fx.router.history(&agent_id(), "user-1").await;

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content, "question");
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].content, "answer");
    }

    #[tokio::test]
    async fn history_falls_back_to_stored_turns_for_that_user() {
        let fx = fixture(
            ScriptedChannel::replying(json!("ok")),
            ScriptedCompletion::failing(),
            None,
        );
        fx.router.send_message(&agent_id(), "mine", "user-1").await;
        fx.router.send_message(&agent_id(), "theirs", "user-2").await;
        fx.channel.set_offline(true);

        let history = fx.router.history(&agent_id(), "user-1").await;

        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|message| message.user_id() == Some("user-1")));
        assert_eq!(history[0].content, "mine");
    }

    #[tokio::test]
    async fn clear_cache_forces_fresh_delivery() {
        let fx = fixture(ScriptedChannel::replying(json!("ok")), ScriptedCompletion::failing(), None);
        fx.router.send_message(&agent_id(), "hi", "user-1").await;

        fx.router.clear_cache().await;
        fx.router.send_message(&agent_id(), "hi", "user-1").await;

        assert_eq!(fx.channel.messages_sent.load(Ordering::SeqCst), 2);
    }
}
