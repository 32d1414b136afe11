use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use conduit_core::config::ChannelMode;
use conduit_core::domain::agent::{AgentDefinition, AgentId, AgentPatch, AgentRecord};

use crate::channel::{AgentChannel, ChannelError};
use crate::completion::{CompletionClient, CompletionError, CompletionRequest};

/// In-memory channel whose failures are switched on per test.
#[derive(Default)]
pub(crate) struct ScriptedChannel {
    pub(crate) agents: Mutex<Vec<AgentRecord>>,
    pub(crate) offline: AtomicBool,
    pub(crate) ignore_deletes: AtomicBool,
    pub(crate) reply: Mutex<Option<Value>>,
    pub(crate) history: Mutex<Option<Vec<Value>>>,
    pub(crate) created: AtomicUsize,
    pub(crate) messages_sent: AtomicUsize,
    pub(crate) updates: Mutex<Vec<(AgentId, AgentPatch)>>,
}

impl ScriptedChannel {
    pub(crate) fn replying(reply: Value) -> Self {
        let channel = Self::default();
        *channel.reply.lock().unwrap() = Some(reply);
        channel
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn seed(&self, record: AgentRecord) {
        self.agents.lock().unwrap().push(record);
    }

    fn check_online(&self) -> Result<(), ChannelError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("scripted outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentChannel for ScriptedChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Process
    }

    async fn create_agent(&self, definition: &AgentDefinition) -> Result<AgentId, ChannelError> {
        self.check_online()?;
        let sequence = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = AgentId(definition.id.clone().unwrap_or_else(|| format!("agent-{sequence}")));
        let record = AgentRecord::from_definition(id.clone(), definition, Utc::now());
        let mut agents = self.agents.lock().unwrap();
        agents.retain(|existing| existing.id != id);
        agents.push(record);
        Ok(id)
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<AgentRecord>, ChannelError> {
        self.check_online()?;
        Ok(self.agents.lock().unwrap().iter().find(|record| &record.id == id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ChannelError> {
        self.check_online()?;
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn update_agent(&self, id: &AgentId, patch: &AgentPatch) -> Result<(), ChannelError> {
        self.check_online()?;
        self.updates.lock().unwrap().push((id.clone(), patch.clone()));
        if let Some(record) = self.agents.lock().unwrap().iter_mut().find(|record| &record.id == id) {
            record.apply_patch(patch, Utc::now());
        }
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), ChannelError> {
        self.check_online()?;
        if !self.ignore_deletes.load(Ordering::SeqCst) {
            self.agents.lock().unwrap().retain(|record| &record.id != id);
        }
        Ok(())
    }

    async fn send_message(
        &self,
        _id: &AgentId,
        _text: &str,
        _user_id: &str,
    ) -> Result<Value, ChannelError> {
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::Status { status: 502, body: "no reply scripted".to_string() })
    }

    async fn message_history(
        &self,
        _id: &AgentId,
        _user_id: &str,
    ) -> Result<Option<Vec<Value>>, ChannelError> {
        self.check_online()?;
        Ok(self.history.lock().unwrap().clone())
    }

    async fn is_available(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Completion client that records requests and returns a fixed outcome.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    pub(crate) reply: Option<String>,
    pub(crate) requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub(crate) fn replying(reply: &str) -> Self {
        Self { reply: Some(reply.to_string()), requests: Mutex::new(Vec::new()) }
    }

    pub(crate) fn failing() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request);
        self.reply.clone().ok_or(CompletionError::Status {
            status: 503,
            body: "completion provider down".to_string(),
        })
    }
}
