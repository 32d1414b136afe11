use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use conduit_core::domain::agent::AgentId;

/// Short-lived reply cache keyed by agent and message text.
///
/// The key leaves the user out, so identical text sent to the same agent by
/// two users within the TTL shares one reply.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CachedReply>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    agent_id: AgentId,
    text: String,
}

#[derive(Clone, Debug)]
struct CachedReply {
    reply: String,
    stored_at: Instant,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, agent_id: &AgentId, text: &str) -> Option<String> {
        let key = CacheKey { agent_id: agent_id.clone(), text: text.to_string() };
        let mut entries = self.entries.lock().await;
        let lookup =
            entries.get(&key).map(|entry| (entry.stored_at.elapsed() < self.ttl, entry.reply.clone()));
        match lookup {
            Some((true, reply)) => Some(reply),
            Some((false, _)) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Overwrites any existing entry for the key.
    pub async fn insert(&self, agent_id: &AgentId, text: &str, reply: &str) {
        if self.ttl.is_zero() {
            return;
        }
        let key = CacheKey { agent_id: agent_id.clone(), text: text.to_string() };
        let entry = CachedReply { reply: reply.to_string(), stored_at: Instant::now() };
        self.entries.lock().await.insert(key, entry);
    }

    pub async fn invalidate_agent(&self, agent_id: &AgentId) {
        self.entries.lock().await.retain(|key, _| &key.agent_id != agent_id);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
