use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use conduit_core::domain::agent::{
    AgentDefinition, AgentId, AgentOverrides, AgentPatch, AgentRecord, DefinitionDefaults,
};
use conduit_core::errors::DomainError;
use conduit_db::repositories::AgentRepository;

use crate::channel::{AgentChannel, ChannelError};
use crate::template::TemplateStore;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent template `{name}` not found at {}", path.display())]
    TemplateNotFound { name: String, path: PathBuf },
    #[error("agent template could not be read: {0}")]
    Template(String),
    #[error("agent `{0}` not found")]
    AgentNotFound(AgentId),
    #[error(transparent)]
    InvalidDefinition(#[from] DomainError),
    #[error("runtime channel rejected the request: {0}")]
    Transport(#[from] ChannelError),
}

/// Where a new agent's definition comes from.
#[derive(Clone, Debug)]
pub enum AgentSource {
    Template(String),
    Custom(AgentDefinition),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub channel_deleted: bool,
    pub store_deleted: bool,
}

/// Keeps the persistent store and the active channel in agreement.
///
/// The channel is authoritative for existence; the store is a write-through
/// cache that also serves reads when the channel is down. Deleted ids are
/// remembered so that a lagging channel listing cannot bring them back.
pub struct AgentRegistry {
    channel: Arc<dyn AgentChannel>,
    store: Arc<dyn AgentRepository>,
    templates: TemplateStore,
    defaults: DefinitionDefaults,
    tombstones: RwLock<HashSet<AgentId>>,
}

impl AgentRegistry {
    pub fn new(
        channel: Arc<dyn AgentChannel>,
        store: Arc<dyn AgentRepository>,
        templates: TemplateStore,
        defaults: DefinitionDefaults,
    ) -> Self {
        Self { channel, store, templates, defaults, tombstones: RwLock::new(HashSet::new()) }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub async fn create_agent(
        &self,
        source: AgentSource,
        overrides: AgentOverrides,
    ) -> Result<AgentRecord, RegistryError> {
        let mut definition = match source {
            AgentSource::Template(name) => self.templates.load(&name).await?,
            AgentSource::Custom(definition) => definition,
        };
        definition.apply_overrides(&overrides);
        let definition = definition.normalized(&self.defaults)?;

        let id = self.channel.create_agent(&definition).await?;
        self.tombstones.write().await.remove(&id);

        let record = AgentRecord::from_definition(id, &definition, Utc::now());
        if let Err(error) = self.store.upsert(record.clone()).await {
            warn!(
                event_name = "registry.store_write_failed",
                agent_id = %record.id,
                error = %error,
                "agent created in runtime but not persisted"
            );
        }

        info!(
            event_name = "registry.agent_created",
            agent_id = %record.id,
            agent_name = %record.name,
            mode = self.channel.mode().as_str(),
            "agent created"
        );
        Ok(record)
    }

    /// Store first, then the channel; a channel hit is written back.
    pub async fn get_agent(&self, id: &AgentId) -> Result<AgentRecord, RegistryError> {
        if self.is_tombstoned(id).await {
            return Err(RegistryError::AgentNotFound(id.clone()));
        }

        match self.store.find_by_id(id).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(error) => {
                warn!(agent_id = %id, error = %error, "store lookup failed, asking runtime");
            }
        }

        match self.channel.get_agent(id).await {
            Ok(Some(record)) => {
                if let Err(error) = self.store.upsert(record.clone()).await {
                    warn!(agent_id = %id, error = %error, "failed to cache agent from runtime");
                }
                Ok(record)
            }
            Ok(None) => Err(RegistryError::AgentNotFound(id.clone())),
            Err(error) => {
                warn!(agent_id = %id, error = %error, "runtime lookup failed");
                Err(RegistryError::AgentNotFound(id.clone()))
            }
        }
    }

    /// Never fails: a runtime outage degrades to the stored view, and a store
    /// outage degrades to the runtime view.
    pub async fn list_agents(&self) -> Vec<AgentRecord> {
        let tombstones = self.tombstones.read().await.clone();
        let visible = |records: Vec<AgentRecord>| {
            records.into_iter().filter(|record| !tombstones.contains(&record.id)).collect::<Vec<_>>()
        };

        let remote = match self.channel.list_agents().await {
            Ok(records) => records,
            Err(error) => {
                warn!(
                    event_name = "registry.list_degraded",
                    error = %error,
                    "runtime listing failed, serving stored agents"
                );
                return match self.store.list_all().await {
                    Ok(stored) => visible(stored),
                    Err(store_error) => {
                        warn!(error = %store_error, "stored agent listing failed too");
                        Vec::new()
                    }
                };
            }
        };
        let stored = match self.store.list_all().await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(error = %error, "store listing failed, serving runtime agents");
                return visible(remote);
            }
        };
        self.prune_tombstones(&remote, &stored).await;
        let remote = visible(remote);
        let known = stored.iter().map(|record| (&record.id, record)).collect::<HashMap<_, _>>();

        let mut merged = 0_usize;
        for record in &remote {
            let unchanged = known.get(&record.id).is_some_and(|existing| same_content(existing, record));
            if unchanged {
                continue;
            }
            match self.store.upsert(record.clone()).await {
                Ok(()) => merged += 1,
                Err(error) => warn!(agent_id = %record.id, error = %error, "failed to merge agent"),
            }
        }
        debug!(remote = remote.len(), merged, "merged runtime listing into store");

        match self.store.list_all().await {
            Ok(all) => visible(all),
            Err(error) => {
                warn!(error = %error, "store re-read failed, serving runtime agents");
                remote
            }
        }
    }

    pub async fn update_agent(
        &self,
        id: &AgentId,
        patch: &AgentPatch,
    ) -> Result<AgentRecord, RegistryError> {
        let mut record = self.get_agent(id).await?;
        if patch.is_empty() {
            return Ok(record);
        }

        if let Err(error) = self.channel.update_agent(id, patch).await {
            warn!(agent_id = %id, error = %error, "runtime rejected agent update");
        }
        record.apply_patch(patch, Utc::now());
        if let Err(error) = self.store.upsert(record.clone()).await {
            warn!(agent_id = %id, error = %error, "failed to persist agent update");
        }

        info!(event_name = "registry.agent_updated", agent_id = %id, "agent updated");
        Ok(record)
    }

    /// Removes the agent from both sides. Failures on either side are logged
    /// and reported in the outcome, never raised.
    pub async fn delete_agent(&self, id: &AgentId) -> DeleteOutcome {
        let channel_deleted = match self.channel.delete_agent(id).await {
            Ok(()) => true,
            Err(error) => {
                warn!(agent_id = %id, error = %error, "runtime delete failed");
                false
            }
        };
        self.tombstones.write().await.insert(id.clone());

        let store_deleted = match self.store.delete(id).await {
            Ok(deleted) => deleted,
            Err(error) => {
                warn!(agent_id = %id, error = %error, "store delete failed");
                false
            }
        };

        info!(
            event_name = "registry.agent_deleted",
            agent_id = %id,
            channel_deleted,
            store_deleted,
            "agent deleted"
        );
        DeleteOutcome { channel_deleted, store_deleted }
    }

    /// A tombstone is only needed while some side still holds the id. Once
    /// neither the runtime listing nor the store has it, it is dropped, which
    /// keeps the set bounded by the deletes the runtime has not yet applied.
    async fn prune_tombstones(&self, remote: &[AgentRecord], stored: &[AgentRecord]) {
        let mut tombstones = self.tombstones.write().await;
        if tombstones.is_empty() {
            return;
        }
        let live = remote.iter().chain(stored).map(|record| &record.id).collect::<HashSet<_>>();
        let before = tombstones.len();
        tombstones.retain(|id| live.contains(id));
        if tombstones.len() != before {
            debug!(pruned = before - tombstones.len(), "dropped settled tombstones");
        }
    }

    #[cfg(test)]
    pub(crate) async fn tombstone_count(&self) -> usize {
        self.tombstones.read().await.len()
    }

    async fn is_tombstoned(&self, id: &AgentId) -> bool {
        self.tombstones.read().await.contains(id)
    }
}

fn same_content(left: &AgentRecord, right: &AgentRecord) -> bool {
    left.name == right.name
        && left.description == right.description
        && left.system_prompt == right.system_prompt
        && left.metadata == right.metadata
}
