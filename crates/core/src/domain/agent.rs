use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Accepts any non-empty id that is safe to embed in a URL path segment.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= 128
            && !trimmed.chars().any(|ch| ch.is_whitespace() || matches!(ch, '/' | '?' | '#'));
        if !valid {
            return Err(DomainError::InvalidAgentId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical view of an agent as kept in the persistent store.
///
/// `metadata` is the full agent definition as an opaque JSON value. Its schema
/// belongs to the external runtime and is not interpreted beyond a few lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn from_definition(id: AgentId, definition: &AgentDefinition, now: DateTime<Utc>) -> Self {
        let mut metadata = serde_json::to_value(definition).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut metadata {
            map.insert("id".to_string(), Value::String(id.0.clone()));
        }

        Self {
            id,
            name: definition.name.clone(),
            description: definition.summary(),
            system_prompt: definition.system.clone().unwrap_or_default(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_patch(&mut self, patch: &AgentPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(system_prompt) = &patch.system_prompt {
            self.system_prompt = system_prompt.clone();
        }
        if let Some(metadata) = &patch.metadata {
            merge_json(&mut self.metadata, metadata);
        }
        self.updated_at = now;
    }

    /// Looks up a string at a dotted path inside the opaque metadata.
    pub fn metadata_str(&self, path: &str) -> Option<&str> {
        let mut current = &self.metadata;
        for key in path.split('.') {
            current = current.get(key)?;
        }
        current.as_str().filter(|value| !value.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "system", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.system_prompt.is_none()
            && self.metadata.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleBuckets {
    #[serde(default, deserialize_with = "null_as_default")]
    pub all: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chat: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub post: Vec<String>,
}

/// Agent definition as handed to a runtime channel.
///
/// List-valued fields always deserialize to empty containers, whether the
/// source omits them or sets them to `null`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub bio: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub capabilities: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plugins: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub style: StyleBuckets,
    #[serde(default)]
    pub settings: Value,
    /// Runtime-specific fields (`topics`, `messageExamples`, `clients`, ...) carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefinitionDefaults {
    pub model_provider: String,
    pub model: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentOverrides {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub settings: Option<Value>,
}

impl AgentOverrides {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }
}

impl AgentDefinition {
    pub fn apply_overrides(&mut self, overrides: &AgentOverrides) {
        if let Some(name) = &overrides.name {
            self.name = name.clone();
        }
        if let Some(description) = &overrides.description {
            self.description = description.clone();
        }
        if let Some(system_prompt) = &overrides.system_prompt {
            self.system = Some(system_prompt.clone());
        }
        if let Some(settings) = &overrides.settings {
            merge_json(&mut self.settings, settings);
        }
    }

    /// Fills provider/model from defaults and enforces the shape every channel expects.
    pub fn normalized(mut self, defaults: &DefinitionDefaults) -> Result<Self, DomainError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(DomainError::InvalidDefinition("name is required".to_string()));
        }
        if let Some(id) = &self.id {
            AgentId::parse(id)?;
        }

        if self.model_provider.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            self.model_provider = Some(defaults.model_provider.clone());
        }
        if self.model.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            self.model = Some(defaults.model.clone());
        }
        if !self.settings.is_object() {
            self.settings = Value::Object(Map::new());
        }

        Ok(self)
    }

    pub fn summary(&self) -> String {
        if !self.description.trim().is_empty() {
            return self.description.clone();
        }
        self.bio.join(" ")
    }
}

/// Deep-merges `patch` into `target`: objects merge key by key, anything else replaces.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Accepts `"text"`, `["a", "b"]` or `null` for a list of strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(text)) if text.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(text)) => vec![text],
        Some(OneOrMany::Many(items)) => items,
        None => Vec::new(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
