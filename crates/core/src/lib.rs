pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ChannelMode, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::agent::{
    AgentDefinition, AgentId, AgentOverrides, AgentPatch, AgentRecord, DefinitionDefaults,
    StyleBuckets,
};
pub use domain::message::{MessageId, MessageRecord, MessageRole};
pub use errors::DomainError;

pub use chrono;
