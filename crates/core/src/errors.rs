use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid agent id `{0}`")]
    InvalidAgentId(String),
    #[error("invalid agent definition: {0}")]
    InvalidDefinition(String),
}
