use thiserror::Error;
use crate::model::AgentId;

pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Agent already has a live mailbox: {0}")]
    DuplicateAgent(AgentId),

    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent task failed: {0}")]
    TaskFailed(String),
}

impl MarketError {
    pub(crate) fn transition(from: impl std::fmt::Debug, event: &str) -> Self {
        MarketError::InvalidTransition {
            from: format!("{:?}", from),
            event: event.to_string(),
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MarketError {
    fn from(err: toml::de::Error) -> Self {
        MarketError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MarketError {
    fn from(err: toml::ser::Error) -> Self {
        MarketError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for MarketError {
    fn from(err: config::ConfigError) -> Self {
        MarketError::Config(err.to_string())
    }
}

impl From<std::io::Error> for MarketError {
    fn from(err: std::io::Error) -> Self {
        MarketError::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MarketError {
    fn from(err: tokio::task::JoinError) -> Self {
        MarketError::TaskFailed(err.to_string())
    }
}
