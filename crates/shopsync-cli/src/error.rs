use std::io;

use shopsync_core::config::ConfigError;
use shopsync_core::listener::ListenerError;
use shopsync_core::sync::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shopsync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Action URL cannot be empty")]
    EmptyUrl,
    #[error("--body is not valid JSON: {0}")]
    InvalidBody(serde_json::Error),
    #[error("Action ID cannot be empty")]
    EmptyActionId,
    #[error("Action not found for id/prefix: {0}")]
    ActionNotFound(String),
    #[error("{0}")]
    AmbiguousActionId(String),
}
