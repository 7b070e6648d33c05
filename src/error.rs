use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connect failed: {message}")]
    Connect {
        message: String,
        details: Option<String>,
    },
    #[error("A command is already in flight on this session")]
    Busy,
    #[error("Timed out after {waited:?} waiting for the device prompt")]
    Timeout { waited: Duration },
    #[error("Transport failed: {message}")]
    Transport {
        message: String,
        details: Option<String>,
    },
    #[error("Session is not connected")]
    NotConnected,
    #[error("Protocol error: {message}")]
    Protocol { message: String },
    #[error("Config error: {message}")]
    Config {
        message: String,
        details: Option<String>,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            details: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            details: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Connect { details, .. }
            | Self::Transport { details, .. }
            | Self::Config { details, .. } => *details = Some(value.into()),
            _ => {}
        }
        self
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Connect { details, .. }
            | Self::Transport { details, .. }
            | Self::Config { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
