use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidSlot,
    EmptyIntent,
    DuplicateSequence,
}

/// Serializable form of a rejected command, handed to event subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRejection {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandRejection {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A command that was refused before anything reached the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("slot {slot} is outside the configured range 1..={max}")]
    InvalidSlot { slot: usize, max: usize },
    #[error("nothing to send: {0}")]
    EmptyIntent(String),
    #[error("a sequence named {0:?} already exists")]
    DuplicateSequence(String),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::InvalidSlot { .. } => ErrorCode::InvalidSlot,
            CommandError::EmptyIntent(_) => ErrorCode::EmptyIntent,
            CommandError::DuplicateSequence(_) => ErrorCode::DuplicateSequence,
        }
    }
}

impl From<CommandError> for CommandRejection {
    fn from(value: CommandError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("device identity must not be empty")]
    Empty,
    #[error("device identity must not contain whitespace: {0:?}")]
    Whitespace(String),
}
