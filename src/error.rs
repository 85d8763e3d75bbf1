//! Crate-wide error taxonomy.
//!
//! Component errors (`ModelError`, `AdbError`, `MemoryError`, `StateError`)
//! convert into [`PilotError`] so the orchestrator can decide whether a
//! failure ends the current step or the whole mission.

use thiserror::Error;

use crate::device::AdbError;
use crate::memory::MemoryError;
use crate::mission::StateError;
use crate::model::ModelError;

/// Errors surfaced by the mission loop.
#[derive(Error, Debug)]
pub enum PilotError {
    /// Device or reasoning backend unreachable or timed out.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Cyclic plan, schema-invalid model response, or nothing to execute.
    #[error("Planning error: {0}")]
    Planning(String),
    /// An individual action failed.
    #[error("Execution error: {0}")]
    Execution(String),
    /// A safety checkpoint rejected the action.
    #[error("Checkpoint denied for action {0}")]
    CheckpointDenied(String),
    /// No approval arrived before the checkpoint deadline.
    #[error("Checkpoint timed out for action {0}")]
    CheckpointTimeout(String),
    /// Invalid configuration or storage unavailable at startup.
    #[error("Fatal error: {0}")]
    Fatal(String),
    /// Durable state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PilotError {
    /// Whether this error counts toward the consecutive transport failure limit.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this error ends the mission immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<ModelError> for PilotError {
    fn from(err: ModelError) -> Self {
        if err.is_transient() {
            Self::Transport(err.to_string())
        } else {
            match err {
                ModelError::ParseError(msg) => Self::Planning(msg),
                other => Self::Transport(other.to_string()),
            }
        }
    }
}

impl From<AdbError> for PilotError {
    fn from(err: AdbError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<MemoryError> for PilotError {
    fn from(err: MemoryError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<StateError> for PilotError {
    fn from(err: StateError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PilotError>;
