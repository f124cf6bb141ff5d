//! Error types for the orchestration core

use std::fmt;
use std::time::Duration;

use passdeck_agent::AgentError;
use sea_orm::DbErr;
use thiserror::Error;

/// Coarse category of a [`ControlError`], seen through any wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    RemoteFailure,
    Timeout,
    Conflict,
    Database,
}

/// Which half of a dual-endpoint creation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStep {
    Server,
    Client,
}

impl fmt::Display for PairStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairStep::Server => f.write_str("server"),
            PairStep::Client => f.write_str("client"),
        }
    }
}

/// Phase of an edit-as-replace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePhase {
    Resolve,
    Delete,
    Create,
}

impl fmt::Display for ReplacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacePhase::Resolve => f.write_str("resolve"),
            ReplacePhase::Delete => f.write_str("delete"),
            ReplacePhase::Create => f.write_str("create"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The agent refused or could not be reached; carries its message verbatim
    #[error("Remote failure: {0}")]
    RemoteFailure(String),

    /// Delete was accepted but removal was not observed in time
    #[error("Deletion of instance {instance_id} not confirmed within {waited:?}")]
    Timeout {
        instance_id: String,
        waited: Duration,
    },

    /// Another delete of the same instance took over the wait
    #[error("Deletion of instance {instance_id} was superseded by another delete request")]
    Superseded { instance_id: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Failed to create {step} tunnel: {source}")]
    StepFailed {
        step: PairStep,
        source: Box<ControlError>,
    },

    #[error("Edit failed during {phase} phase: {source}")]
    ReplaceFailed {
        phase: ReplacePhase,
        source: Box<ControlError>,
    },
}

impl ControlError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ControlError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ControlError::NotFound(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ControlError::NotFound(_) => ErrorKind::NotFound,
            ControlError::RemoteFailure(_) => ErrorKind::RemoteFailure,
            ControlError::Timeout { .. } => ErrorKind::Timeout,
            ControlError::Superseded { .. } => ErrorKind::Conflict,
            ControlError::Database(_) => ErrorKind::Database,
            ControlError::StepFailed { source, .. } => source.kind(),
            ControlError::ReplaceFailed { source, .. } => source.kind(),
        }
    }

    pub(crate) fn in_step(self, step: PairStep) -> Self {
        ControlError::StepFailed {
            step,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_phase(self, phase: ReplacePhase) -> Self {
        ControlError::ReplaceFailed {
            phase,
            source: Box::new(self),
        }
    }
}

impl From<AgentError> for ControlError {
    fn from(err: AgentError) -> Self {
        ControlError::RemoteFailure(err.message())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
