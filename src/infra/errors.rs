// src/infra/errors.rs - Error types for simcoach

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// What kind of remote resource a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Scenario,
    Session,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Scenario => write!(f, "Scenario"),
            ResourceKind::Session => write!(f, "Session"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SimError {
    // Remote errors
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Remote service error: {message}")]
    RemoteFailure {
        message: String,
        status: Option<u16>,
        timed_out: bool,
    },

    #[error("Stale session pointer for scenario '{scenario_id}' (session '{session_id}')")]
    StalePointer {
        scenario_id: String,
        session_id: String,
    },

    // Lifecycle / caller errors
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("A message is already being sent for session '{session_id}'")]
    SendInFlight { session_id: String },

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error produced by a coalesced request and handed to every waiter.
    #[error(transparent)]
    Shared(Arc<SimError>),
}

impl SimError {
    pub fn remote(message: impl Into<String>) -> Self {
        SimError::RemoteFailure {
            message: message.into(),
            status: None,
            timed_out: false,
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        SimError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: impl fmt::Display) -> Self {
        SimError::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Unwrap shared errors down to the error that actually happened.
    pub fn root(&self) -> &SimError {
        match self {
            SimError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), SimError::NotFound { .. })
    }

    pub fn is_remote_failure(&self) -> bool {
        matches!(self.root(), SimError::RemoteFailure { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            SimError::RemoteFailure {
                timed_out: true,
                ..
            }
        )
    }
}

impl From<Arc<SimError>> for SimError {
    fn from(shared: Arc<SimError>) -> Self {
        match Arc::try_unwrap(shared) {
            Ok(owned) => owned,
            Err(shared) => SimError::Shared(shared),
        }
    }
}
