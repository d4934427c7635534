//! Typed error hierarchy for opendev.
//!
//! One enum per subsystem:
//! - `GenerationError`: completion requests to the role-bound models
//! - `SandboxError`: infrastructure faults while running generated code
//! - `RegistryError`: task lookups and record mutations
//! - `OrchestratorError`: rejected submissions and failures that abort a worker

use thiserror::Error;

use crate::task::Phase;

/// Errors from the generation service (Architect, Coder, Debugger calls).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No API credential configured for the generation service")]
    MissingCredential,

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{role} request failed: {source}")]
    Transport {
        role: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{role} request returned HTTP {status}: {body}")]
    Http {
        role: String,
        status: u16,
        body: String,
    },

    #[error("{role} response could not be parsed: {reason}")]
    InvalidResponse { role: String, reason: String },
}

/// Infrastructure faults inside the sandbox. These never abort a task; the
/// engine folds them into an `ExecutionResult` with status `error`.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("No code artifacts to execute")]
    EmptyArtifacts,

    #[error("Timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Refusing to write artifact outside the workspace: {path}")]
    UnsafePath { path: String },

    #[error("Failed to prepare workspace at {path}: {source}")]
    Workspace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("Failed to launch sandbox: {0}")]
    Launch(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Execution timed out after {secs}s and was terminated")]
    TimedOut { secs: u64 },
}

/// Errors from the task registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Task {id} already exists")]
    AlreadyExists { id: String },

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: Phase, to: Phase },
}

/// Errors that reject a submission or abort a task's worker. Worker errors
/// are recorded in the task's `error` field.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Task rejected: {0}")]
    Rejected(#[source] GenerationError),

    #[error("{phase} phase failed: {source}")]
    Generation {
        phase: Phase,
        #[source]
        source: GenerationError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
