//! Task data model and the shared registry of task records.

pub mod models;
pub mod registry;

pub use models::{
    CodeArtifactSet, ExecutionMode, ExecutionResult, ExecutionStatus, Phase, Plan, TaskId,
    TaskRecord, TaskRequest, TaskResult, TaskStatus, Verdict,
};
pub use registry::{StatusSummary, TaskRegistry};
