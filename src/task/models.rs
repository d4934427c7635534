use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Stage of a task's processing lifecycle.
///
/// The only legal moves are:
///
/// ```text
/// planning -> coding -> testing -> complete
///                          \
///                           -> debugging -> complete
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Coding,
    Testing,
    Debugging,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Testing => "testing",
            Self::Debugging => "debugging",
            Self::Complete => "complete",
        }
    }

    /// Whether a record in this phase may move to `next`.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::Coding)
                | (Self::Coding, Self::Testing)
                | (Self::Testing, Self::Debugging)
                | (Self::Testing, Self::Complete)
                | (Self::Debugging, Self::Complete)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "testing" => Ok(Self::Testing),
            "debugging" => Ok(Self::Debugging),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Architecture plan produced by the Architect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub components: Vec<String>,
    pub plan_text: String,
    pub target_language: String,
    pub framework: Option<String>,
}

/// Generated source files, keyed by path relative to the workspace root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifactSet {
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl CodeArtifactSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Exit code 0.
    Success,
    /// Code ran and exited nonzero.
    Failed,
    /// The sandbox itself could not run the code.
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the real toolchain ran or the diagnostic fallback for an
/// unsupported language.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Toolchain,
    Diagnostic,
}

/// Outcome of one sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Absent when the sandbox failed before the code produced an exit code.
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Classify a finished run purely by its exit code.
    pub fn from_exit(
        exit_code: i64,
        stdout: String,
        stderr: String,
        mode: ExecutionMode,
        duration_ms: u64,
    ) -> Self {
        let status = if exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        Self {
            status,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            error: None,
            mode,
            duration_ms,
        }
    }

    pub fn infrastructure_error(message: String, mode: ExecutionMode, duration_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Error,
            exit_code: None,
            stdout: String::new(),
            stderr: message.clone(),
            error: Some(message),
            mode,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Final classification of a completed task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// First run passed.
    Success,
    /// First run failed, the fixed code passed.
    CompletedWithFixes,
    /// First run failed and so did the fixed code.
    FailedAfterFix,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CompletedWithFixes => "completed_with_fixes",
            Self::FailedAfterFix => "failed_after_fix",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a task produced so far. Filled in phase by phase so a failed
/// task still exposes the artifacts it reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub verdict: Option<Verdict>,
    pub plan: Option<Plan>,
    pub initial_code: Option<CodeArtifactSet>,
    pub initial_execution: Option<ExecutionResult>,
    pub fixed_code: Option<CodeArtifactSet>,
    pub final_execution: Option<ExecutionResult>,
}

/// Process-lifetime status record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub phase: Phase,
    pub progress: u8,
    pub logs: Vec<String>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Pending,
            phase: Phase::Planning,
            progress: 0,
            logs: vec!["Task queued for processing".to_string()],
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A coding task as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    pub language: String,
    pub framework: Option<String>,
    /// Credential for the generation service; falls back to the configured one.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            language: language.into(),
            framework: None,
            credential: None,
        }
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}
