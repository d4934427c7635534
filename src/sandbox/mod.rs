//! Sandbox execution engine: runs generated code in a disposable unit.
//!
//! ## Flow of one `execute` call
//!
//! ```text
//! artifacts ──> TaskWorkspace::create(<work_dir>/<task_id>)
//!                 └─ materialize() writes every file
//!           ──> Language::command()  (test-first, or diagnostic `ls -la`)
//!           ──> ContainerRuntime::run()  (Docker or local process group;
//!                                          timeout hard-kills the unit)
//!           ──> ExecutionResult  (exit 0 = success, nonzero = failed,
//!                                 infrastructure fault = error)
//!           ──> TaskWorkspace::cleanup()  (always; Drop covers panics)
//! ```
//!
//! Concurrent calls for different task ids never share a directory, so the
//! engine itself needs no locking.

pub mod language;
pub mod runtime;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{RuntimeKind, SandboxSection};
use crate::errors::SandboxError;
use crate::task::{CodeArtifactSet, ExecutionMode, ExecutionResult, TaskId};

pub use language::{Language, SandboxCommand};
pub use runtime::{
    ContainerRuntime, DockerRuntime, OutputBuffer, ProcessRuntime, ResourceLimits, RunOutput,
    RunSpec,
};
pub use workspace::TaskWorkspace;

pub struct SandboxEngine {
    runtime: Arc<dyn ContainerRuntime>,
    work_dir: PathBuf,
    limits: ResourceLimits,
    max_output_bytes: usize,
}

impl SandboxEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        work_dir: impl Into<PathBuf>,
        limits: ResourceLimits,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            runtime,
            work_dir: work_dir.into(),
            limits,
            max_output_bytes,
        }
    }

    /// Build the engine and its runtime from the `[sandbox]` section.
    pub fn from_config(config: &SandboxSection) -> anyhow::Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = match config.runtime {
            RuntimeKind::Docker => Arc::new(DockerRuntime::connect(config.image.clone())?),
            RuntimeKind::Process => Arc::new(ProcessRuntime::new()),
        };
        let limits = ResourceLimits {
            memory_bytes: config.memory_bytes()?,
            cpus: config.cpus,
        };
        Ok(Self::new(
            runtime,
            config.work_dir.clone(),
            limits,
            config.max_output_bytes,
        ))
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Run `artifacts` for `task_id` and classify the outcome.
    ///
    /// Never fails: infrastructure faults come back as status `error`.
    pub async fn execute(
        &self,
        artifacts: &CodeArtifactSet,
        language: &str,
        timeout: Duration,
        task_id: &TaskId,
    ) -> ExecutionResult {
        let started = Instant::now();
        let language = Language::parse(language);
        let command = language.command(artifacts);
        if command.mode == ExecutionMode::Diagnostic {
            tracing::warn!(
                task_id = %task_id,
                language = %language,
                "Unsupported language, running diagnostic listing instead of a toolchain"
            );
        }

        let outcome = self.run_in_workspace(artifacts, &command, timeout, task_id).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                tracing::info!(
                    task_id = %task_id,
                    runtime = self.runtime.name(),
                    exit_code = output.exit_code,
                    duration_ms = elapsed,
                    "Sandbox run finished"
                );
                ExecutionResult::from_exit(
                    output.exit_code,
                    output.stdout,
                    output.stderr,
                    command.mode,
                    elapsed,
                )
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Sandbox execution error");
                ExecutionResult::infrastructure_error(e.to_string(), command.mode, elapsed)
            }
        }
    }

    async fn run_in_workspace(
        &self,
        artifacts: &CodeArtifactSet,
        command: &SandboxCommand,
        timeout: Duration,
        task_id: &TaskId,
    ) -> Result<RunOutput, SandboxError> {
        if artifacts.is_empty() {
            return Err(SandboxError::EmptyArtifacts);
        }
        if timeout.is_zero() {
            return Err(SandboxError::InvalidTimeout);
        }

        let workspace = TaskWorkspace::create(&self.work_dir, task_id).await?;
        let result = async {
            let count = workspace.materialize(artifacts).await?;
            tracing::info!(
                task_id = %task_id,
                files = count,
                command = %command.script,
                "Running sandbox command"
            );
            let spec = RunSpec {
                task_id: task_id.to_string(),
                workspace: workspace.path().to_path_buf(),
                script: command.script.clone(),
                timeout,
                limits: self.limits,
                max_output_bytes: self.max_output_bytes,
            };
            self.runtime.run(&spec).await
        }
        .await;
        workspace.cleanup().await;
        result
    }
}
