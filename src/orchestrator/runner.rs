//! The per-task worker: one Plan / Act / Observe / Fix pass.
//!
//! ```text
//! Planning ──> Coding ──> Testing ──success──────────────────> Finished
//!                            │
//!                            └─failed/error──> Debugging ──> Retesting ──> Finished
//! ```
//!
//! Exactly one repair cycle. Generation errors abort the task with the
//! phase left where it failed; sandbox errors are ordinary failed runs.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::OrchestratorError;
use crate::generation::{AgentRole, GenerationRequest, GenerationService, parse, prompts};
use crate::sandbox::SandboxEngine;
use crate::task::{
    CodeArtifactSet, ExecutionResult, Phase, Plan, TaskId, TaskRegistry, TaskRequest, TaskResult,
    TaskStatus, Verdict,
};

/// Progress reported once each step finishes.
const PROGRESS_PLANNED: u8 = 15;
const PROGRESS_CODED: u8 = 40;
const PROGRESS_TESTED: u8 = 65;
const PROGRESS_DEBUGGING: u8 = 80;

enum Step {
    Planning,
    Coding {
        plan: Plan,
    },
    Testing {
        plan: Plan,
        code: CodeArtifactSet,
    },
    Debugging {
        plan: Plan,
        code: CodeArtifactSet,
        execution: ExecutionResult,
    },
    Retesting {
        plan: Plan,
        code: CodeArtifactSet,
    },
    Finished,
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Coding { .. } => "coding",
            Self::Testing { .. } => "testing",
            Self::Debugging { .. } => "debugging",
            Self::Retesting { .. } => "retesting",
            Self::Finished => "finished",
        }
    }
}

pub(crate) struct TaskRunner {
    id: TaskId,
    request: TaskRequest,
    registry: TaskRegistry,
    generator: Arc<dyn GenerationService>,
    sandbox: Arc<SandboxEngine>,
    sandbox_timeout: Duration,
    result: TaskResult,
}

impl TaskRunner {
    pub(crate) fn new(
        id: TaskId,
        request: TaskRequest,
        registry: TaskRegistry,
        generator: Arc<dyn GenerationService>,
        sandbox: Arc<SandboxEngine>,
        sandbox_timeout: Duration,
    ) -> Self {
        Self {
            id,
            request,
            registry,
            generator,
            sandbox,
            sandbox_timeout,
            result: TaskResult::default(),
        }
    }

    /// Drive the task to a terminal status. Errors end up in the record.
    pub(crate) async fn run(mut self) {
        if let Err(e) = self.drive().await {
            tracing::error!(task_id = %self.id, error = %e, "Task failed");
            if let Err(record_err) = self.registry.fail(&self.id, e.to_string()).await {
                tracing::warn!(task_id = %self.id, error = %record_err, "Failed to record task failure");
            }
        }
    }

    async fn drive(&mut self) -> Result<(), OrchestratorError> {
        self.registry.set_status(&self.id, TaskStatus::Running).await?;

        let mut step = Step::Planning;
        loop {
            tracing::debug!(task_id = %self.id, step = step.name(), "Entering step");
            step = match step {
                Step::Planning => self.plan().await?,
                Step::Coding { plan } => self.code(plan).await?,
                Step::Testing { plan, code } => self.test(plan, code).await?,
                Step::Debugging {
                    plan,
                    code,
                    execution,
                } => self.debug(plan, code, execution).await?,
                Step::Retesting { plan, code } => self.retest(plan, code).await?,
                Step::Finished => return Ok(()),
            };
        }
    }

    async fn plan(&mut self) -> Result<Step, OrchestratorError> {
        self.log("[PHASE 1: PLANNING] Architect analyzing task...").await?;
        let request = GenerationRequest::new(
            prompts::build_plan_prompt(&self.request),
            "A detailed architecture plan with components and implementation steps",
        );
        let text = self
            .generate(AgentRole::Architect, Phase::Planning, request)
            .await?;
        let plan = parse::parse_plan(&text, &self.request);

        self.log(format!(
            "✓ Plan created: {} components identified",
            plan.components.len()
        ))
        .await?;
        self.result.plan = Some(plan.clone());
        self.publish_result().await?;
        self.advance(Phase::Coding, PROGRESS_PLANNED).await?;
        Ok(Step::Coding { plan })
    }

    async fn code(&mut self, plan: Plan) -> Result<Step, OrchestratorError> {
        self.log("[PHASE 2: CODING] Coder implementing solution...").await?;
        let request = GenerationRequest::new(
            prompts::build_coding_prompt(&plan),
            "Complete source files with unit tests",
        );
        let text = self.generate(AgentRole::Coder, Phase::Coding, request).await?;
        let code = parse::extract_artifacts(&text, &plan.target_language);

        self.log(format!("✓ Code generated: {} files", code.len())).await?;
        self.result.initial_code = Some(code.clone());
        self.publish_result().await?;
        self.advance(Phase::Testing, PROGRESS_CODED).await?;
        Ok(Step::Testing { plan, code })
    }

    async fn test(&mut self, plan: Plan, code: CodeArtifactSet) -> Result<Step, OrchestratorError> {
        self.log("[PHASE 3: TESTING] Executing code in sandbox...").await?;
        let execution = self.execute(&plan, &code).await;
        self.registry
            .set_progress(&self.id, PROGRESS_TESTED)
            .await?;
        self.log(format!("Execution status: {}", execution.status)).await?;
        self.result.initial_execution = Some(execution.clone());
        self.publish_result().await?;

        if execution.is_success() {
            self.log("✓ All tests passed").await?;
            self.finish(Verdict::Success).await?;
            return Ok(Step::Finished);
        }

        self.log("✗ Execution failed, entering debug phase").await?;
        self.advance(Phase::Debugging, PROGRESS_DEBUGGING).await?;
        Ok(Step::Debugging {
            plan,
            code,
            execution,
        })
    }

    async fn debug(
        &mut self,
        plan: Plan,
        code: CodeArtifactSet,
        execution: ExecutionResult,
    ) -> Result<Step, OrchestratorError> {
        self.log("[PHASE 4: DEBUGGING] Debugger analyzing failure...").await?;
        let request = GenerationRequest::new(
            prompts::build_debug_prompt(&execution, &code, &plan),
            "Fixed source files that resolve the failure",
        );
        let text = self
            .generate(AgentRole::Debugger, Phase::Debugging, request)
            .await?;
        let fixed = parse::extract_artifacts(&text, &plan.target_language);

        self.log(format!("✓ Fix applied: {} files", fixed.len())).await?;
        self.result.fixed_code = Some(fixed.clone());
        self.publish_result().await?;
        Ok(Step::Retesting { plan, code: fixed })
    }

    async fn retest(&mut self, plan: Plan, code: CodeArtifactSet) -> Result<Step, OrchestratorError> {
        self.log("[PHASE 5: RETESTING] Executing fixed code in sandbox...").await?;
        let execution = self.execute(&plan, &code).await;
        self.log(format!("Final execution status: {}", execution.status))
            .await?;

        let verdict = if execution.is_success() {
            self.log("✓ Fixed code passed").await?;
            Verdict::CompletedWithFixes
        } else {
            self.log("✗ Fixed code still failing").await?;
            Verdict::FailedAfterFix
        };
        self.result.final_execution = Some(execution);
        self.finish(verdict).await?;
        Ok(Step::Finished)
    }

    async fn finish(&mut self, verdict: Verdict) -> Result<(), OrchestratorError> {
        self.result.verdict = Some(verdict);
        self.publish_result().await?;
        self.registry
            .complete(&self.id, format!("Task completed ({})", verdict))
            .await?;
        tracing::info!(task_id = %self.id, verdict = %verdict, "Task completed");
        Ok(())
    }

    async fn generate(
        &self,
        role: AgentRole,
        phase: Phase,
        request: GenerationRequest,
    ) -> Result<String, OrchestratorError> {
        tracing::info!(task_id = %self.id, role = %role, phase = %phase, "Requesting generation");
        self.generator
            .generate(role, request)
            .await
            .map_err(|source| OrchestratorError::Generation { phase, source })
    }

    async fn execute(&self, plan: &Plan, code: &CodeArtifactSet) -> ExecutionResult {
        self.sandbox
            .execute(code, &plan.target_language, self.sandbox_timeout, &self.id)
            .await
    }

    async fn advance(&self, phase: Phase, progress: u8) -> Result<(), OrchestratorError> {
        self.registry.set_progress(&self.id, progress).await?;
        self.registry.set_phase(&self.id, phase).await?;
        Ok(())
    }

    async fn publish_result(&self) -> Result<(), OrchestratorError> {
        self.registry
            .set_result(&self.id, self.result.clone())
            .await?;
        Ok(())
    }

    async fn log(&self, line: impl Into<String>) -> Result<(), OrchestratorError> {
        self.registry.append_log(&self.id, line).await?;
        Ok(())
    }
}
