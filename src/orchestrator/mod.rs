//! Task lifecycle orchestration.
//!
//! `TaskOrchestrator::submit` registers a task and returns at once; the work
//! happens on a spawned worker (`runner::TaskRunner`). Each worker runs under
//! a supervising task that records a panic as an ordinary task failure, so
//! one misbehaving task never takes down the process or other records.

mod runner;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::errors::OrchestratorError;
use crate::generation::{GenerationService, GenerationServiceFactory};
use crate::sandbox::SandboxEngine;
use crate::task::{TaskId, TaskRecord, TaskRegistry, TaskRequest};

use runner::TaskRunner;

pub struct TaskOrchestrator {
    registry: TaskRegistry,
    generators: Arc<dyn GenerationServiceFactory>,
    sandbox: Arc<SandboxEngine>,
    sandbox_timeout: Duration,
}

impl TaskOrchestrator {
    pub fn new(
        registry: TaskRegistry,
        generators: Arc<dyn GenerationServiceFactory>,
        sandbox: Arc<SandboxEngine>,
        sandbox_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            generators,
            sandbox,
            sandbox_timeout,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Accept a task and start its worker in the background.
    ///
    /// Fails only when no generation service can be built for the request
    /// (typically a missing credential); nothing is registered in that case.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, OrchestratorError> {
        let (id, _handle) = self.start(request).await?;
        Ok(id)
    }

    /// Run one task in the foreground and return its terminal record.
    pub async fn run(&self, request: TaskRequest) -> Result<TaskRecord, OrchestratorError> {
        let (id, handle) = self.start(request).await?;
        if let Err(e) = handle.await {
            tracing::warn!(task_id = %id, error = %e, "Supervisor task ended abnormally");
        }
        Ok(self.registry.get(&id).await?)
    }

    async fn start(
        &self,
        request: TaskRequest,
    ) -> Result<(TaskId, JoinHandle<()>), OrchestratorError> {
        let generator = self
            .generators
            .for_credential(request.credential.as_deref())
            .map_err(OrchestratorError::Rejected)?;

        let id = TaskId::new();
        self.registry.create(id.clone()).await?;
        tracing::info!(
            task_id = %id,
            language = %request.language,
            framework = request.framework.as_deref().unwrap_or("none"),
            "Task accepted"
        );

        let handle = self.spawn_supervised(id.clone(), request, generator);
        Ok((id, handle))
    }

    fn spawn_supervised(
        &self,
        id: TaskId,
        request: TaskRequest,
        generator: Arc<dyn GenerationService>,
    ) -> JoinHandle<()> {
        let runner = TaskRunner::new(
            id.clone(),
            request,
            self.registry.clone(),
            generator,
            Arc::clone(&self.sandbox),
            self.sandbox_timeout,
        );
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let worker = tokio::spawn(runner.run());
            let Err(join_err) = worker.await else {
                return;
            };
            let reason = if join_err.is_panic() {
                format!("Task worker panicked: {}", panic_message(join_err.into_panic()))
            } else {
                "Task worker was cancelled".to_string()
            };
            tracing::error!(task_id = %id, reason = %reason, "Task worker aborted");
            if let Err(e) = registry.fail(&id, reason).await {
                tracing::warn!(task_id = %id, error = %e, "Failed to record worker abort");
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::errors::{GenerationError, SandboxError};
    use crate::generation::AgentRole;
    use crate::sandbox::ResourceLimits;
    use crate::sandbox::testing::{FakeRun, FakeRuntime};
    use crate::task::testing::PhaseRecorder;
    use crate::task::{ExecutionStatus, Phase, TaskStatus, Verdict};

    struct Harness {
        orchestrator: TaskOrchestrator,
        generator: Arc<ScriptedGenerator>,
        runtime: Arc<FakeRuntime>,
        _work: tempfile::TempDir,
    }

    fn harness(generator: ScriptedGenerator, runs: Vec<FakeRun>, registry: TaskRegistry) -> Harness {
        harness_with_runtime(generator, FakeRuntime::new(runs), registry)
    }

    fn harness_with_runtime(
        generator: ScriptedGenerator,
        runtime: FakeRuntime,
        registry: TaskRegistry,
    ) -> Harness {
        let work = tempfile::tempdir().unwrap();
        let generator = Arc::new(generator);
        let runtime = Arc::new(runtime);
        let sandbox = Arc::new(SandboxEngine::new(
            runtime.clone(),
            work.path(),
            ResourceLimits::default(),
            64 * 1024,
        ));
        let orchestrator = TaskOrchestrator::new(
            registry,
            Arc::new(ScriptedFactory::new(generator.clone())),
            sandbox,
            Duration::from_secs(60),
        );
        Harness {
            orchestrator,
            generator,
            runtime,
            _work: work,
        }
    }

    fn pass() -> FakeRun {
        FakeRun::Exit {
            code: 0,
            stdout: "1 passed",
            stderr: "",
        }
    }

    fn fail() -> FakeRun {
        FakeRun::Exit {
            code: 1,
            stdout: "",
            stderr: "AssertionError: assert 23 == 5",
        }
    }

    fn add_task() -> TaskRequest {
        TaskRequest::new("Create a Python function that adds two numbers", "python")
    }

    #[tokio::test]
    async fn passing_task_completes_without_debugging() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE)),
            vec![pass()],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.phase, Phase::Complete);
        assert_eq!(record.progress, 100);
        assert!(record.error.is_none());

        let result = record.result.unwrap();
        assert_eq!(result.verdict, Some(Verdict::Success));
        assert_eq!(result.plan.unwrap().components, vec!["calculator", "tests"]);
        let code = result.initial_code.unwrap();
        assert!(code.contains("main.py"));
        assert!(code.contains("tests.py"));
        assert_eq!(result.initial_execution.unwrap().status, ExecutionStatus::Success);
        assert!(result.fixed_code.is_none());

        assert!(h.generator.calls_for(AgentRole::Debugger).is_empty());
        assert_eq!(h.runtime.seen().len(), 1);
        assert!(record.logs[0].contains("queued"));
        assert!(record.logs.iter().any(|l| l.contains("2 components")));
        assert!(record.logs.iter().any(|l| l.contains("All tests passed")));
    }

    #[tokio::test]
    async fn failing_run_is_debugged_once_and_fixed() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(AgentRole::Debugger, Reply::text(FIXED)),
            vec![fail(), pass()],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.phase, Phase::Complete);
        assert_eq!(record.progress, 100);
        let result = record.result.unwrap();
        assert_eq!(result.verdict, Some(Verdict::CompletedWithFixes));
        assert_eq!(result.initial_execution.unwrap().status, ExecutionStatus::Failed);
        assert_eq!(result.final_execution.unwrap().status, ExecutionStatus::Success);
        assert!(result.fixed_code.unwrap().files["main.py"].contains("int(a)"));

        let debug_calls = h.generator.calls_for(AgentRole::Debugger);
        assert_eq!(debug_calls.len(), 1);
        assert!(debug_calls[0].prompt.contains("AssertionError"));
        assert!(debug_calls[0].prompt.contains("EXIT CODE: 1"));
        assert_eq!(h.runtime.seen().len(), 2);
    }

    #[tokio::test]
    async fn fix_that_still_fails_completes_as_failed_after_fix() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(AgentRole::Debugger, Reply::text(FIXED)),
            vec![fail(), fail()],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.phase, Phase::Complete);
        let result = record.result.unwrap();
        assert_eq!(result.verdict, Some(Verdict::FailedAfterFix));
        assert_eq!(result.final_execution.unwrap().status, ExecutionStatus::Failed);
        assert_eq!(h.generator.calls_for(AgentRole::Debugger).len(), 1);
        assert_eq!(h.runtime.seen().len(), 2);
    }

    #[tokio::test]
    async fn sandbox_error_goes_through_repair_cycle() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(AgentRole::Debugger, Reply::text(FIXED)),
            vec![FakeRun::Fail(SandboxError::TimedOut { secs: 60 }), pass()],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        let result = record.result.unwrap();
        let initial = result.initial_execution.unwrap();
        assert_eq!(initial.status, ExecutionStatus::Error);
        assert!(initial.exit_code.is_none());
        assert_eq!(result.verdict, Some(Verdict::CompletedWithFixes));
        let prompt = &h.generator.calls_for(AgentRole::Debugger)[0].prompt;
        assert!(prompt.contains("SANDBOX ERROR"));
        assert!(prompt.contains("EXIT CODE: none"));
    }

    #[tokio::test]
    async fn planning_failure_is_fatal_and_freezes_phase() {
        let h = harness(
            ScriptedGenerator::new().reply(
                AgentRole::Architect,
                Reply::Fail(GenerationError::Http {
                    role: "architect".to_string(),
                    status: 401,
                    body: "invalid api key".to_string(),
                }),
            ),
            vec![],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.phase, Phase::Planning);
        assert_eq!(record.progress, 0);
        let error = record.error.unwrap();
        assert!(error.contains("planning phase failed"));
        assert!(error.contains("401"));
        assert!(record.logs.last().unwrap().starts_with("ERROR: "));
        assert!(h.generator.calls_for(AgentRole::Coder).is_empty());
        assert!(h.runtime.seen().is_empty());
    }

    #[tokio::test]
    async fn debugger_failure_keeps_partial_results() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(
                    AgentRole::Debugger,
                    Reply::Fail(GenerationError::InvalidResponse {
                        role: "debugger".to_string(),
                        reason: "response contained no message content".to_string(),
                    }),
                ),
            vec![fail()],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.phase, Phase::Debugging);
        assert_eq!(record.progress, 80);
        let result = record.result.unwrap();
        assert!(result.plan.is_some());
        assert!(result.initial_code.is_some());
        assert_eq!(result.initial_execution.unwrap().status, ExecutionStatus::Failed);
        assert!(result.fixed_code.is_none());
        assert!(result.verdict.is_none());
    }

    #[tokio::test]
    async fn malformed_output_still_terminates() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text("I cannot follow formats."))
                .reply(AgentRole::Coder, Reply::text("just some prose, no code at all"))
                .reply(AgentRole::Debugger, Reply::text("still prose")),
            vec![
                FakeRun::Exit {
                    code: 1,
                    stdout: "",
                    stderr: "SyntaxError: invalid syntax",
                },
                FakeRun::Exit {
                    code: 1,
                    stdout: "",
                    stderr: "SyntaxError: invalid syntax",
                },
            ],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Completed);
        let result = record.result.unwrap();
        assert!(result.plan.unwrap().components.is_empty());
        let code = result.initial_code.unwrap();
        assert_eq!(code.files["main.py"], "just some prose, no code at all");
        assert_eq!(result.verdict, Some(Verdict::FailedAfterFix));
        assert_eq!(h.runtime.seen()[0].files, vec!["main.py"]);
    }

    #[tokio::test]
    async fn phases_and_progress_only_move_forward() {
        let registry = TaskRegistry::new();
        let recorder = Arc::new(PhaseRecorder::new(registry.clone()));
        let h = harness_with_runtime(
            ScriptedGenerator::new()
                .observing(recorder.clone())
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(AgentRole::Debugger, Reply::text(FIXED)),
            FakeRuntime::new(vec![fail(), pass()]).observing(recorder.clone()),
            registry,
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        let mut observed = recorder.samples();
        observed.push((record.phase, record.progress));
        assert_eq!(
            observed,
            vec![
                (Phase::Planning, 0),
                (Phase::Coding, 15),
                (Phase::Testing, 40),
                (Phase::Debugging, 80),
                (Phase::Debugging, 80),
                (Phase::Complete, 100),
            ]
        );
        for pair in observed.windows(2) {
            let ((from, p0), (to, p1)) = (pair[0], pair[1]);
            assert!(p1 >= p0);
            assert!(from == to || from.can_advance_to(to), "{} -> {}", from, to);
        }
    }

    #[tokio::test]
    async fn passing_task_goes_straight_from_testing_to_complete() {
        let registry = TaskRegistry::new();
        let recorder = Arc::new(PhaseRecorder::new(registry.clone()));
        let h = harness_with_runtime(
            ScriptedGenerator::new()
                .observing(recorder.clone())
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE)),
            FakeRuntime::new(vec![pass()]).observing(recorder.clone()),
            registry,
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        let mut observed = recorder.samples();
        observed.push((record.phase, record.progress));
        assert_eq!(
            observed,
            vec![
                (Phase::Planning, 0),
                (Phase::Coding, 15),
                (Phase::Testing, 40),
                (Phase::Complete, 100),
            ]
        );
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.logs.last().unwrap(), "Task completed (success)");
    }

    #[tokio::test]
    async fn worker_panic_is_recorded_as_failure() {
        let h = harness(
            ScriptedGenerator::new().reply(AgentRole::Architect, Reply::Panic),
            vec![],
            TaskRegistry::new(),
        );

        let record = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.contains("panicked"), "{}", error);
        assert!(error.contains("scripted architect panic"));
    }

    #[tokio::test]
    async fn sandbox_panic_does_not_affect_other_tasks() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE))
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE)),
            vec![FakeRun::Panic, pass()],
            TaskRegistry::new(),
        );

        let first = h.orchestrator.run(add_task()).await.unwrap();
        let second = h.orchestrator.run(add_task()).await.unwrap();

        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(second.status, TaskStatus::Completed);
        assert_ne!(first.task_id, second.task_id);
        assert!(!h.runtime.seen()[0].workspace.exists());
    }

    #[tokio::test]
    async fn submit_returns_before_the_task_finishes() {
        let h = harness(
            ScriptedGenerator::new()
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE)),
            vec![pass()],
            TaskRegistry::new(),
        );

        let id = h.orchestrator.submit(add_task()).await.unwrap();
        assert!(h.orchestrator.registry().get(&id).await.is_ok());

        let record = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = h.orchestrator.registry().get(&id).await.unwrap();
                if record.status.is_terminal() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn missing_credential_rejects_without_registering() {
        let generator = Arc::new(ScriptedGenerator::new());
        let work = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::new();
        let orchestrator = TaskOrchestrator::new(
            registry.clone(),
            Arc::new(ScriptedFactory {
                generator,
                require_credential: true,
            }),
            Arc::new(SandboxEngine::new(
                Arc::new(FakeRuntime::default()),
                work.path(),
                ResourceLimits::default(),
                1024,
            )),
            Duration::from_secs(60),
        );

        let err = orchestrator.submit(add_task()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Rejected(GenerationError::MissingCredential)
        ));
        assert!(registry.is_empty().await);

        let id = orchestrator
            .submit(add_task().with_credential("sk-task"))
            .await
            .unwrap();
        assert!(registry.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_tasks_keep_separate_records() {
        let mut generator = ScriptedGenerator::new();
        for _ in 0..4 {
            generator = generator
                .reply(AgentRole::Architect, Reply::text(PLAN))
                .reply(AgentRole::Coder, Reply::text(CODE));
        }
        let h = Arc::new(harness(generator, vec![], TaskRegistry::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.orchestrator
                    .run(TaskRequest::new(format!("task {}", i), "python"))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            let record = handle.await.unwrap();
            assert_eq!(record.status, TaskStatus::Completed);
            ids.push(record.task_id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(h.orchestrator.registry().len().await, 4);
    }
}
