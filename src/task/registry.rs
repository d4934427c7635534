//! In-memory task registry shared by task workers and status readers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use super::models::{Phase, TaskId, TaskRecord, TaskResult, TaskStatus};
use crate::errors::RegistryError;

/// Count of tasks per status, as reported by the listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Concurrency-safe map from task id to its status record.
///
/// Every mutator takes the write lock for the duration of a single update,
/// so readers observe either the old or the new value, never a
/// half-written record. Cloning the registry shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record (pending, planning, progress 0).
    pub async fn create(&self, id: TaskId) -> Result<TaskRecord, RegistryError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(RegistryError::AlreadyExists { id: id.to_string() });
        }
        let record = TaskRecord::new(id.clone());
        tasks.insert(id, record.clone());
        Ok(record)
    }

    /// Snapshot of a record.
    pub async fn get(&self, id: &TaskId) -> Result<TaskRecord, RegistryError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Snapshots of every record, oldest first.
    pub async fn list_all(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub async fn summary(&self) -> StatusSummary {
        let tasks = self.tasks.read().await;
        let mut summary = StatusSummary::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.status = status;
            Ok(())
        })
        .await
    }

    /// Move to `phase`. Re-entering the current phase is a no-op; any move
    /// outside the phase graph is rejected.
    pub async fn set_phase(&self, id: &TaskId, phase: Phase) -> Result<(), RegistryError> {
        self.update(id, |record| move_phase(record, phase)).await
    }

    /// Raise progress to `progress` (clamped to 100). Lower values are ignored.
    pub async fn set_progress(&self, id: &TaskId, progress: u8) -> Result<(), RegistryError> {
        let progress = progress.min(100);
        self.update(id, |record| {
            if progress < record.progress {
                tracing::warn!(
                    task_id = %record.task_id,
                    current = record.progress,
                    requested = progress,
                    "Ignoring progress decrease"
                );
                return Ok(());
            }
            record.progress = progress;
            Ok(())
        })
        .await
    }

    pub async fn append_log(&self, id: &TaskId, line: impl Into<String>) -> Result<(), RegistryError> {
        let line = line.into();
        self.update(id, |record| {
            record.logs.push(line);
            Ok(())
        })
        .await
    }

    pub async fn set_result(&self, id: &TaskId, result: TaskResult) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.result = Some(result);
            Ok(())
        })
        .await
    }

    pub async fn set_error(&self, id: &TaskId, error: impl Into<String>) -> Result<(), RegistryError> {
        let error = error.into();
        self.update(id, |record| {
            record.error = Some(error);
            Ok(())
        })
        .await
    }

    /// Mark a task failed: status, error, and an `ERROR:` log line in one
    /// write so readers never see a failed status without its reason.
    pub async fn fail(&self, id: &TaskId, error: impl Into<String>) -> Result<(), RegistryError> {
        let error = error.into();
        self.update(id, |record| {
            record.status = TaskStatus::Failed;
            record.logs.push(format!("ERROR: {}", error));
            record.error = Some(error);
            Ok(())
        })
        .await
    }

    /// Finish a task: phase `complete`, progress 100, status `completed` and
    /// the closing log line land in one write.
    pub async fn complete(&self, id: &TaskId, line: impl Into<String>) -> Result<(), RegistryError> {
        let line = line.into();
        self.update(id, |record| {
            move_phase(record, Phase::Complete)?;
            record.progress = 100;
            record.status = TaskStatus::Completed;
            record.logs.push(line);
            Ok(())
        })
        .await
    }

    async fn update<F>(&self, id: &TaskId, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut TaskRecord) -> Result<(), RegistryError>,
    {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
        f(record)?;
        record.updated_at = Utc::now();
        Ok(())
    }
}

/// Re-entering the current phase is a no-op; moves off the graph are errors.
fn move_phase(record: &mut TaskRecord, phase: Phase) -> Result<(), RegistryError> {
    if record.phase == phase {
        return Ok(());
    }
    if !record.phase.can_advance_to(phase) {
        return Err(RegistryError::InvalidTransition {
            id: record.task_id.to_string(),
            from: record.phase,
            to: phase,
        });
    }
    record.phase = phase;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_returns_initial_record() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();

        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.task_id, id);
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.phase, Phase::Planning);
        assert_eq!(record.progress, 0);
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let registry = TaskRegistry::new();
        let err = registry.get(&TaskId::from("never-submitted")).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotFound {
                id: "never-submitted".to_string()
            }
        );
    }

    #[tokio::test]
    async fn mutating_unknown_task_is_not_found() {
        let registry = TaskRegistry::new();
        let id = TaskId::from("ghost");
        assert!(registry.append_log(&id, "x").await.is_err());
        assert!(registry.set_progress(&id, 10).await.is_err());
        assert!(registry.set_status(&id, TaskStatus::Running).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let registry = TaskRegistry::new();
        let id = TaskId::from("dup");
        registry.create(id.clone()).await.unwrap();
        assert!(matches!(
            registry.create(id).await,
            Err(RegistryError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();

        registry.set_progress(&id, 40).await.unwrap();
        registry.set_progress(&id, 15).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().progress, 40);

        registry.set_progress(&id, 250).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn phase_transitions_follow_graph() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();

        let err = registry.set_phase(&id, Phase::Testing).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        registry.set_phase(&id, Phase::Coding).await.unwrap();
        registry.set_phase(&id, Phase::Coding).await.unwrap();
        registry.set_phase(&id, Phase::Testing).await.unwrap();
        registry.set_phase(&id, Phase::Debugging).await.unwrap();
        registry.set_phase(&id, Phase::Complete).await.unwrap();

        assert!(registry.set_phase(&id, Phase::Planning).await.is_err());
        assert_eq!(registry.get(&id).await.unwrap().phase, Phase::Complete);
    }

    #[tokio::test]
    async fn complete_sets_phase_progress_and_status_together() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();
        registry.set_status(&id, TaskStatus::Running).await.unwrap();

        let err = registry.complete(&id, "Task completed").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        let untouched = registry.get(&id).await.unwrap();
        assert_eq!(untouched.status, TaskStatus::Running);
        assert_eq!(untouched.phase, Phase::Planning);

        registry.set_phase(&id, Phase::Coding).await.unwrap();
        registry.set_phase(&id, Phase::Testing).await.unwrap();
        registry.complete(&id, "Task completed (success)").await.unwrap();

        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.phase, Phase::Complete);
        assert_eq!(record.progress, 100);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.logs.last().unwrap(), "Task completed (success)");
    }

    #[tokio::test]
    async fn logs_are_append_only_and_ordered() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();
        registry.append_log(&id, "first").await.unwrap();
        registry.append_log(&id, "second").await.unwrap();

        let logs = registry.get(&id).await.unwrap().logs;
        assert_eq!(logs[1..], ["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn fail_records_status_error_and_log() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        registry.create(id.clone()).await.unwrap();
        registry.fail(&id, "model unreachable").await.unwrap();

        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model unreachable"));
        assert_eq!(record.logs.last().unwrap(), "ERROR: model unreachable");
    }

    #[tokio::test]
    async fn summary_counts_each_status() {
        let registry = TaskRegistry::new();
        let a = TaskId::new();
        let b = TaskId::new();
        let c = TaskId::new();
        for id in [&a, &b, &c] {
            registry.create(id.clone()).await.unwrap();
        }
        registry.set_status(&b, TaskStatus::Running).await.unwrap();
        registry.set_status(&c, TaskStatus::Completed).await.unwrap();

        let summary = registry.summary().await;
        assert_eq!(
            summary,
            StatusSummary {
                pending: 1,
                running: 1,
                completed: 1,
                failed: 0
            }
        );
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn concurrent_inserts_and_reads_do_not_lose_records() {
        let registry = TaskRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = TaskId::new();
                registry.create(id.clone()).await.unwrap();
                for p in [10u8, 20, 30] {
                    registry.set_progress(&id, p).await.unwrap();
                    registry.append_log(&id, format!("progress {}", p)).await.unwrap();
                }
                let _ = registry.list_all().await;
                id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }

        assert_eq!(registry.list_all().await.len(), 32);
        for id in ids {
            let record = registry.get(&id).await.unwrap();
            assert_eq!(record.progress, 30);
            assert_eq!(record.logs.len(), 4);
        }
    }
}
