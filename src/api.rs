use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::errors::{GenerationError, OrchestratorError, RegistryError};
use crate::orchestrator::TaskOrchestrator;
use crate::task::{StatusSummary, TaskId, TaskRecord, TaskRequest};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: TaskOrchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_description: String,
    #[serde(default = "default_language")]
    pub target_language: String,
    #[serde(default)]
    pub target_framework: Option<String>,
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
}

fn default_language() -> String {
    "python".to_string()
}

impl From<SubmitTaskRequest> for TaskRequest {
    fn from(body: SubmitTaskRequest) -> Self {
        let framework = body.target_framework.filter(|f| !f.trim().is_empty());
        TaskRequest {
            description: body.task_description,
            language: body.target_language,
            framework,
            credential: body.openrouter_api_key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub total: usize,
    pub tasks: Vec<TaskId>,
    pub status_summary: StatusSummary,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Rejected(GenerationError::MissingCredential) => ApiError::BadRequest(
                "An OpenRouter API key is required: pass openrouter_api_key or configure one on the server"
                    .to_string(),
            ),
            OrchestratorError::Registry(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/submit_task", post(submit_task))
        .route("/api/task_status/{task_id}", get(task_status))
        .route("/api/tasks", get(list_tasks))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "opendev"}))
}

async fn submit_task(
    State(state): State<SharedState>,
    Json(body): Json<SubmitTaskRequest>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    if body.task_description.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "task_description must not be empty".to_string(),
        ));
    }
    let task_id = state.orchestrator.submit(body.into()).await?;
    Ok(Json(SubmitTaskResponse {
        task_id,
        status: "accepted".to_string(),
        message: "Task submitted for processing".to_string(),
    }))
}

async fn task_status(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    let record = state
        .orchestrator
        .registry()
        .get(&TaskId::from(task_id))
        .await?;
    Ok(Json(record))
}

async fn list_tasks(State(state): State<SharedState>) -> Json<TaskListResponse> {
    let registry = state.orchestrator.registry();
    let tasks: Vec<TaskId> = registry
        .list_all()
        .await
        .into_iter()
        .map(|record| record.task_id)
        .collect();
    Json(TaskListResponse {
        total: tasks.len(),
        tasks,
        status_summary: registry.summary().await,
    })
}
