//! Task endpoints: reads, subtasks, the submit/review workflow and cloning.
//!
//! `:id` is a main task or a subtask; the engine tells them apart by kind.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::routes::AppState;
use super::types::{ApiResponse, ApiResult, TaskView};
use crate::model::{CurrentUser, ReviewInput, SubmissionInput};
use crate::workflow::NewSubTask;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_task).delete(delete_task))
        .route("/:id/subtasks", get(list_subtasks).post(create_subtask))
        .route("/:id/submit", post(submit))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/clone", post(clone_task))
}

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    /// Deadline of the copy; must be in the future
    pub end_date: DateTime<Utc>,
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<TaskView> {
    Ok(ApiResponse::ok(TaskView::now(state.engine.get_task(id).await?)))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.engine.delete_task(&user, id).await?;
    Ok(ApiResponse::done("Task deleted"))
}

async fn list_subtasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<TaskView>> {
    let now = Utc::now();
    let subtasks = state.engine.subtasks(id).await?;
    Ok(ApiResponse::ok(
        subtasks.into_iter().map(|t| TaskView::at(t, now)).collect(),
    ))
}

async fn create_subtask(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewSubTask>,
) -> ApiResult<TaskView> {
    let task = state.engine.create_subtask(&user, id, req).await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(task), "Subtask created"))
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmissionInput>,
) -> ApiResult<TaskView> {
    let task = state.engine.submit(&user, id, req).await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(task), "Submitted for review"))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewInput>,
) -> ApiResult<TaskView> {
    let task = state.engine.approve(&user, id, req).await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(task), "Submission approved"))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewInput>,
) -> ApiResult<TaskView> {
    let task = state.engine.reject(&user, id, req).await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(task), "Submission rejected"))
}

async fn clone_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<CloneRequest>,
) -> ApiResult<TaskView> {
    let copy = state
        .reconciler
        .clone_overdue_task(&user, id, req.end_date)
        .await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(copy), "Task cloned"))
}
