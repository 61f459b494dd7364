//! Indicator endpoints.
//!
//! - `GET /api/indicators` - every indicator with its derived status
//! - `POST /api/indicators` - create (managers and administrators)
//! - `GET /api/indicators/:id` - one indicator
//! - `DELETE /api/indicators/:id` - delete with all its tasks
//! - `GET /api/indicators/:id/tasks` - its main tasks
//! - `POST /api/indicators/:id/tasks` - add a main task

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::routes::AppState;
use super::types::{ApiResponse, ApiResult, TaskView};
use crate::model::{CurrentUser, Indicator, IndicatorView};
use crate::workflow::{NewIndicator, NewMainTask};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_indicators).post(create_indicator))
        .route("/:id", get(get_indicator).delete(delete_indicator))
        .route("/:id/tasks", get(list_main_tasks).post(create_main_task))
}

async fn list_indicators(State(state): State<Arc<AppState>>) -> ApiResult<Vec<IndicatorView>> {
    Ok(ApiResponse::ok(state.engine.list_indicators().await?))
}

async fn create_indicator(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<NewIndicator>,
) -> ApiResult<Indicator> {
    let indicator = state.engine.create_indicator(&user, req).await?;
    Ok(ApiResponse::ok_with_message(indicator, "Indicator created"))
}

async fn get_indicator(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<IndicatorView> {
    Ok(ApiResponse::ok(state.engine.indicator_view(id).await?))
}

async fn delete_indicator(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.engine.delete_indicator(&user, id).await?;
    Ok(ApiResponse::done("Indicator deleted"))
}

async fn list_main_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<TaskView>> {
    let tasks = state.engine.main_tasks(id).await?;
    Ok(ApiResponse::ok(tasks.into_iter().map(TaskView::now).collect()))
}

async fn create_main_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewMainTask>,
) -> ApiResult<TaskView> {
    let task = state.engine.create_main_task(&user, id, req).await?;
    Ok(ApiResponse::ok_with_message(TaskView::now(task), "Task created"))
}
