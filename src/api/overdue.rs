//! Overdue reporting endpoints.
//!
//! - `GET /api/overdue` - every task past its deadline and not approved
//! - `GET /api/overdue/warnings?year=&quarter=` - overdue counts per user

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use chrono::Utc;

use super::routes::AppState;
use super::types::{ApiResponse, ApiResult};
use crate::overdue::{OverdueTask, PeriodFilter, UserWarning};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_overdue))
        .route("/warnings", get(warnings))
}

async fn list_overdue(State(state): State<Arc<AppState>>) -> ApiResult<Vec<OverdueTask>> {
    Ok(ApiResponse::ok(
        state.reconciler.scan_overdue(Utc::now()).await?,
    ))
}

async fn warnings(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PeriodFilter>,
) -> ApiResult<Vec<UserWarning>> {
    Ok(ApiResponse::ok(
        state.reconciler.warnings(filter, Utc::now()).await?,
    ))
}
