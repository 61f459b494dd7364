//! User directory endpoints. Reads are open to every caller; changes are
//! limited to administrators.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::{get, put},
    Json, Router,
};

use super::routes::AppState;
use super::types::{ApiResponse, ApiResult};
use crate::model::{CurrentUser, User};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/me", get(whoami))
        .route("/:id", put(update_user).delete(delete_user))
}

async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Vec<User>> {
    Ok(ApiResponse::ok(state.engine.list_users().await?))
}

/// The caller as the auth layer resolved it.
async fn whoami(Extension(user): Extension<CurrentUser>) -> ApiResult<CurrentUser> {
    Ok(ApiResponse::ok(user))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CurrentUser>,
    Json(req): Json<User>,
) -> ApiResult<User> {
    let user = state.engine.create_user(&caller, req).await?;
    Ok(ApiResponse::ok_with_message(user, "User created"))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<User>,
) -> ApiResult<User> {
    let user = state.engine.update_user(&caller, &id, req).await?;
    Ok(ApiResponse::ok_with_message(user, "User updated"))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.engine.delete_user(&caller, &id).await?;
    Ok(ApiResponse::done("User deleted"))
}
