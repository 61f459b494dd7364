//! `GET /api/events`: the caller's live notification stream.
//!
//! The connection stays open until the client goes away, an administrator
//! closes it, or the server shuts down. Keep-alive comments stop proxies
//! from timing it out.
//!
//! Administrators can inspect open streams:
//! - `GET /api/channels` - open streams, oldest first
//! - `DELETE /api/channels/:id` - close one; the client reconnects on its own

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get},
    Router,
};
use futures::stream::Stream;
use uuid::Uuid;

use super::routes::AppState;
use super::types::{ApiResponse, ApiResult};
use crate::model::CurrentUser;
use crate::transport::{to_sse_event, ChannelInfo};
use crate::workflow::WorkflowError;

pub fn channel_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_channels))
        .route("/:id", delete(close_channel))
}

pub async fn events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.channels.register(&user.id).await;
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            match to_sse_event(&envelope) {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    tracing::error!(
                        event_type = %envelope.event.event_type(),
                        "failed to encode event: {}",
                        e
                    );
                }
            }
        }
        tracing::debug!(channel = %subscription.id(), "event stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn ensure_admin(user: &CurrentUser) -> Result<(), WorkflowError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(
            "only administrators can manage event channels",
        ))
    }
}

async fn list_channels(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Vec<ChannelInfo>> {
    ensure_admin(&user)?;
    Ok(ApiResponse::ok(state.channels.list().await))
}

/// Dropping the sender ends the stream, which the client sees as a disconnect.
async fn close_channel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    ensure_admin(&user)?;
    if !state.channels.unregister(id).await {
        return Err(WorkflowError::NotFound {
            entity: "channel",
            id: id.to_string(),
        }
        .into());
    }
    Ok(ApiResponse::done("Channel closed"))
}
