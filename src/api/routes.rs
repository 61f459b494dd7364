//! Server assembly: shared state, router and the serve loop.

use std::sync::Arc;

use axum::middleware;
use axum::{extract::State, response::Json, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::events::EventBus;
use crate::overdue::OverdueReconciler;
use crate::store::{MemoryStore, SharedRepository, StoreError};
use crate::transport::ChannelRegistry;
use crate::workflow::WorkflowEngine;

use super::auth;
use super::types::HealthResponse;
use super::{indicators, overdue, stream, tasks, users};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub engine: WorkflowEngine,
    pub reconciler: Arc<OverdueReconciler>,
    /// Open event streams; also the event bus' only sink
    pub channels: Arc<ChannelRegistry>,
    /// Cancelled on shutdown; ends the sweep loop and open event streams
    pub shutdown: CancellationToken,
}

/// Wire the store, bus, engine and reconciler together.
pub fn build_state(config: Config) -> Result<Arc<AppState>, StoreError> {
    let repo: SharedRepository = match &config.data_path {
        Some(path) => Arc::new(MemoryStore::open(path.clone())?),
        None => Arc::new(MemoryStore::in_memory()),
    };
    Ok(build_state_with(config, repo))
}

/// Like [`build_state`] but over a caller-supplied repository.
pub fn build_state_with(config: Config, repo: SharedRepository) -> Arc<AppState> {
    let channels = Arc::new(ChannelRegistry::new(config.channel_capacity));
    let bus = EventBus::new().with_sink(channels.clone());
    let engine = WorkflowEngine::new(repo, bus);
    let reconciler = Arc::new(OverdueReconciler::new(
        engine.clone(),
        config.deadline_warning_days,
    ));
    Arc::new(AppState {
        config,
        engine,
        reconciler,
        channels,
        shutdown: CancellationToken::new(),
    })
}

/// The full HTTP router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    let protected_routes = Router::new()
        .route("/api/events", get(stream::events))
        .nest("/api/channels", stream::channel_routes())
        .nest("/api/indicators", indicators::routes())
        .nest("/api/tasks", tasks::routes())
        .nest("/api/overdue", overdue::routes())
        .nest("/api/users", users::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and the reminder sweep; run until ctrl-c/SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(config)?;

    let cancel = state.shutdown.clone();
    let sweep = tokio::spawn(
        Arc::clone(&state.reconciler).run(state.config.sweep_interval, cancel.clone()),
    );

    let app = router(Arc::clone(&state));
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Err(e) = sweep.await {
        tracing::warn!("Reminder sweep task ended abnormally: {}", e);
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing event streams...");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
        auth_required: state.config.auth.auth_required(state.config.dev_mode),
        connected_channels: state.channels.len().await,
    })
}
