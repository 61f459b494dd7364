//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - public
//! - `GET /api/events` - SSE notification stream
//! - `/api/channels` - open streams (administrators)
//! - `/api/indicators`, `/api/tasks`, `/api/overdue`, `/api/users`
//!
//! Everything but health sits behind [`auth::require_auth`].

pub mod auth;
mod indicators;
mod overdue;
mod routes;
mod stream;
mod tasks;
pub mod types;
mod users;

pub use routes::{build_state, build_state_with, router, serve, AppState};
