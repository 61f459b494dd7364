//! # Taskflow
//!
//! Indicator and task tracking with an approval workflow and live
//! notifications.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP handlers ──▶ WorkflowEngine ──▶ Repository
//!                         │
//!   OverdueReconciler ────┤ publish
//!                         ▼
//!                      EventBus ──▶ ChannelRegistry ══SSE══▶ Dispatcher
//!                                                              │
//!                                               ToastFeed ◀────┴───▶ BellInbox
//! ```
//!
//! ## Modules
//! - `model`: indicators, tasks, submissions, users and derived status
//! - `workflow`: submit/approve/reject and CRUD, the only writer of tasks
//! - `overdue`: overdue scan, cloning, warnings and the reminder sweep
//! - `events`: the event catalog and the in-process bus
//! - `transport`: per-connection SSE channels
//! - `client`: reconnecting stream consumer and its toast/bell views
//! - `store`: persistence behind a trait
//! - `api`: the axum HTTP surface

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod model;
pub mod overdue;
pub mod store;
pub mod transport;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use workflow::{WorkflowEngine, WorkflowError};
