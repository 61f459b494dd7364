//! Client side of the notification stream.
//!
//! A [`Dispatcher`] owns one connection to `GET /api/events` at a time and
//! fans every received event out to local listeners:
//!
//! ```text
//!   disconnected ──▶ connecting ──open──▶ connected
//!        ▲               │                    │
//!        └──── retry ────┴──── error/end ─────┘
//! ```
//!
//! The retry delay is fixed. Listeners belong to the dispatcher, not to a
//! connection, so reconnecting never duplicates them.

pub mod notifications;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{DomainEvent, EventType};

/// Default pause between a dropped connection and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("cannot build event stream request: {0}")]
    Request(#[from] reqwest_eventsource::CannotCloneRequestError),
    #[error("event stream failed: {0}")]
    Stream(#[from] reqwest_eventsource::Error),
    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: String,
        source: serde_json::Error,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Events as the client sees them
// ─────────────────────────────────────────────────────────────────────────────

/// A message off the stream. Types this build does not know are kept
/// as-is so listeners can ignore them.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Domain(DomainEvent),
    Unknown {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl IncomingEvent {
    pub fn event_type_name(&self) -> &str {
        match self {
            Self::Domain(event) => event.event_type().as_str(),
            Self::Unknown { event_type, .. } => event_type,
        }
    }

    /// The known type, if any.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Self::Domain(event) => Some(event.event_type()),
            Self::Unknown { .. } => None,
        }
    }
}

/// Decode one SSE message.
///
/// The SSE event name wins; unnamed messages fall back to the `type` field
/// of the JSON body.
pub fn parse_message(event_name: &str, data: &str) -> Result<IncomingEvent, DispatcherError> {
    let payload: Option<serde_json::Value> = serde_json::from_str(data).ok();
    let name = match event_name {
        "" | "message" => payload
            .as_ref()
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("message")
            .to_string(),
        other => other.to_string(),
    };

    if EventType::parse(&name).is_none() {
        return Ok(IncomingEvent::Unknown {
            event_type: name,
            payload: payload.unwrap_or_else(|| serde_json::Value::String(data.to_string())),
        });
    }

    serde_json::from_str::<DomainEvent>(data)
        .map(IncomingEvent::Domain)
        .map_err(|source| DispatcherError::Payload {
            event_type: name,
            source,
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Full URL of the event stream endpoint
    pub url: String,
    /// Sent as a bearer token when set
    pub token: Option<String>,
    pub retry_delay: Duration,
}

impl DispatcherConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

type Listener = Arc<dyn Fn(&IncomingEvent) + Send + Sync>;

struct Shared {
    config: DispatcherConfig,
    client: reqwest::Client,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

struct Lifecycle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the stream connection and the listener list.
pub struct Dispatcher {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

/// Handle returned by [`Dispatcher::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    shared: Option<Weak<Shared>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the listener for the dispatcher's whole life.
    pub fn detach(mut self) {
        self.shared = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take().and_then(|w| w.upgrade()) {
            shared.listeners_guard().retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn listeners_guard(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        lock(&self.listeners)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "event stream state changed");
        }
    }

    /// Run every listener in registration order. A panicking listener is
    /// logged and skipped.
    fn dispatch(&self, event: &IncomingEvent) {
        let listeners: Vec<Listener> = self
            .listeners_guard()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(event_type = %event.event_type_name(), "event listener panicked");
            }
        }
    }

    /// One connection attempt, until the stream fails or ends.
    async fn connect_once(&self) -> Result<(), DispatcherError> {
        let mut request = self
            .client
            .get(&self.config.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let mut source = EventSource::new(request)?;
        source.set_retry_policy(Box::new(retry::Never));

        while let Some(item) = source.next().await {
            match item {
                Ok(Event::Open) => {
                    info!(url = %self.config.url, "event stream connected");
                    self.set_state(ConnectionState::Connected);
                }
                Ok(Event::Message(message)) => match parse_message(&message.event, &message.data) {
                    Ok(event) => self.dispatch(&event),
                    Err(e) => warn!("dropping event: {}", e),
                },
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    source.close();
                    return Ok(());
                }
                Err(e) => {
                    source.close();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = shared.connect_once() => outcome,
        };
        match outcome {
            Ok(()) => info!("event stream closed by server"),
            Err(e) => warn!("event stream lost: {}", e),
        }
        shared.set_state(ConnectionState::Disconnected);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.config.retry_delay) => {}
        }
    }
    shared.set_state(ConnectionState::Disconnected);
    debug!("event stream loop stopped");
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: DispatcherConfig, client: reqwest::Client) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                client,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                state,
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// Register a listener. It runs synchronously for every event, after
    /// the listeners registered before it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&IncomingEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners_guard()
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            shared: Some(Arc::downgrade(&self.shared)),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners_guard().len()
    }

    /// Deliver an event to the listeners as if it came off the stream.
    pub fn dispatch(&self, event: &IncomingEvent) {
        self.shared.dispatch(event);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Start the connect/retry loop. Calling it while the loop runs is a
    /// no-op. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        if let Some(running) = lifecycle.as_ref() {
            if !running.handle.is_finished() {
                return;
            }
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.shared), cancel.clone()));
        *lifecycle = Some(Lifecycle { cancel, handle });
    }

    /// Stop the loop. An in-flight connection attempt is abandoned, not
    /// awaited.
    pub fn shutdown(&self) {
        if let Some(running) = lock(&self.lifecycle).take() {
            running.cancel.cancel();
            running.handle.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.lifecycle).take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}
