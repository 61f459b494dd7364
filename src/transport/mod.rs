//! Notification transport: one streaming channel per connected session.
//!
//! [`ChannelRegistry`] is the only state shared across requests. Each SSE
//! connection registers a bounded queue under its user id; the registry is an
//! [`EventSink`], so every published event is offered to every matching
//! queue. Delivery is best-effort: no replay for late joiners, and a closed
//! queue is dropped from the registry instead of failing the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{Envelope, EventSink};

/// Default per-channel queue length.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Channel {
    user_id: String,
    sender: mpsc::Sender<Arc<Envelope>>,
    connected_at: DateTime<Utc>,
}

/// Snapshot of a registered channel, as listed to administrators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelInfo {
    pub id: Uuid,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
}

/// Registry of open streaming channels.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<Uuid, Channel>>,
    capacity: usize,
}

impl ChannelRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a channel for `user_id`. Dropping the returned subscription
    /// deregisters it.
    pub async fn register(self: &Arc<Self>, user_id: &str) -> ChannelSubscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.channels.write().await.insert(
            id,
            Channel {
                user_id: user_id.to_string(),
                sender,
                connected_at: Utc::now(),
            },
        );
        info!(channel = %id, user = %user_id, "event channel registered");
        ChannelSubscription {
            id,
            receiver,
            registry: Arc::clone(self),
        }
    }

    pub async fn unregister(&self, id: Uuid) -> bool {
        let removed = self.channels.write().await.remove(&id).is_some();
        if removed {
            info!(channel = %id, "event channel deregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Open channels, oldest first.
    pub async fn list(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, c)| ChannelInfo {
                id: *id,
                user_id: c.user_id.clone(),
                connected_at: c.connected_at,
            })
            .collect();
        infos.sort_by_key(|c| c.connected_at);
        infos
    }

    /// Offer an envelope to every channel in its audience.
    ///
    /// Returns how many channels accepted it. Closed channels are removed;
    /// a full channel misses this event but stays registered.
    pub async fn broadcast(&self, envelope: Arc<Envelope>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let channels = self.channels.read().await;
            for (id, channel) in channels.iter() {
                if !envelope.audience.includes(&channel.user_id) {
                    continue;
                }
                match channel.sender.try_send(Arc::clone(&envelope)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            channel = %id,
                            event_type = %envelope.event.event_type(),
                            "event channel full, dropping event"
                        );
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut channels = self.channels.write().await;
            for id in closed {
                if channels.remove(&id).is_some() {
                    debug!(channel = %id, "removed closed event channel");
                }
            }
        }
        delivered
    }
}

#[async_trait]
impl EventSink for ChannelRegistry {
    async fn deliver(&self, envelope: Arc<Envelope>) {
        self.broadcast(envelope).await;
    }
}

/// Receiving end of a registered channel.
pub struct ChannelSubscription {
    id: Uuid,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    registry: Arc<ChannelRegistry>,
}

impl ChannelSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.recv().await
    }

    /// Stop accepting events; the next broadcast drops this channel.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unregister(id).await;
            });
        }
    }
}

/// Encode an envelope as an SSE message: event name is the event type,
/// data is the JSON event including its `type` field.
pub fn to_sse_event(envelope: &Envelope) -> Result<Event, axum::Error> {
    Event::default()
        .event(envelope.event.event_type().as_str())
        .json_data(&envelope.event)
}
