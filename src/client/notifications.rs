//! Two ways of showing the same event stream to a user.
//!
//! - [`ToastFeed`]: short-lived banners for [`TOAST_EVENTS`], dismissed
//!   automatically after a TTL.
//! - [`BellInbox`]: a persistent read/unread list for [`BELL_EVENTS`], plus
//!   the latest per-user counters.
//!
//! The allow-lists overlap. Anything in neither list, including event types
//! this build does not know, is ignored.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{Dispatcher, IncomingEvent, Subscription};
use crate::events::{DomainEvent, EventType};

/// Event types rendered as toasts.
pub const TOAST_EVENTS: &[EventType] = &[
    EventType::TaskCreated,
    EventType::SubtaskCreated,
    EventType::IndicatorCreated,
    EventType::TaskApproved,
    EventType::TaskRejected,
    EventType::SubtaskApproved,
    EventType::SubtaskRejected,
    EventType::MainTaskDeadlineSoon,
    EventType::SubtaskDeadlineSoon,
    EventType::TaskOverdue,
];

/// Event types kept in the bell inbox.
pub const BELL_EVENTS: &[EventType] = &[
    EventType::TaskApproved,
    EventType::TaskRejected,
    EventType::SubtaskApproved,
    EventType::SubtaskRejected,
    EventType::MainTaskDeadlineSoon,
    EventType::SubtaskDeadlineSoon,
    EventType::IndicatorDeadlineSoon,
    EventType::TaskOverdue,
    EventType::IndicatorOverdue,
];

pub const DEFAULT_TOAST_TTL_SECS: i64 = 5;
pub const DEFAULT_BELL_CAPACITY: usize = 100;

/// Title and body text for an event.
pub fn describe(event: &DomainEvent) -> (String, String) {
    use DomainEvent::*;
    match event {
        TaskCreated { task } => ("New task".to_string(), task.content.clone()),
        SubtaskCreated { task } => ("New subtask".to_string(), task.content.clone()),
        TaskUpdated { task } | SubtaskUpdated { task } => {
            ("Task updated".to_string(), task.content.clone())
        }
        TaskDeleted { task_id } => ("Task deleted".to_string(), task_id.to_string()),
        IndicatorCreated { indicator } => ("New indicator".to_string(), indicator.name.clone()),
        IndicatorUpdated { indicator } => {
            ("Indicator updated".to_string(), indicator.name.clone())
        }
        IndicatorDeleted { indicator_id } => {
            ("Indicator deleted".to_string(), indicator_id.to_string())
        }
        UserCreated { user } => ("New user".to_string(), user.name.clone()),
        UserUpdated { user } => ("User updated".to_string(), user.name.clone()),
        UserDeleted { user_id } => ("User removed".to_string(), user_id.clone()),
        TaskApproved(n) | SubtaskApproved(n) => (
            "Submission approved".to_string(),
            format!("{}: {}", n.content, n.comment),
        ),
        TaskRejected(n) | SubtaskRejected(n) => (
            "Submission rejected".to_string(),
            format!("{}: {}", n.content, n.comment),
        ),
        MainTaskDeadlineSoon(n) | SubtaskDeadlineSoon(n) | IndicatorDeadlineSoon(n) => (
            "Deadline approaching".to_string(),
            format!("{} is due in {} day(s)", n.title, n.days_left),
        ),
        TaskOverdue(n) | IndicatorOverdue(n) => (
            "Overdue".to_string(),
            format!("{} is {} day(s) overdue", n.title, n.days_overdue),
        ),
        TasksIncompleteCount(n) => (
            "Incomplete tasks".to_string(),
            format!("{} task(s) still open", n.count),
        ),
        TasksPendingApprovalCount(n) => (
            "Awaiting approval".to_string(),
            format!("{} submission(s) to review", n.count),
        ),
    }
}

fn allowed<'a>(event: &'a IncomingEvent, list: &[EventType]) -> Option<&'a DomainEvent> {
    match event {
        IncomingEvent::Domain(e) if list.contains(&e.event_type()) => Some(e),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toasts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub expires_at: DateTime<Utc>,
}

pub struct ToastFeed {
    ttl: Duration,
    next_id: u64,
    toasts: Vec<Toast>,
}

impl Default for ToastFeed {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TOAST_TTL_SECS))
    }
}

impl ToastFeed {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 0,
            toasts: Vec::new(),
        }
    }

    /// Show a toast if the event is on the toast list.
    pub fn push(&mut self, event: &IncomingEvent, now: DateTime<Utc>) -> Option<u64> {
        let event = allowed(event, TOAST_EVENTS)?;
        let (title, body) = describe(event);
        let id = self.next_id;
        self.next_id += 1;
        self.toasts.push(Toast {
            id,
            event_type: event.event_type().as_str().to_string(),
            title,
            body,
            expires_at: now + self.ttl,
        });
        Some(id)
    }

    /// Toasts still on screen at `now`; expired ones are dropped.
    pub fn active(&mut self, now: DateTime<Utc>) -> Vec<Toast> {
        self.toasts.retain(|t| t.expires_at > now);
        self.toasts.clone()
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.id != id);
        self.toasts.len() != before
    }

    /// Feed this toast list from `dispatcher`.
    pub fn attach(feed: &Arc<Mutex<Self>>, dispatcher: &Dispatcher) -> Subscription {
        let feed = Arc::clone(feed);
        dispatcher.subscribe(move |event| {
            let mut feed = feed.lock().unwrap_or_else(|p| p.into_inner());
            feed.push(event, Utc::now());
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bell
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BellItem {
    pub id: u64,
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub read: bool,
}

/// Latest counters the server pushed for this user.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CountBadges {
    pub incomplete: Option<usize>,
    pub pending_approval: Option<usize>,
}

pub struct BellInbox {
    capacity: usize,
    next_id: u64,
    /// Newest first
    items: VecDeque<BellItem>,
    badges: CountBadges,
}

impl Default for BellInbox {
    fn default() -> Self {
        Self::new(DEFAULT_BELL_CAPACITY)
    }
}

impl BellInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            items: VecDeque::new(),
            badges: CountBadges::default(),
        }
    }

    /// File an event. Count events update the badges; bell-listed events
    /// become unread items. Everything else is ignored.
    pub fn push(&mut self, event: &IncomingEvent, now: DateTime<Utc>) -> Option<u64> {
        if let IncomingEvent::Domain(domain) = event {
            match domain {
                DomainEvent::TasksIncompleteCount(n) => {
                    self.badges.incomplete = Some(n.count);
                    return None;
                }
                DomainEvent::TasksPendingApprovalCount(n) => {
                    self.badges.pending_approval = Some(n.count);
                    return None;
                }
                _ => {}
            }
        }

        let event = allowed(event, BELL_EVENTS)?;
        let (title, body) = describe(event);
        let id = self.next_id;
        self.next_id += 1;
        self.items.push_front(BellItem {
            id,
            event_type: event.event_type().as_str().to_string(),
            title,
            body,
            received_at: now,
            read: false,
        });
        self.items.truncate(self.capacity);
        Some(id)
    }

    pub fn items(&self) -> Vec<BellItem> {
        self.items.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|i| !i.read).count()
    }

    pub fn badges(&self) -> CountBadges {
        self.badges
    }

    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for item in self.items.iter_mut() {
            item.read = true;
        }
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        self.items.len() != before
    }

    /// Feed this inbox from `dispatcher`.
    pub fn attach(inbox: &Arc<Mutex<Self>>, dispatcher: &Dispatcher) -> Subscription {
        let inbox = Arc::clone(inbox);
        dispatcher.subscribe(move |event| {
            let mut inbox = inbox.lock().unwrap_or_else(|p| p.into_inner());
            inbox.push(event, Utc::now());
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::client::DispatcherConfig;
    use crate::events::{CountNotice, OverdueNotice, ReviewNotice};

    fn domain(event: DomainEvent) -> IncomingEvent {
        IncomingEvent::Domain(event)
    }

    fn approved() -> IncomingEvent {
        domain(DomainEvent::TaskApproved(ReviewNotice {
            task_id: Uuid::new_v4(),
            content: "Close deals".to_string(),
            reviewer: "boss".to_string(),
            comment: "ok".to_string(),
            responsible: "alice".to_string(),
        }))
    }

    fn indicator_overdue() -> IncomingEvent {
        domain(DomainEvent::IndicatorOverdue(OverdueNotice {
            id: Uuid::new_v4(),
            title: "Q3 Sales".to_string(),
            end_date: Utc::now(),
            days_overdue: 2,
        }))
    }

    #[test]
    fn test_allow_lists_overlap_but_differ() {
        assert!(TOAST_EVENTS.contains(&EventType::TaskApproved));
        assert!(BELL_EVENTS.contains(&EventType::TaskApproved));
        assert!(TOAST_EVENTS.contains(&EventType::TaskCreated));
        assert!(!BELL_EVENTS.contains(&EventType::TaskCreated));
        assert!(!TOAST_EVENTS.contains(&EventType::IndicatorOverdue));
        assert!(BELL_EVENTS.contains(&EventType::IndicatorOverdue));
        assert!(!TOAST_EVENTS.contains(&EventType::UserUpdated));
        assert!(!BELL_EVENTS.contains(&EventType::UserUpdated));
    }

    #[test]
    fn test_toasts_expire_and_dismiss() {
        let mut feed = ToastFeed::new(Duration::seconds(5));
        let now = Utc::now();
        let first = feed.push(&approved(), now).unwrap();
        feed.push(&approved(), now + Duration::seconds(3)).unwrap();
        assert!(feed.push(&indicator_overdue(), now).is_none());

        assert_eq!(feed.active(now + Duration::seconds(1)).len(), 2);
        assert_eq!(feed.active(now + Duration::seconds(6)).len(), 1);
        assert!(!feed.dismiss(first));
        assert!(feed.active(now + Duration::seconds(9)).is_empty());
    }

    #[test]
    fn test_bell_tracks_unread_and_badges() {
        let mut inbox = BellInbox::new(10);
        let now = Utc::now();
        let a = inbox.push(&approved(), now).unwrap();
        let b = inbox.push(&indicator_overdue(), now).unwrap();
        assert!(inbox
            .push(
                &IncomingEvent::Unknown {
                    event_type: "task_archived".to_string(),
                    payload: serde_json::Value::Null,
                },
                now
            )
            .is_none());
        inbox.push(
            &domain(DomainEvent::TasksPendingApprovalCount(CountNotice {
                user_id: "boss".to_string(),
                count: 4,
            })),
            now,
        );

        assert_eq!(inbox.unread_count(), 2);
        assert_eq!(inbox.items()[0].id, b);
        assert_eq!(inbox.badges().pending_approval, Some(4));
        assert_eq!(inbox.badges().incomplete, None);

        assert!(inbox.mark_read(a));
        assert_eq!(inbox.unread_count(), 1);
        assert!(inbox.dismiss(b));
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(inbox.items().len(), 1);

        inbox.push(&approved(), now);
        inbox.mark_all_read();
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn test_bell_capacity_drops_oldest() {
        let mut inbox = BellInbox::new(2);
        let now = Utc::now();
        let first = inbox.push(&approved(), now).unwrap();
        inbox.push(&approved(), now);
        inbox.push(&approved(), now);
        let items = inbox.items();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.id != first));
    }

    #[test]
    fn test_consumers_survive_a_panicking_listener() {
        let dispatcher = Dispatcher::new(DispatcherConfig::new("http://127.0.0.1:9/api/events"));
        let _bad = dispatcher.subscribe(|event| {
            if event.event_type() == Some(EventType::TaskApproved) {
                panic!("listener bug");
            }
        });
        let feed = Arc::new(Mutex::new(ToastFeed::default()));
        let inbox = Arc::new(Mutex::new(BellInbox::default()));
        let _toasts = ToastFeed::attach(&feed, &dispatcher);
        let _bell = BellInbox::attach(&inbox, &dispatcher);

        dispatcher.dispatch(&approved());

        assert_eq!(feed.lock().unwrap().active(Utc::now()).len(), 1);
        assert_eq!(inbox.lock().unwrap().unread_count(), 1);
    }
}
