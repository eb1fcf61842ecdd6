//! Notification bus types.

use crate::entities::Record;
use crate::store::WeakStore;
use crate::types::{Category, EntityKind};
use std::fmt;

/// A committed change to one record.
#[derive(Clone)]
pub struct StoreEvent {
    pub kind: EntityKind,
    pub category: Category,
    /// The version written by the change (the tombstone for deletes).
    pub record: Record,
    /// The store that committed the change.
    pub origin: WeakStore,
}

impl fmt::Debug for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEvent")
            .field("kind", &self.kind)
            .field("category", &self.category)
            .field("id", &self.record.id())
            .field("version_id", &self.record.version_id())
            .finish()
    }
}

/// Messages delivered to channel subscribers.
#[derive(Clone, Debug)]
pub enum Notification {
    Change(StoreEvent),
    /// The subscription was removed; nothing more will arrive.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The receiving end was dropped.
    Disconnected,
    /// The listener panicked.
    ListenerPanicked,
}

/// Which events a subscriber receives.
///
/// An empty `categories` list means every category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Record kind (None = every kind).
    pub kind: Option<EntityKind>,
    pub categories: Vec<Category>,
    /// Narrow to a single record id.
    pub id: Option<String>,
}

impl SubscriptionFilter {
    /// Every event for every kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every event for one kind.
    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn matches(&self, event: &StoreEvent) -> bool {
        if self.kind.map_or(false, |k| k != event.kind) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&event.category) {
            return false;
        }
        match &self.id {
            Some(id) => id == event.record.id(),
            None => true,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a channel subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive notifications.
    pub receiver: crossbeam_channel::Receiver<Notification>,
}

impl SubscriptionHandle {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<Notification, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<Notification, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Notification, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Every change event currently buffered, without blocking.
    pub fn drain_changes(&self) -> Vec<StoreEvent> {
        self.receiver
            .try_iter()
            .filter_map(|n| match n {
                Notification::Change(event) => Some(event),
                Notification::Dropped { .. } => None,
            })
            .collect()
    }
}
