//! Subscription registry and dispatch.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{
    DropReason, Notification, StoreEvent, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};

/// Default channel capacity for subscribers.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// A callback run on the dispatch context with read access to `C`.
pub type Listener<C> = Arc<dyn Fn(&StoreEvent, &C) + Send + Sync>;

enum Sink<C> {
    Channel(Sender<Notification>),
    Listener(Listener<C>),
}

struct Subscription<C> {
    filter: SubscriptionFilter,
    sink: Sink<C>,
}

/// Manages subscriptions and broadcasts events.
///
/// `C` is the context handed to listeners during dispatch. The store passes
/// its worker state so listeners can read committed data without re-entering
/// the work queue.
pub struct SubscriptionManager<C> {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription<C>>>,
    next_id: AtomicU64,
}

impl<C> SubscriptionManager<C> {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a channel subscriber.
    ///
    /// Only events dispatched after this call are delivered.
    pub fn subscribe(&self, filter: SubscriptionFilter, buffer_size: usize) -> SubscriptionHandle {
        let id = self.next_id();
        let (sender, receiver) = bounded(buffer_size.max(1));

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter,
                sink: Sink::Channel(sender),
            },
        );

        SubscriptionHandle { id, receiver }
    }

    /// Register a callback listener.
    pub fn listen(&self, filter: SubscriptionFilter, listener: Listener<C>) -> SubscriptionId {
        let id = self.next_id();
        self.subscriptions.write().insert(
            id,
            Subscription {
                filter,
                sink: Sink::Listener(listener),
            },
        );
        id
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscriptions.write().remove(&id);
        if let Some(Subscription {
            sink: Sink::Channel(sender),
            ..
        }) = removed
        {
            let _ = sender.try_send(Notification::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Channel subscribers whose buffer is full (or whose receiver is gone)
    /// are dropped. A listener that panics is removed. Neither affects the
    /// remaining subscribers. Returns the subscriptions removed.
    pub fn broadcast(&self, event: &StoreEvent, context: &C) -> Vec<(SubscriptionId, DropReason)> {
        let mut to_remove = Vec::new();
        let mut listeners = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(event) {
                    continue;
                }
                match &sub.sink {
                    Sink::Channel(sender) => {
                        match sender.try_send(Notification::Change(event.clone())) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!(subscription = id.0, "dropping slow subscriber");
                                to_remove.push((*id, DropReason::BufferOverflow));
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                debug!(subscription = id.0, "subscriber went away");
                                to_remove.push((*id, DropReason::Disconnected));
                            }
                        }
                    }
                    Sink::Listener(listener) => listeners.push((*id, Arc::clone(listener))),
                }
            }
        }

        // Listeners run without the registry lock so they may unsubscribe.
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event, context))).is_err() {
                warn!(subscription = id.0, kind = %event.kind, "listener panicked; removing it");
                to_remove.push((id, DropReason::ListenerPanicked));
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in &to_remove {
                if let Some(Subscription {
                    sink: Sink::Channel(sender),
                    ..
                }) = subs.remove(id)
                {
                    let _ = sender.try_send(Notification::Dropped {
                        reason: reason.clone(),
                    });
                }
            }
        }
        to_remove
    }
}

impl<C> Default for SubscriptionManager<C> {
    fn default() -> Self {
        Self::new()
    }
}
