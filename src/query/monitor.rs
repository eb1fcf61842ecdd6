//! Live queries.
//!
//! A [`QueryMonitor`] emits a full result snapshot when started and again
//! after every committed change that could affect it, skipping snapshots
//! equal to the last one emitted. Snapshots are computed on the store's
//! worker thread, so they are ordered with commits.

use super::Query;
use crate::entities::Entity;
use crate::error::{Result, StoreError};
use crate::notifications::{StoreEvent, SubscriptionFilter, SubscriptionId};
use crate::store::{Store, StoreState, WeakStore};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lifecycle of a monitor. There is no way back from `Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorStatus {
    Idle,
    Running,
    Stopped,
}

/// Emission side, shared with the bus listener.
///
/// Every send happens under this lock, and `stop` clears `sender` under the
/// same lock, so nothing is emitted once `stop` returns.
struct Gate<T> {
    sender: Option<Sender<Result<Vec<T>>>>,
    last: Option<Vec<T>>,
}

impl<T: Entity> Gate<T> {
    /// Emit a snapshot. Returns false once the stream has ended.
    fn publish(&mut self, result: Result<Vec<T>>) -> bool {
        let Some(sender) = &self.sender else { return false };
        match result {
            Ok(snapshot) => {
                if self.last.as_ref() == Some(&snapshot) {
                    return true;
                }
                self.last = Some(snapshot.clone());
                if sender.send(Ok(snapshot)).is_err() {
                    self.sender = None;
                }
            }
            Err(e) => {
                // First error ends the stream.
                let _ = sender.send(Err(e));
                self.sender = None;
            }
        }
        self.sender.is_some()
    }
}

struct MonitorShared<T> {
    gate: Mutex<Gate<T>>,
    status: Mutex<MonitorStatus>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// A live query over records of kind `T`.
pub struct QueryMonitor<T> {
    store: WeakStore,
    query: Query,
    shared: Arc<MonitorShared<T>>,
    receiver: Receiver<Result<Vec<T>>>,
}

impl<T: Entity> QueryMonitor<T> {
    pub(crate) fn new(store: &Store, query: Query) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            store: store.downgrade(),
            query,
            shared: Arc::new(MonitorShared {
                gate: Mutex::new(Gate {
                    sender: Some(sender),
                    last: None,
                }),
                status: Mutex::new(MonitorStatus::Idle),
                subscription: Mutex::new(None),
            }),
            receiver,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn status(&self) -> MonitorStatus {
        *self.shared.status.lock()
    }

    /// Fetch the initial snapshot and begin following changes.
    ///
    /// The fetch and the bus registration run as one job on the store's
    /// worker, so no commit can slip in between them.
    pub fn start(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock();
            match *status {
                MonitorStatus::Idle => *status = MonitorStatus::Running,
                MonitorStatus::Running => {
                    return Err(StoreError::InvalidOperation("monitor already running".into()))
                }
                MonitorStatus::Stopped => {
                    return Err(StoreError::InvalidOperation(
                        "a stopped monitor cannot be restarted".into(),
                    ))
                }
            }
        }

        let Some(store) = self.store.upgrade() else {
            *self.shared.status.lock() = MonitorStatus::Stopped;
            self.shared.gate.lock().publish(Err(StoreError::StoreClosed));
            return Err(StoreError::StoreClosed);
        };

        let shared = Arc::clone(&self.shared);
        let query = self.query.clone();
        // Fire and forget: the snapshot arrives on the monitor's channel.
        let _ = store.submit(move |state: &mut StoreState| {
            if *shared.status.lock() == MonitorStatus::Stopped {
                return Ok(());
            }

            if !shared.gate.lock().publish(state.fetch_as::<T>(&query)) {
                *shared.status.lock() = MonitorStatus::Stopped;
                return Ok(());
            }

            let listener_shared = Arc::clone(&shared);
            let listener_query = query.clone();
            let id = state.bus().listen(
                SubscriptionFilter::kind(T::KIND),
                Arc::new(move |event: &StoreEvent, state: &StoreState| {
                    if !listener_query.could_affect(&event.record) {
                        return;
                    }
                    let live = {
                        let mut gate = listener_shared.gate.lock();
                        if gate.sender.is_none() {
                            return;
                        }
                        gate.publish(state.fetch_as::<T>(&listener_query))
                    };
                    if !live {
                        *listener_shared.status.lock() = MonitorStatus::Stopped;
                        if let Some(id) = listener_shared.subscription.lock().take() {
                            state.bus().unsubscribe(id);
                        }
                        debug!(kind = %T::KIND, "query monitor ended");
                    }
                }),
            );
            if *shared.status.lock() == MonitorStatus::Stopped {
                state.bus().unsubscribe(id);
                return Ok(());
            }
            *shared.subscription.lock() = Some(id);
            debug!(kind = %T::KIND, "query monitor started");
            Ok(())
        });
        Ok(())
    }

    /// Stop emitting. Nothing is delivered after this returns, including
    /// snapshots computed before the call but not yet received.
    pub fn stop(&self) {
        {
            let mut status = self.shared.status.lock();
            if *status == MonitorStatus::Stopped {
                return;
            }
            *status = MonitorStatus::Stopped;
        }

        self.shared.gate.lock().sender = None;
        while self.receiver.try_recv().is_ok() {}

        if let Some(id) = self.shared.subscription.lock().take() {
            if let Some(store) = self.store.upgrade() {
                store.unsubscribe(id);
            }
        }
        debug!(kind = %T::KIND, "query monitor stopped");
    }

    /// Next snapshot. `None` once the stream has ended.
    pub fn recv(&self) -> Option<Result<Vec<T>>> {
        self.receiver.recv().ok()
    }

    /// Next snapshot, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<Vec<T>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Result<Vec<T>>> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for QueryMonitor<T> {
    fn drop(&mut self) {
        *self.shared.status.lock() = MonitorStatus::Stopped;
        self.shared.gate.lock().sender = None;
        if let Some(id) = self.shared.subscription.lock().take() {
            if let Some(store) = self.store.upgrade() {
                store.unsubscribe(id);
            }
        }
    }
}

impl<T: Entity> Iterator for &QueryMonitor<T> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
