//! Change notification bus.
//!
//! Every committed mutation is republished as one [`StoreEvent`] per
//! affected record, tagged with the record kind and an add/update/delete
//! [`Category`](crate::types::Category). Dispatch happens on the store's
//! worker thread, after the commit and before the mutating call completes,
//! so subscribers see events in commit order.
//!
//! There is no backlog: a subscriber only sees events committed after it
//! registered. Fetch current state first, then subscribe.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionFilter::kind(EntityKind::Task));
//! store.add(vec![task]).wait()?;
//!
//! match handle.recv() {
//!     Ok(Notification::Change(event)) => println!("{:?} {}", event.category, event.record.id()),
//!     Ok(Notification::Dropped { reason }) => println!("dropped: {:?}", reason),
//!     Err(_) => {}
//! }
//! ```

mod manager;
mod types;

pub use manager::{Listener, SubscriptionManager, DEFAULT_BUFFER_SIZE};
pub use types::{
    DropReason, Notification, StoreEvent, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
