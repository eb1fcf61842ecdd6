//! # Care Store
//!
//! A versioned local record store for clinical records, with live queries
//! that re-evaluate as the data changes.
//!
//! ## Core Concepts
//!
//! - **Versions**: Records are never edited in place. Each update appends a
//!   version to the record's chain; deletes append a tombstone
//! - **Transactions**: Every call validates and commits all-or-nothing, then
//!   publishes one event per affected record
//! - **Notification bus**: Typed add/update/delete events per record kind
//! - **Query monitors**: Snapshots re-fetched after every relevant change
//! - **Fetch-request controllers**: Query + store bindings that restream
//!   only when either actually changes
//!
//! ## Example
//!
//! ```ignore
//! use carestore::{Query, Schedule, SortDescriptor, SortKey, Store, StoreConfig, Task};
//!
//! let store = Store::open(StoreConfig::on_disk("clinic", "./clinic-store"))?;
//!
//! let monitor = store.monitor::<Task>(
//!     Query::new().sorted_by(SortDescriptor::ascending(SortKey::Title)),
//! );
//! monitor.start()?;
//! assert!(monitor.recv().unwrap()?.is_empty());
//!
//! let walk = Task::new("walk", Some("Walk".into()), Schedule::daily(start, None));
//! store.add(vec![walk]).wait()?;
//! assert_eq!(monitor.recv().unwrap()?.len(), 1);
//! ```

pub mod controller;
pub mod entities;
pub mod error;
pub mod notifications;
pub mod query;
pub mod records;
pub mod store;
mod transaction;
pub mod types;

// Re-exports
pub use controller::{
    FetchRequestController, FetchedResult, FetchedResults, QueryResults, RecordController,
    StreamStatus,
};
pub use entities::{
    BiologicalSex, CarePlan, Contact, ContactCategory, Entity, Event, LabeledValue, Outcome,
    OutcomeValue, Patient, PersonName, PostalAddress, Record, Schedule, ScheduleElement,
    ScheduleEvent, Task, TaskCategory, ValueKind, VersionHeader,
};
pub use error::{ErrorCategory, Result, StoreError};
pub use notifications::{
    DropReason, Notification, StoreEvent, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
pub use query::{MonitorStatus, Query, QueryMonitor, SortDescriptor, SortKey};
pub use store::{Completion, Store, StoreConfig, WeakStore};
pub use transaction::TransactionResult;
pub use types::*;
