//! Version storage.
//!
//! Committed versions are kept in an in-memory [`VersionIndex`] and, for
//! on-disk stores, appended to a [`TransactionLog`] that is replayed on open.

mod index;
mod log;

pub use index::{ChainKey, VersionIndex};
pub use log::{LogEntry, TransactionLog};
