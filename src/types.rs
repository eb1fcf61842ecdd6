//! Core types for the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Schema version stamped on every persisted record.
///
/// Bump this when the on-disk shape of a record changes so that replay can
/// migrate older rows.
pub const SCHEMA_VERSION: u32 = 1;

/// Point in time (UTC).
pub type Timestamp = DateTime<Utc>;

/// Unique identifier for one version of a record.
///
/// Version ids are globally unique across every entity kind.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(pub Uuid);

impl VersionId {
    /// Generate a fresh random version id.
    pub fn new() -> Self {
        VersionId(Uuid::new_v4())
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of record kinds held by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    CarePlan,
    Task,
    Contact,
    Outcome,
    TaskCategory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Patient,
        EntityKind::CarePlan,
        EntityKind::Task,
        EntityKind::Contact,
        EntityKind::Outcome,
        EntityKind::TaskCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patient",
            EntityKind::CarePlan => "care_plan",
            EntityKind::Task => "task",
            EntityKind::Contact => "contact",
            EntityKind::Outcome => "outcome",
            EntityKind::TaskCategory => "task_category",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a committed mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Add,
    Update,
    Delete,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Add, Category::Update, Category::Delete];
}

/// Half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DateInterval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        t >= self.start && t < self.end
    }

    /// True if `[start, end]` of an event overlaps this interval.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        start < self.end && end >= self.start
    }
}

/// Process-unique identifier of a store instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of logical records (distinct `(kind, id)` chains).
    pub chain_count: u64,
    /// Number of stored versions across every chain.
    pub version_count: u64,
    /// Chains whose head is a tombstone.
    pub deleted_count: u64,
    /// Transactions committed since the store was opened or reset.
    pub commit_count: u64,
    /// Size of the transaction log on disk (0 for in-memory stores).
    pub log_size_bytes: u64,
}
