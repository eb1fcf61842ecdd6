//! Record kinds held by the store.
//!
//! Every kind shares a [`VersionHeader`] carrying the version-chain pointers.
//! The store itself works on the closed [`Record`] enum; typed access goes
//! through the [`Entity`] trait implemented by each concrete kind.

mod kinds;
mod schedule;

pub use kinds::{
    BiologicalSex, CarePlan, Contact, ContactCategory, LabeledValue, Outcome, OutcomeValue,
    Patient, PersonName, PostalAddress, Task, TaskCategory, ValueKind,
};
pub use schedule::{Event, Schedule, ScheduleElement, ScheduleEvent};

use crate::error::{Result, StoreError};
use crate::types::{EntityKind, Timestamp, VersionId, SCHEMA_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields shared by every version of every record kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionHeader {
    /// User-defined identifier shared by all versions of one logical record.
    pub id: String,

    /// Unique to this version; generated on creation.
    pub version_id: VersionId,

    /// The version this one supersedes.
    pub previous_version_id: Option<VersionId>,

    /// The version superseding this one. `None` on the head.
    pub next_version_id: Option<VersionId>,

    /// When this version takes effect.
    pub effective_date: Timestamp,

    /// Set on tombstone versions.
    pub deleted_date: Option<Timestamp>,

    pub created_date: Timestamp,
    pub updated_date: Option<Timestamp>,

    pub group_identifier: Option<String>,
    pub tags: Vec<String>,
    pub remote_id: Option<String>,
    pub source: Option<String>,
    pub user_info: BTreeMap<String, String>,

    /// Schema version the row was written with.
    pub schema_version: u32,
}

impl VersionHeader {
    /// Header for a brand new root version, effective now.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            version_id: VersionId::new(),
            previous_version_id: None,
            next_version_id: None,
            effective_date: now,
            deleted_date: None,
            created_date: now,
            updated_date: None,
            group_identifier: None,
            tags: Vec::new(),
            remote_id: None,
            source: None,
            user_info: BTreeMap::new(),
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn is_head(&self) -> bool {
        self.next_version_id.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.previous_version_id.is_none()
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted_date.is_some()
    }
}

/// Typed access to one record kind.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;

    fn header(&self) -> &VersionHeader;
    fn header_mut(&mut self) -> &mut VersionHeader;

    fn into_record(self) -> Record;

    /// Fails with `KindMismatch` if the record is of another kind.
    fn from_record(record: Record) -> Result<Self>;

    fn id(&self) -> &str {
        &self.header().id
    }

    fn version_id(&self) -> VersionId {
        self.header().version_id
    }

    /// Set the effective date (builder style).
    fn effective(mut self, date: Timestamp) -> Self {
        self.header_mut().effective_date = date;
        self
    }

    fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.header_mut().tags = tags;
        self
    }

    fn with_group_identifier(mut self, group: impl Into<String>) -> Self {
        self.header_mut().group_identifier = Some(group.into());
        self
    }

    fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.header_mut().remote_id = Some(remote_id.into());
        self
    }
}

/// A version of any record kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Patient(Patient),
    CarePlan(CarePlan),
    Task(Task),
    Contact(Contact),
    Outcome(Outcome),
    TaskCategory(TaskCategory),
}

macro_rules! impl_entity {
    ($ty:ident, $kind:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn header(&self) -> &VersionHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut VersionHeader {
                &mut self.header
            }

            fn into_record(self) -> Record {
                Record::$kind(self)
            }

            fn from_record(record: Record) -> Result<Self> {
                match record {
                    Record::$kind(value) => Ok(value),
                    other => Err(StoreError::KindMismatch {
                        expected: EntityKind::$kind,
                        got: other.kind(),
                    }),
                }
            }
        }

        impl From<$ty> for Record {
            fn from(value: $ty) -> Self {
                Record::$kind(value)
            }
        }
    };
}

impl_entity!(Patient, Patient);
impl_entity!(CarePlan, CarePlan);
impl_entity!(Task, Task);
impl_entity!(Contact, Contact);
impl_entity!(Outcome, Outcome);
impl_entity!(TaskCategory, TaskCategory);

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Patient(_) => EntityKind::Patient,
            Record::CarePlan(_) => EntityKind::CarePlan,
            Record::Task(_) => EntityKind::Task,
            Record::Contact(_) => EntityKind::Contact,
            Record::Outcome(_) => EntityKind::Outcome,
            Record::TaskCategory(_) => EntityKind::TaskCategory,
        }
    }

    pub fn header(&self) -> &VersionHeader {
        match self {
            Record::Patient(v) => &v.header,
            Record::CarePlan(v) => &v.header,
            Record::Task(v) => &v.header,
            Record::Contact(v) => &v.header,
            Record::Outcome(v) => &v.header,
            Record::TaskCategory(v) => &v.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut VersionHeader {
        match self {
            Record::Patient(v) => &mut v.header,
            Record::CarePlan(v) => &mut v.header,
            Record::Task(v) => &mut v.header,
            Record::Contact(v) => &mut v.header,
            Record::Outcome(v) => &mut v.header,
            Record::TaskCategory(v) => &mut v.header,
        }
    }

    pub fn id(&self) -> &str {
        &self.header().id
    }

    pub fn version_id(&self) -> VersionId {
        self.header().version_id
    }

    /// Human-readable title used for sorting.
    pub fn title(&self) -> Option<&str> {
        match self {
            Record::Patient(p) => Some(p.name.family_or_given()),
            Record::CarePlan(c) => Some(c.title.as_str()),
            Record::Task(t) => t.title.as_deref(),
            Record::Contact(c) => c.title.as_deref().or(Some(c.name.family_or_given())),
            Record::Outcome(_) => None,
            Record::TaskCategory(c) => Some(c.title.as_str()),
        }
    }

    /// The owning record this version points at, if any.
    ///
    /// Outcomes always point at a task version; other kinds point at an
    /// optional owner.
    pub fn relationship(&self) -> Option<(EntityKind, VersionId)> {
        match self {
            Record::Patient(_) => None,
            Record::CarePlan(c) => c.patient_version_id.map(|v| (EntityKind::Patient, v)),
            Record::Task(t) => t.care_plan_version_id.map(|v| (EntityKind::CarePlan, v)),
            Record::Contact(c) => c.care_plan_version_id.map(|v| (EntityKind::CarePlan, v)),
            Record::Outcome(o) => Some((EntityKind::Task, o.task_version_id)),
            Record::TaskCategory(c) => c.care_plan_version_id.map(|v| (EntityKind::CarePlan, v)),
        }
    }

    /// Occurrence index for outcomes.
    pub fn occurrence_index(&self) -> Option<usize> {
        match self {
            Record::Outcome(o) => Some(o.occurrence_index),
            _ => None,
        }
    }

    /// A tombstone copy of this version, deleted at `at`.
    pub(crate) fn tombstone(&self, at: Timestamp) -> Record {
        let mut tomb = self.clone();
        let header = tomb.header_mut();
        header.deleted_date = Some(at);
        header.effective_date = at;
        tomb
    }
}
