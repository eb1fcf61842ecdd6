//! Staged, all-or-nothing mutations.
//!
//! A [`Transaction`] validates every change against an overlay of the
//! committed index plus whatever the transaction has already staged. Nothing
//! touches the index until the whole batch has validated; the store then
//! logs the staged writes as one entry, applies them and dispatches events.

use crate::entities::{Outcome, Record};
use crate::error::{Result, StoreError};
use crate::records::{ChainKey, VersionIndex};
use crate::types::{Category, EntityKind, Timestamp, VersionId, SCHEMA_VERSION};
use std::collections::{HashMap, HashSet};

/// Validation switches taken from the store config.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Rules {
    pub allow_missing_relationships: bool,
    pub migration_mode: bool,
}

/// Result of a committed mixed transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionResult {
    pub added: Vec<Record>,
    pub updated: Vec<Record>,
    pub deleted: Vec<Record>,
}

/// Everything a validated transaction writes.
pub(crate) struct Staged {
    /// New versions and re-written predecessors, in apply order.
    pub writes: Vec<Record>,
    /// One entry per affected record.
    pub events: Vec<(Category, Record)>,
}

pub(crate) struct Transaction<'a> {
    index: &'a VersionIndex,
    rules: Rules,
    now: Timestamp,
    staged: HashMap<VersionId, Record>,
    order: Vec<VersionId>,
    heads: HashMap<ChainKey, VersionId>,
    touched: HashSet<ChainKey>,
    events: Vec<(Category, Record)>,
}

impl<'a> Transaction<'a> {
    pub fn new(index: &'a VersionIndex, rules: Rules, now: Timestamp) -> Self {
        Self {
            index,
            rules,
            now,
            staged: HashMap::new(),
            order: Vec::new(),
            heads: HashMap::new(),
            touched: HashSet::new(),
            events: Vec::new(),
        }
    }

    fn get(&self, version_id: &VersionId) -> Option<&Record> {
        self.staged
            .get(version_id)
            .or_else(|| self.index.get(version_id))
    }

    /// Current head of a chain, as seen by this transaction.
    fn head(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        if let Some(v) = self.heads.get(&(kind, id.to_string())) {
            return Ok(self.staged.get(v).cloned());
        }
        Ok(self.index.head(kind, id)?.cloned())
    }

    fn stage(&mut self, record: Record) {
        let version_id = record.version_id();
        if record.header().is_head() {
            self.heads
                .insert((record.kind(), record.id().to_string()), version_id);
        }
        if !self.staged.contains_key(&version_id) {
            self.order.push(version_id);
        }
        self.staged.insert(version_id, record);
    }

    /// Claim a chain for this transaction. A second claim is ambiguous.
    fn claim(&mut self, kind: EntityKind, id: &str) -> Result<()> {
        if !self.touched.insert((kind, id.to_string())) {
            return Err(StoreError::AmbiguousHead {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Link `record` after `head` and stage both.
    fn append_after(&mut self, head: Record, mut record: Record) -> Record {
        let mut head = head;
        let header = record.header_mut();
        header.previous_version_id = Some(head.version_id());
        header.next_version_id = None;

        head.header_mut().next_version_id = Some(record.version_id());
        self.stage(head);
        self.stage(record.clone());
        record
    }

    fn check_relationship(&self, record: &Record) -> Result<()> {
        let Some((target_kind, target)) = record.relationship() else {
            return Ok(());
        };
        let resolved = self.get(&target).map_or(false, |r| r.kind() == target_kind);
        if resolved || self.rules.allow_missing_relationships {
            return Ok(());
        }
        Err(StoreError::DanglingRelationship {
            kind: record.kind(),
            id: record.id().to_string(),
            target_kind,
            target,
        })
    }

    fn check_schedule(&self, record: &Record) -> Result<()> {
        let Record::Task(task) = record else {
            return Ok(());
        };
        task.schedule
            .validate()
            .map_err(|reason| StoreError::InvalidSchedule {
                id: task.header.id.clone(),
                reason,
            })
    }

    /// Outcome slot uniqueness, then occurrence and region checks.
    ///
    /// `replacing` is the head an update supersedes; it does not count as
    /// occupying the slot.
    fn check_outcome(&self, outcome: &Outcome, replacing: Option<VersionId>) -> Result<()> {
        let slot = (outcome.task_version_id, outcome.occurrence_index);
        let exempt = self.rules.migration_mode && outcome.header.next_version_id.is_some();

        if !exempt {
            let committed = self
                .index
                .live_outcomes_in_slot(slot.0, slot.1)
                .into_iter()
                .map(|r| r.version_id());
            let staged = self.staged.values().filter_map(|r| match r {
                Record::Outcome(o) if (o.task_version_id, o.occurrence_index) == slot => {
                    Some(o.header.version_id)
                }
                _ => None,
            });

            let occupied = committed.chain(staged).any(|v| {
                v != outcome.header.version_id
                    && Some(v) != replacing
                    && self
                        .get(&v)
                        .map_or(false, |r| r.header().is_head() && !r.header().is_tombstone())
            });
            if occupied {
                return Err(StoreError::DuplicateOutcome {
                    task_version_id: slot.0,
                    occurrence_index: slot.1,
                });
            }
        }

        let task = match self.get(&outcome.task_version_id) {
            Some(Record::Task(task)) => task,
            _ => return Ok(()),
        };
        let event = task
            .schedule
            .event(outcome.occurrence_index)
            .ok_or(StoreError::InvalidOccurrence {
                task_version_id: outcome.task_version_id,
                occurrence_index: outcome.occurrence_index,
            })?;

        // A newer task version effective at or before the event owns it.
        let mut visited = HashSet::new();
        let mut cursor = task.header.next_version_id;
        while let Some(next) = cursor {
            if !visited.insert(next) {
                return Err(StoreError::ChainCycle(next));
            }
            let Some(newer) = self.get(&next) else { break };
            let effective = newer.header().effective_date;
            if effective >= task.header.effective_date && effective <= event.start {
                return Err(StoreError::OutcomeOvershadowed {
                    task_id: task.header.id.clone(),
                    newer: next,
                });
            }
            cursor = newer.header().next_version_id;
        }
        Ok(())
    }

    /// Insert a new logical record, or revive a deleted one.
    pub fn add(&mut self, mut record: Record) -> Result<Record> {
        let kind = record.kind();
        let id = record.id().to_string();

        if let Record::Outcome(outcome) = &record {
            self.check_outcome(outcome, None)?;
        }
        self.check_schedule(&record)?;

        if !self.rules.migration_mode {
            record.header_mut().version_id = VersionId::new();
        } else if self.get(&record.version_id()).is_some() {
            return Err(StoreError::VersionIdConflict(record.version_id()));
        }

        let superseded = record.header().next_version_id.is_some();
        if self.rules.migration_mode && superseded {
            // Re-inserting a historical version: pointers are kept as given.
            self.check_relationship(&record)?;
            record.header_mut().schema_version = SCHEMA_VERSION;
            self.stage(record.clone());
            self.events.push((Category::Add, record.clone()));
            return Ok(record);
        }

        self.claim(kind, &id)?;
        let head = self.head(kind, &id)?;
        if head.as_ref().map_or(false, |h| !h.header().is_tombstone()) {
            return Err(StoreError::IdConflict { kind, id });
        }
        self.check_relationship(&record)?;

        {
            let header = record.header_mut();
            header.deleted_date = None;
            header.schema_version = SCHEMA_VERSION;
            if !self.rules.migration_mode {
                header.previous_version_id = None;
                header.next_version_id = None;
            }
        }

        let record = match head {
            Some(tombstone) => self.append_after(tombstone, record),
            None => {
                self.stage(record.clone());
                record
            }
        };
        self.events.push((Category::Add, record.clone()));
        Ok(record)
    }

    /// Append a new version to an existing, live chain.
    pub fn update(&mut self, mut record: Record) -> Result<Record> {
        let kind = record.kind();
        let id = record.id().to_string();
        self.claim(kind, &id)?;

        let head = self
            .head(kind, &id)?
            .ok_or_else(|| StoreError::NotFound { kind, id: id.clone() })?;
        if head.header().is_tombstone() {
            return Err(StoreError::Deleted { kind, id });
        }
        self.check_relationship(&record)?;
        self.check_schedule(&record)?;
        if let Record::Outcome(outcome) = &record {
            self.check_outcome(outcome, Some(head.version_id()))?;
        }

        {
            let header = record.header_mut();
            header.version_id = VersionId::new();
            header.updated_date = Some(self.now);
            header.deleted_date = None;
            header.schema_version = SCHEMA_VERSION;
        }

        let record = self.append_after(head, record);
        self.events.push((Category::Update, record.clone()));
        Ok(record)
    }

    /// Retire a chain by appending a tombstone version.
    pub fn delete(&mut self, record: &Record) -> Result<Record> {
        let kind = record.kind();
        let id = record.id().to_string();
        self.claim(kind, &id)?;

        let head = self
            .head(kind, &id)?
            .ok_or_else(|| StoreError::NotFound { kind, id: id.clone() })?;
        if head.header().is_tombstone() {
            return Err(StoreError::Deleted { kind, id });
        }

        let mut tombstone = head.tombstone(self.now);
        {
            let header = tombstone.header_mut();
            header.version_id = VersionId::new();
            header.updated_date = Some(self.now);
            header.schema_version = SCHEMA_VERSION;
        }

        let tombstone = self.append_after(head, tombstone);
        self.events.push((Category::Delete, tombstone.clone()));
        Ok(tombstone)
    }

    /// Update if a live chain exists, otherwise add.
    pub fn upsert(&mut self, record: Record) -> Result<(Category, Record)> {
        let live = self
            .head(record.kind(), record.id())?
            .map_or(false, |h| !h.header().is_tombstone());
        if live {
            Ok((Category::Update, self.update(record)?))
        } else {
            Ok((Category::Add, self.add(record)?))
        }
    }

    pub fn finish(mut self) -> Staged {
        let writes = self
            .order
            .iter()
            .filter_map(|v| self.staged.remove(v))
            .collect();
        Staged {
            writes,
            events: self.events,
        }
    }
}
