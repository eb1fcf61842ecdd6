//! In-memory version index.
//!
//! Versions live in an arena keyed by [`VersionId`]. Chain pointers are plain
//! keys into that arena, never live references. Every walk keeps a visited
//! set so a corrupted (cyclic) chain is reported instead of looping.

use crate::entities::Record;
use crate::error::{Result, StoreError};
use crate::types::{EntityKind, Timestamp, VersionId};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::error;

/// Identifies one logical record: all versions sharing a kind and id.
pub type ChainKey = (EntityKind, String);

/// Index over every stored version.
#[derive(Default)]
pub struct VersionIndex {
    /// Arena: version id -> version.
    versions: HashMap<VersionId, Record>,

    /// Members of each chain, in insertion order.
    chains: BTreeMap<ChainKey, Vec<VersionId>>,

    /// Root (first) version per chain.
    roots: HashMap<ChainKey, VersionId>,

    /// Last known head per chain. Verified by descending next-pointers.
    heads: HashMap<ChainKey, VersionId>,

    /// Outcome slot -> outcome versions answering it.
    outcome_slots: HashMap<(VersionId, usize), BTreeSet<VersionId>>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a version.
    pub fn put(&mut self, record: Record) {
        let header = record.header();
        let key: ChainKey = (record.kind(), header.id.clone());
        let version_id = header.version_id;

        if header.previous_version_id.is_none() {
            self.roots.entry(key.clone()).or_insert(version_id);
        }

        if header.next_version_id.is_none() {
            self.heads.insert(key.clone(), version_id);
        } else if self.heads.get(&key) == Some(&version_id) {
            self.heads.remove(&key);
        }

        if let Record::Outcome(outcome) = &record {
            self.outcome_slots
                .entry((outcome.task_version_id, outcome.occurrence_index))
                .or_default()
                .insert(version_id);
        }

        if !self.versions.contains_key(&version_id) {
            self.chains.entry(key).or_default().push(version_id);
        }
        self.versions.insert(version_id, record);
    }

    /// Get a version by id.
    pub fn get(&self, version_id: &VersionId) -> Option<&Record> {
        self.versions.get(version_id)
    }

    pub fn contains(&self, version_id: &VersionId) -> bool {
        self.versions.contains_key(version_id)
    }

    /// Root version of a chain.
    pub fn root(&self, kind: EntityKind, id: &str) -> Option<VersionId> {
        self.roots.get(&(kind, id.to_string())).copied()
    }

    /// Resolve the head of a chain.
    ///
    /// Starts from the cached head (or the root) and descends next-pointers
    /// only as far as needed.
    pub fn head(&self, kind: EntityKind, id: &str) -> Result<Option<&Record>> {
        let key = (kind, id.to_string());
        let start = match self.heads.get(&key).or_else(|| self.roots.get(&key)) {
            Some(v) => *v,
            None => return Ok(None),
        };

        let mut visited = HashSet::new();
        let mut current = self.fetch(start)?;
        visited.insert(start);
        while let Some(next) = current.header().next_version_id {
            if !visited.insert(next) {
                return Err(cycle(next));
            }
            current = match self.versions.get(&next) {
                Some(record) => record,
                // A successor imported ahead of its data is not yet visible.
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    /// All versions of a chain, root to head.
    pub fn chain(&self, kind: EntityKind, id: &str) -> Result<Vec<&Record>> {
        match self.root(kind, id) {
            Some(root) => self.walk(root),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve the version in effect at `as_of`.
    ///
    /// Picks the version with the latest effective date not after `as_of`,
    /// preferring later versions on ties. Omitted or future dates resolve to
    /// the head.
    pub fn resolve(
        &self,
        kind: EntityKind,
        id: &str,
        as_of: Option<Timestamp>,
    ) -> Result<Option<&Record>> {
        let as_of = match as_of {
            Some(t) if t <= Utc::now() => t,
            _ => return self.head(kind, id),
        };

        let mut best: Option<&Record> = None;
        for record in self.chain(kind, id)? {
            let effective = record.header().effective_date;
            if effective <= as_of && best.map_or(true, |b| effective >= b.header().effective_date) {
                best = Some(record);
            }
        }
        Ok(best)
    }

    /// Ids of every chain of a kind, in id order.
    pub fn ids(&self, kind: EntityKind) -> impl Iterator<Item = &str> + '_ {
        self.chains
            .range((kind, String::new())..)
            .take_while(move |((k, _), _)| *k == kind)
            .map(|((_, id), _)| id.as_str())
    }

    /// Live (non-tombstoned head) outcomes occupying a slot.
    pub fn live_outcomes_in_slot(&self, task_version_id: VersionId, occurrence_index: usize) -> Vec<&Record> {
        self.outcome_slots
            .get(&(task_version_id, occurrence_index))
            .into_iter()
            .flatten()
            .filter_map(|v| self.versions.get(v))
            .filter(|r| r.header().is_head() && !r.header().is_tombstone())
            .collect()
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Chains whose head is a tombstone.
    pub fn deleted_count(&self) -> usize {
        self.heads
            .values()
            .filter_map(|v| self.versions.get(v))
            .filter(|r| r.header().is_tombstone())
            .count()
    }

    /// Verify every chain and every outcome -> task reference.
    pub fn check_integrity(&self) -> Result<()> {
        for ((kind, id), members) in &self.chains {
            let walked = self.chain(*kind, id)?;
            if walked.len() != members.len() {
                return Err(corruption(format!(
                    "{} {} has {} versions but only {} are reachable from its root",
                    kind,
                    id,
                    members.len(),
                    walked.len()
                )));
            }
            let heads = members
                .iter()
                .filter_map(|v| self.versions.get(v))
                .filter(|r| r.header().is_head())
                .count();
            if heads != 1 {
                return Err(corruption(format!("{} {} has {} heads", kind, id, heads)));
            }
        }

        for record in self.versions.values() {
            if let Record::Outcome(outcome) = record {
                if !self.versions.contains_key(&outcome.task_version_id) {
                    error!(
                        outcome = %outcome.header.version_id,
                        task = %outcome.task_version_id,
                        "outcome references a missing task version"
                    );
                    return Err(StoreError::OrphanedOutcome {
                        outcome: outcome.header.version_id,
                        task_version_id: outcome.task_version_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.versions.clear();
        self.chains.clear();
        self.roots.clear();
        self.heads.clear();
        self.outcome_slots.clear();
    }

    fn fetch(&self, version_id: VersionId) -> Result<&Record> {
        self.versions
            .get(&version_id)
            .ok_or_else(|| corruption(format!("missing version {}", version_id)))
    }

    /// Walk next-pointers from `start`, checking back-pointers as we go.
    fn walk(&self, start: VersionId) -> Result<Vec<&Record>> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut previous: Option<VersionId> = None;
        let mut cursor = Some(start);

        while let Some(version_id) = cursor {
            if !visited.insert(version_id) {
                return Err(cycle(version_id));
            }
            let record = self.fetch(version_id)?;
            if let Some(prev) = previous {
                if record.header().previous_version_id != Some(prev) {
                    return Err(corruption(format!(
                        "version {} does not point back at {}",
                        version_id, prev
                    )));
                }
            }
            out.push(record);
            previous = Some(version_id);
            cursor = record.header().next_version_id;
        }

        Ok(out)
    }
}

fn cycle(at: VersionId) -> StoreError {
    error!(version = %at, "cycle detected in version chain");
    StoreError::ChainCycle(at)
}

fn corruption(message: String) -> StoreError {
    error!("{}", message);
    StoreError::Corruption(message)
}
