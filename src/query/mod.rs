//! Queries over stored records.
//!
//! A [`Query`] is a plain, equatable value: a predicate over record headers,
//! an ordering and a page window. Evaluation resolves one version per chain
//! (the head, or the version in effect at `as_of`), drops tombstones, filters,
//! sorts and finally pages.

mod monitor;

pub use monitor::{MonitorStatus, QueryMonitor};

use crate::entities::Record;
use crate::error::Result;
use crate::records::VersionIndex;
use crate::types::{DateInterval, EntityKind, Timestamp, VersionId};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Field a result list can be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortKey {
    EffectiveDate,
    CreatedDate,
    Title,
    Id,
    /// Outcomes only; other kinds compare equal.
    OccurrenceIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SortDescriptor {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: SortKey) -> Self {
        Self { key, ascending: true }
    }

    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            ascending: false,
        }
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ord = match self.key {
            SortKey::EffectiveDate => a.header().effective_date.cmp(&b.header().effective_date),
            SortKey::CreatedDate => a.header().created_date.cmp(&b.header().created_date),
            SortKey::Title => a.title().cmp(&b.title()),
            SortKey::Id => a.id().cmp(b.id()),
            SortKey::OccurrenceIndex => a.occurrence_index().cmp(&b.occurrence_index()),
        };
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Predicate, ordering and paging for a fetch.
///
/// Empty filter lists match everything. Without explicit sort descriptors
/// results are ordered by creation date, newest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub ids: Vec<String>,
    pub version_ids: Vec<VersionId>,
    pub group_identifiers: Vec<String>,
    /// Matches records carrying any of these tags.
    pub tags: Vec<String>,
    pub remote_ids: Vec<String>,
    /// Owning patient, care plan or task versions.
    pub related_version_ids: Vec<VersionId>,
    /// Resolve each chain to the version in effect at this date.
    pub as_of: Option<Timestamp>,
    /// Resolve each chain to the newest version effective by the interval end.
    pub date_interval: Option<DateInterval>,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version_ids(mut self, version_ids: Vec<VersionId>) -> Self {
        self.version_ids = version_ids;
        self
    }

    pub fn with_group_identifiers(mut self, groups: Vec<String>) -> Self {
        self.group_identifiers = groups;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_remote_ids(mut self, remote_ids: Vec<String>) -> Self {
        self.remote_ids = remote_ids;
        self
    }

    pub fn related_to(mut self, version_ids: Vec<VersionId>) -> Self {
        self.related_version_ids = version_ids;
        self
    }

    pub fn as_of(mut self, date: Timestamp) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn in_interval(mut self, interval: DateInterval) -> Self {
        self.date_interval = Some(interval);
        self
    }

    pub fn sorted_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Date chains are resolved at. `None` means the head.
    fn resolution_date(&self) -> Option<Timestamp> {
        match (self.as_of, self.date_interval) {
            (Some(a), Some(i)) => Some(a.min(i.end)),
            (Some(a), None) => Some(a),
            (None, Some(i)) => Some(i.end),
            (None, None) => None,
        }
    }

    /// Whether a resolved version passes the predicate.
    pub fn matches(&self, record: &Record) -> bool {
        let header = record.header();
        if !self.ids.is_empty() && !self.ids.iter().any(|id| *id == header.id) {
            return false;
        }
        if !self.version_ids.is_empty() && !self.version_ids.contains(&header.version_id) {
            return false;
        }
        if !self.group_identifiers.is_empty() {
            match &header.group_identifier {
                Some(g) if self.group_identifiers.contains(g) => {}
                _ => return false,
            }
        }
        if !self.tags.is_empty() && !header.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if !self.remote_ids.is_empty() {
            match &header.remote_id {
                Some(r) if self.remote_ids.contains(r) => {}
                _ => return false,
            }
        }
        if !self.related_version_ids.is_empty() {
            match record.relationship() {
                Some((_, target)) if self.related_version_ids.contains(&target) => {}
                _ => return false,
            }
        }
        true
    }

    /// Cheap, conservative test for whether a change to `record` could alter
    /// this query's results. False positives are fine; false negatives are not.
    pub fn could_affect(&self, record: &Record) -> bool {
        self.ids.is_empty() || self.ids.iter().any(|id| id == record.id())
    }

    /// Order records by the query's sort descriptors, then by id.
    pub fn sort_records(&self, records: &mut [Record]) {
        let default = [SortDescriptor::descending(SortKey::CreatedDate)];
        let descriptors: &[SortDescriptor] = if self.sort.is_empty() {
            &default
        } else {
            &self.sort
        };

        records.sort_by(|a, b| {
            descriptors
                .iter()
                .map(|d| d.compare(a, b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| a.id().cmp(b.id()))
        });
    }

    /// Run the query against an index.
    pub fn evaluate(&self, index: &VersionIndex, kind: EntityKind) -> Result<Vec<Record>> {
        let at = self.resolution_date();

        let ids: Vec<String> = if self.ids.is_empty() {
            index.ids(kind).map(str::to_string).collect()
        } else {
            self.ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
        };

        let mut out = Vec::new();
        for id in &ids {
            if let Some(record) = index.resolve(kind, id, at)? {
                if !record.header().is_tombstone() && self.matches(record) {
                    out.push(record.clone());
                }
            }
        }

        self.sort_records(&mut out);

        let page = out.into_iter().skip(self.offset);
        Ok(match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }
}
