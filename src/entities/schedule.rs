//! Task schedules and the events they produce.

use super::kinds::{Outcome, Task};
use crate::types::{DateInterval, Timestamp};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One repeating (or one-off) component of a schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleElement {
    pub start: Timestamp,
    /// Exclusive end of the repetition. `None` repeats forever.
    pub end: Option<Timestamp>,
    /// Seconds between occurrences. Zero or less means a single occurrence.
    pub interval_seconds: i64,
    /// Length of each occurrence in seconds.
    pub duration_seconds: i64,
    pub text: Option<String>,
}

impl ScheduleElement {
    pub fn once(start: Timestamp) -> Self {
        Self {
            start,
            end: None,
            interval_seconds: 0,
            duration_seconds: 0,
            text: None,
        }
    }

    pub fn repeating(start: Timestamp, end: Option<Timestamp>, interval: Duration) -> Self {
        Self {
            start,
            end,
            interval_seconds: interval.num_seconds(),
            duration_seconds: 0,
            text: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_seconds = duration.num_seconds();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Start of the `k`-th occurrence of this element, or `None` past its
    /// end or past the representable time range.
    fn occurrence_start(&self, k: u64) -> Option<Timestamp> {
        if self.interval_seconds <= 0 {
            return (k == 0).then_some(self.start);
        }
        let offset = (k as i128) * (self.interval_seconds as i128);
        let start = self.start.checked_add_signed(seconds(offset)?)?;
        match self.end {
            Some(end) if start >= end => None,
            _ => Some(start),
        }
    }

    /// End of an occurrence starting at `start`. Saturates at the latest
    /// representable time.
    fn occurrence_end(&self, start: Timestamp) -> Timestamp {
        seconds(self.duration_seconds.max(0) as i128)
            .and_then(|d| start.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of occurrences this element has at all.
    fn occurrence_count(&self) -> i128 {
        if self.interval_seconds <= 0 {
            return 1;
        }
        let limit = self.end.map_or(DateTime::<Utc>::MAX_UTC, |end| end);
        // Starts strictly before `end`, or at most MAX_UTC.
        let inclusive = self.end.is_none();
        self.count_until(limit, inclusive)
    }

    /// Occurrences starting before `at` (or at it, when `inclusive`).
    fn count_until(&self, at: Timestamp, inclusive: bool) -> i128 {
        if self.interval_seconds <= 0 {
            let hit = if inclusive { self.start <= at } else { self.start < at };
            return hit as i128;
        }
        let diff = nanos_between(self.start, at);
        let step = self.interval_seconds as i128 * NANOS_PER_SECOND;
        if diff < 0 || (diff == 0 && !inclusive) {
            return 0;
        }
        if inclusive {
            diff / step + 1
        } else {
            (diff + step - 1) / step
        }
    }

    /// Bounded occurrences starting before `at` (or at it).
    fn bounded_count(&self, at: Timestamp, inclusive: bool) -> i128 {
        self.count_until(at, inclusive).min(self.occurrence_count())
    }

    /// Rejects schedules whose arithmetic cannot be represented.
    pub fn validate(&self) -> Result<(), String> {
        if seconds(self.interval_seconds as i128).is_none() {
            return Err(format!("interval of {} seconds is out of range", self.interval_seconds));
        }
        if seconds(self.duration_seconds as i128).is_none() {
            return Err(format!("duration of {} seconds is out of range", self.duration_seconds));
        }
        Ok(())
    }
}

const NANOS_PER_SECOND: i128 = 1_000_000_000;

fn seconds(secs: i128) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

fn nanos_between(from: Timestamp, to: Timestamp) -> i128 {
    let whole = to.timestamp() as i128 - from.timestamp() as i128;
    let frac = to.timestamp_subsec_nanos() as i128 - from.timestamp_subsec_nanos() as i128;
    whole * NANOS_PER_SECOND + frac
}

/// A composition of schedule elements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub elements: Vec<ScheduleElement>,
}

/// One occurrence produced by a [`Schedule`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleEvent {
    pub occurrence_index: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub element: usize,
}

impl Schedule {
    pub fn new(elements: Vec<ScheduleElement>) -> Self {
        Self { elements }
    }

    pub fn once(start: Timestamp) -> Self {
        Self::new(vec![ScheduleElement::once(start)])
    }

    /// Every day from `start`, until `end` if given.
    pub fn daily(start: Timestamp, end: Option<Timestamp>) -> Self {
        Self::new(vec![ScheduleElement::repeating(start, end, Duration::days(1))])
    }

    pub fn validate(&self) -> Result<(), String> {
        self.elements.iter().try_for_each(ScheduleElement::validate)
    }

    /// The event for an occurrence index, or `None` past the end of the schedule.
    ///
    /// Occurrences are ordered by start, then by element position. The index
    /// is located by binary search over each element's occurrences, so large
    /// indices cost no more than small ones.
    pub fn event(&self, occurrence_index: usize) -> Option<ScheduleEvent> {
        let target = occurrence_index as i128;
        for (e, element) in self.elements.iter().enumerate() {
            // The rank of occurrence k is at least k.
            let (mut lo, mut hi) = (0i128, element.occurrence_count().min(target + 1));
            while lo < hi {
                let k = lo + (hi - lo) / 2;
                let Some(start) = element.occurrence_start(k as u64) else { break };
                let rank = k + self.rank_offset(e, start);
                if rank < target {
                    lo = k + 1;
                } else if rank > target {
                    hi = k;
                } else {
                    return Some(ScheduleEvent {
                        occurrence_index,
                        start,
                        end: element.occurrence_end(start),
                        element: e,
                    });
                }
            }
        }
        None
    }

    /// Occurrences of other elements ordered before one of element `e`
    /// starting at `start`.
    fn rank_offset(&self, e: usize, start: Timestamp) -> i128 {
        self.elements
            .iter()
            .enumerate()
            .filter(|(f, _)| *f != e)
            .map(|(f, other)| other.bounded_count(start, f < e))
            .sum()
    }

    /// Events overlapping `interval`, in start order.
    pub fn events(&self, interval: &DateInterval) -> Vec<ScheduleEvent> {
        // Nothing starting before this can reach into the interval.
        let longest = self
            .elements
            .iter()
            .map(|e| e.duration_seconds.max(0) as i128)
            .max()
            .unwrap_or(0);
        let cutoff = seconds(longest)
            .and_then(|d| interval.start.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.occurrences_from(cutoff)
            .take_while(|event| event.start < interval.end)
            .filter(|event| interval.overlaps(event.start, event.end))
            .collect()
    }

    /// Merges every element's occurrences starting at or after `from`, in
    /// start order. Ties go to the element listed first.
    fn occurrences_from(&self, from: Timestamp) -> Occurrences<'_> {
        let cursors: Vec<i128> = self
            .elements
            .iter()
            .map(|e| e.bounded_count(from, false))
            .collect();
        Occurrences {
            schedule: self,
            index: cursors.iter().sum(),
            cursors,
        }
    }
}

struct Occurrences<'a> {
    schedule: &'a Schedule,
    cursors: Vec<i128>,
    index: i128,
}

impl Iterator for Occurrences<'_> {
    type Item = ScheduleEvent;

    fn next(&mut self) -> Option<ScheduleEvent> {
        let mut best: Option<(usize, Timestamp)> = None;
        for (i, element) in self.schedule.elements.iter().enumerate() {
            let Ok(k) = u64::try_from(self.cursors[i]) else { continue };
            if let Some(start) = element.occurrence_start(k) {
                if best.map_or(true, |(_, b)| start < b) {
                    best = Some((i, start));
                }
            }
        }

        let (element_index, start) = best?;
        self.cursors[element_index] += 1;
        let element = &self.schedule.elements[element_index];
        let event = ScheduleEvent {
            occurrence_index: usize::try_from(self.index).ok()?,
            start,
            end: element.occurrence_end(start),
            element: element_index,
        };
        self.index += 1;
        Some(event)
    }
}

/// A scheduled occurrence of a task paired with its outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub task: Task,
    pub occurrence_index: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub outcome: Option<Outcome>,
}
