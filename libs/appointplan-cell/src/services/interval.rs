// libs/appointplan-cell/src/services/interval.rs
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A closed range of clinic-local wall-clock time.
///
/// Values are immutable: every operation returns a new interval. An interval
/// whose `end` is not after its `start` is empty; constructors do not reject
/// it, callers filter with [`Interval::is_empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: NaiveDateTime, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Calendar date the interval starts on.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn contains_point(&self, point: NaiveDateTime) -> bool {
        self.start <= point && point <= self.end
    }

    /// Full containment of `other`, endpoints included.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// Strict overlap: intervals that merely touch do not intersect, so two
    /// appointments can run back to back.
    pub fn is_intersecting(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.is_intersecting(other) {
            return None;
        }
        Some(Interval::new(self.start.max(other.start), self.end.min(other.end)))
    }

    /// Portions of `self` before `other.start` and after `other.end`.
    ///
    /// Both sides are `None` when the intervals do not intersect; each side is
    /// present only when it has positive length.
    pub fn difference(&self, other: &Interval) -> (Option<Interval>, Option<Interval>) {
        if !self.is_intersecting(other) {
            return (None, None);
        }
        let left = (self.start < other.start).then(|| Interval::new(self.start, other.start));
        let right = (self.end > other.end).then(|| Interval::new(other.end, self.end));
        (left, right)
    }

    /// Distance between two non-intersecting intervals; zero when they touch.
    pub fn gap(&self, other: &Interval) -> Option<Duration> {
        if self.is_intersecting(other) {
            return None;
        }
        if self.end <= other.start {
            Some(other.start - self.end)
        } else {
            Some(self.start - other.end)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}
