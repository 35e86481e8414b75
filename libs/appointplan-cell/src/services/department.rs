// libs/appointplan-cell/src/services/department.rs
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::models::SpecialistId;
use crate::services::calendar::SpecialistPool;
use crate::services::interval::Interval;

/// A candidate appointment time with the specialist who would take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub specialist_id: SpecialistId,
    pub interval: Interval,
}

/// Specialists qualified for one appointment type, by pool position.
#[derive(Debug, Clone)]
pub struct Department {
    pub type_code: String,
    pub members: Vec<usize>,
}

impl Department {
    pub fn new(type_code: impl Into<String>, members: Vec<usize>) -> Self {
        Self {
            type_code: type_code.into(),
            members,
        }
    }

    pub fn from_pool(type_code: &str, pool: &SpecialistPool) -> Self {
        Self::new(type_code, pool.qualified_for(type_code))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Candidate slots of `duration`, grouped by date in ascending order from
    /// `start`'s date on.
    ///
    /// Within one date, candidates come specialist by specialist and interval
    /// by interval, each interval cut into consecutive slots beginning at
    /// `max(start, interval.start)`. Dates without a fitting slot are not
    /// emitted. The sequence ends after the last published working date.
    pub fn get_slots<'a>(
        &'a self,
        pool: &'a SpecialistPool,
        start: NaiveDateTime,
        duration: Duration,
    ) -> DaySlots<'a> {
        let mut dates: Vec<NaiveDate> = self
            .members
            .iter()
            .filter_map(|&pos| pool.get(pos))
            .flat_map(|specialist| specialist.working_days.range(start.date()..))
            .filter(|(_, intervals)| !intervals.is_empty())
            .map(|(date, _)| *date)
            .collect();
        dates.sort();
        dates.dedup();

        if duration <= Duration::zero() {
            dates.clear();
        }

        DaySlots {
            department: self,
            pool,
            start,
            duration,
            dates: dates.into_iter(),
        }
    }
}

/// Lazy day-by-day slot sequence produced by [`Department::get_slots`].
pub struct DaySlots<'a> {
    department: &'a Department,
    pool: &'a SpecialistPool,
    start: NaiveDateTime,
    duration: Duration,
    dates: std::vec::IntoIter<NaiveDate>,
}

impl DaySlots<'_> {
    fn slots_on(&self, date: NaiveDate) -> Vec<Slot> {
        let mut slots = Vec::new();
        for specialist in self.department.members.iter().filter_map(|&pos| self.pool.get(pos)) {
            for free in specialist.free_intervals(date) {
                let mut cursor = free.start.max(self.start);
                while cursor + self.duration <= free.end {
                    slots.push(Slot {
                        specialist_id: specialist.id,
                        interval: Interval::starting_at(cursor, self.duration),
                    });
                    cursor += self.duration;
                }
            }
        }
        slots
    }
}

impl Iterator for DaySlots<'_> {
    type Item = (NaiveDate, Vec<Slot>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(date) = self.dates.next() {
            let slots = self.slots_on(date);
            if !slots.is_empty() {
                return Some((date, slots));
            }
        }
        None
    }
}
