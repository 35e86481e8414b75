// libs/appointplan-cell/src/services/calendar.rs
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{BookedAppointment, SpecialistId, SpecialistInfo, WorkingDay};
use crate::services::interval::Interval;

/// A specialist and their free-slot map for one planning run.
#[derive(Debug, Clone)]
pub struct Specialist {
    pub id: SpecialistId,
    pub type_codes: Vec<String>,
    /// Free intervals per date, sorted and disjoint.
    pub working_days: BTreeMap<NaiveDate, Vec<Interval>>,
    pub booked: Vec<BookedAppointment>,
}

impl Specialist {
    pub fn new(info: SpecialistInfo) -> Self {
        Self {
            id: info.id,
            type_codes: info.type_codes,
            working_days: BTreeMap::new(),
            booked: Vec::new(),
        }
    }

    pub fn with_calendar(
        info: SpecialistInfo,
        working_days: &[WorkingDay],
        booked: Vec<BookedAppointment>,
    ) -> Self {
        let mut specialist = Self::new(info);
        specialist.booked = booked;
        specialist.rebuild_map(working_days);
        specialist
    }

    pub fn is_qualified_for(&self, type_code: &str) -> bool {
        self.type_codes.iter().any(|code| code == type_code)
    }

    /// Recompute the free-slot map: published hours minus existing bookings.
    ///
    /// Working days of other specialists are ignored. Bookings on dates
    /// without published hours are inconsistent remote data and are skipped.
    pub fn rebuild_map(&mut self, working_days: &[WorkingDay]) {
        self.working_days.clear();

        for day in working_days.iter().filter(|day| day.specialist_id == self.id) {
            self.working_days
                .entry(day.date)
                .or_default()
                .extend(day.intervals.iter().copied().filter(|iv| !iv.is_empty()));
        }

        for intervals in self.working_days.values_mut() {
            *intervals = normalize(std::mem::take(intervals));
        }

        let bookings: Vec<Interval> = self
            .booked
            .iter()
            .filter(|appointment| appointment.specialist_id == self.id)
            .map(|appointment| appointment.interval)
            .collect();

        for busy in bookings {
            if !self.working_days.contains_key(&busy.date()) {
                warn!(
                    "Specialist {} has a booking at {} outside published working days, skipping",
                    self.id, busy
                );
                continue;
            }
            self.subtract(&busy);
        }
    }

    pub fn free_intervals(&self, date: NaiveDate) -> &[Interval] {
        self.working_days
            .get(&date)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_free_time(&self, date: NaiveDate) -> bool {
        !self.free_intervals(date).is_empty()
    }

    /// Mark `interval` busy so later candidates see it as taken.
    pub fn reserve(&mut self, interval: &Interval) -> bool {
        let hit = self.subtract(interval);
        if !hit {
            debug!("Specialist {} reserved {} outside free time", self.id, interval);
        }
        hit
    }

    /// Replace every free interval `busy` touches with what is left of it.
    fn subtract(&mut self, busy: &Interval) -> bool {
        let Some(intervals) = self.working_days.get_mut(&busy.date()) else {
            return false;
        };

        let mut hit = false;
        let mut remaining = Vec::with_capacity(intervals.len() + 1);
        for free in intervals.drain(..) {
            if free.is_intersecting(busy) {
                hit = true;
                let (left, right) = free.difference(busy);
                remaining.extend(left);
                remaining.extend(right);
            } else {
                remaining.push(free);
            }
        }
        *intervals = remaining;
        hit
    }
}

/// Sort and merge overlapping intervals of one day.
fn normalize(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            if interval.start < last.end {
                last.end = last.end.max(interval.end);
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

/// Arena holding exactly one [`Specialist`] per id for a planning run.
///
/// Departments refer to specialists by index, so a specialist qualified for
/// several appointment types shares one calendar across all of them.
#[derive(Debug, Clone, Default)]
pub struct SpecialistPool {
    specialists: Vec<Specialist>,
    index: HashMap<SpecialistId, usize>,
}

impl SpecialistPool {
    pub fn build(
        infos: Vec<SpecialistInfo>,
        working_days: &[WorkingDay],
        bookings: Vec<BookedAppointment>,
    ) -> Self {
        let mut merged: Vec<SpecialistInfo> = Vec::new();
        let mut positions: HashMap<SpecialistId, usize> = HashMap::new();
        for info in infos {
            match positions.get(&info.id) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    for code in info.type_codes {
                        if !existing.type_codes.contains(&code) {
                            existing.type_codes.push(code);
                        }
                    }
                }
                None => {
                    positions.insert(info.id, merged.len());
                    merged.push(info);
                }
            }
        }

        let mut bookings_by_specialist: HashMap<SpecialistId, Vec<BookedAppointment>> = HashMap::new();
        for booking in bookings {
            bookings_by_specialist
                .entry(booking.specialist_id)
                .or_default()
                .push(booking);
        }

        let specialists: Vec<Specialist> = merged
            .into_iter()
            .map(|info| {
                let booked = bookings_by_specialist.remove(&info.id).unwrap_or_default();
                Specialist::with_calendar(info, working_days, booked)
            })
            .collect();

        if !bookings_by_specialist.is_empty() {
            debug!(
                "Ignoring bookings of {} specialists outside the requested departments",
                bookings_by_specialist.len()
            );
        }

        Self {
            specialists,
            index: positions,
        }
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Specialist> {
        self.specialists.get(position)
    }

    pub fn position(&self, id: SpecialistId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn by_id(&self, id: SpecialistId) -> Option<&Specialist> {
        self.position(id).and_then(|pos| self.specialists.get(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specialist> {
        self.specialists.iter()
    }

    /// Positions of every specialist qualified for `type_code`, in fetch order.
    pub fn qualified_for(&self, type_code: &str) -> Vec<usize> {
        self.specialists
            .iter()
            .enumerate()
            .filter(|(_, specialist)| specialist.is_qualified_for(type_code))
            .map(|(pos, _)| pos)
            .collect()
    }

    pub fn reserve(&mut self, id: SpecialistId, interval: &Interval) -> bool {
        match self.index.get(&id) {
            Some(&pos) => self.specialists[pos].reserve(interval),
            None => false,
        }
    }
}
