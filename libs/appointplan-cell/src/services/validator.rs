// libs/appointplan-cell/src/services/validator.rs
use std::fmt;

use chrono::Duration;
use shared_config::AppConfig;

use crate::models::PlannedAppointment;

/// Business limits a candidate appointment must respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub min_break: Duration,
    pub max_break: Duration,
    pub max_daily: usize,
    pub max_daily_per_type: usize,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            min_break: Duration::minutes(15),
            max_break: Duration::minutes(45),
            max_daily: 6,
            max_daily_per_type: 2,
        }
    }
}

impl SchedulingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_break: Duration::minutes(config.min_break_minutes),
            max_break: Duration::minutes(config.max_break_minutes),
            max_daily: config.max_daily_appointments,
            max_daily_per_type: config.max_daily_per_type,
        }
    }

    /// Back to back, or a break within the inclusive bounds.
    pub fn allows_break(&self, gap: Duration) -> bool {
        gap.is_zero() || (gap >= self.min_break && gap <= self.max_break)
    }
}

/// Why a candidate was turned down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    SpecialistBusy,
    PatientBusy,
    DailyCap { count: usize },
    TypeCap { count: usize },
    BreakOutOfBounds { gap_minutes: i64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::SpecialistBusy => write!(f, "specialist already booked"),
            Rejection::PatientBusy => write!(f, "patient already booked"),
            Rejection::DailyCap { count } => write!(f, "daily cap reached ({} that day)", count),
            Rejection::TypeCap { count } => {
                write!(f, "per-type daily cap reached ({} of this type that day)", count)
            }
            Rejection::BreakOutOfBounds { gap_minutes } => {
                write!(f, "break of {} min outside allowed bounds", gap_minutes)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator {
    pub policy: SchedulingPolicy,
}

impl ConstraintValidator {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self { policy }
    }

    pub fn check(&self, candidate: &PlannedAppointment, accepted: &[PlannedAppointment]) -> bool {
        self.evaluate(candidate, accepted).is_ok()
    }

    /// Accept `candidate` only if every rule holds against what this run has
    /// accepted so far. Caps count the candidate itself.
    pub fn evaluate(
        &self,
        candidate: &PlannedAppointment,
        accepted: &[PlannedAppointment],
    ) -> Result<(), Rejection> {
        if accepted.iter().any(|other| {
            other.specialist_id == candidate.specialist_id
                && other.interval.is_intersecting(&candidate.interval)
        }) {
            return Err(Rejection::SpecialistBusy);
        }

        let date = candidate.date();
        let same_day: Vec<&PlannedAppointment> = accepted
            .iter()
            .filter(|other| other.patient_id == candidate.patient_id && other.date() == date)
            .collect();

        if same_day.is_empty() {
            return Ok(());
        }

        let same_type = same_day
            .iter()
            .filter(|other| other.type_code == candidate.type_code)
            .count()
            + 1;
        if same_type > self.policy.max_daily_per_type {
            return Err(Rejection::TypeCap { count: same_type });
        }

        let total = same_day.len() + 1;
        if total > self.policy.max_daily {
            return Err(Rejection::DailyCap { count: total });
        }

        if same_day
            .iter()
            .any(|other| other.interval.is_intersecting(&candidate.interval))
        {
            return Err(Rejection::PatientBusy);
        }

        // The candidate borders only the visit right before it and the one right after.
        let before = same_day
            .iter()
            .filter(|other| other.interval.end <= candidate.interval.start)
            .max_by_key(|other| other.interval.start);
        let after = same_day
            .iter()
            .filter(|other| other.interval.start >= candidate.interval.end)
            .min_by_key(|other| other.interval.start);

        for neighbour in before.into_iter().chain(after) {
            if let Some(gap) = neighbour.interval.gap(&candidate.interval) {
                if !self.policy.allows_break(gap) {
                    return Err(Rejection::BreakOutOfBounds {
                        gap_minutes: gap.num_minutes(),
                    });
                }
            }
        }
        Ok(())
    }
}
