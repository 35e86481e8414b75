// libs/appointplan-cell/src/services/planner.rs
use std::collections::HashMap;

use chrono::NaiveTime;
use tracing::{debug, info};

use crate::models::{AppointmentSet, AppointplanError, PatientId, PlannedAppointment, Stage};
use crate::services::calendar::SpecialistPool;
use crate::services::context::PlanningContext;
use crate::services::department::{Department, Slot};
use crate::services::validator::ConstraintValidator;

/// Greedy first-fit planner for one run.
///
/// Owns the specialist arena; every accepted slot is reserved immediately so
/// later candidates see it as busy.
#[derive(Debug)]
pub struct Planner {
    pub patient_id: PatientId,
    pool: SpecialistPool,
    departments: HashMap<String, Department>,
    validator: ConstraintValidator,
    accepted: Vec<PlannedAppointment>,
}

impl Planner {
    pub fn new(patient_id: PatientId, pool: SpecialistPool, validator: ConstraintValidator) -> Self {
        Self {
            patient_id,
            pool,
            departments: HashMap::new(),
            validator,
            accepted: Vec::new(),
        }
    }

    pub fn from_context(context: PlanningContext, validator: ConstraintValidator) -> Self {
        let pool = SpecialistPool::build(
            context.specialists,
            &context.working_days,
            context.appointments,
        );
        Self::new(context.deal.patient_id, pool, validator)
    }

    pub fn pool(&self) -> &SpecialistPool {
        &self.pool
    }

    pub fn accepted(&self) -> &[PlannedAppointment] {
        &self.accepted
    }

    /// Place every requested appointment, stage by stage.
    ///
    /// Any unplaceable unit fails the whole run and nothing is returned.
    pub fn plan(&mut self, stages: &[Stage]) -> Result<Vec<PlannedAppointment>, AppointplanError> {
        let plannable: Vec<&Stage> = stages.iter().filter(|stage| stage.is_plannable()).collect();

        for stage in &plannable {
            for set in &stage.sets {
                self.ensure_department(&set.type_code)?;
            }
        }

        for stage in plannable {
            debug!("Planning stage '{}' ({} - {})", stage.name, stage.start, stage.end);
            for set in &stage.sets {
                for unit in 0..set.quantity {
                    let slot = self.find_slot(stage, set).ok_or_else(|| {
                        info!(
                            "No slot for unit {} of {} in stage '{}'",
                            unit + 1,
                            set.type_code,
                            stage.name
                        );
                        AppointplanError::NoSlot {
                            stage: stage.name.clone(),
                            type_code: set.type_code.clone(),
                            duration_minutes: set.duration_minutes,
                        }
                    })?;
                    self.accept(slot, &set.type_code);
                }
            }
        }

        Ok(std::mem::take(&mut self.accepted))
    }

    fn ensure_department(&mut self, type_code: &str) -> Result<(), AppointplanError> {
        if self.departments.contains_key(type_code) {
            return Ok(());
        }
        let department = Department::from_pool(type_code, &self.pool);
        if department.is_empty() {
            return Err(AppointplanError::NoSpecialists {
                type_code: type_code.to_string(),
            });
        }
        debug!(
            "Department {} has {} specialists",
            type_code,
            department.members.len()
        );
        self.departments.insert(type_code.to_string(), department);
        Ok(())
    }

    fn find_slot(&self, stage: &Stage, set: &AppointmentSet) -> Option<Slot> {
        let department = self.departments.get(&set.type_code)?;

        department
            .get_slots(&self.pool, stage.start, set.duration())
            .take_while(|(date, _)| date.and_time(NaiveTime::MIN) < stage.end)
            .flat_map(|(_, slots)| slots)
            .filter(|slot| slot.interval.end <= stage.end)
            .find(|slot| {
                let candidate = self.candidate(slot, &set.type_code);
                match self.validator.evaluate(&candidate, &self.accepted) {
                    Ok(()) => true,
                    Err(rejection) => {
                        debug!("Rejected {}: {}", candidate, rejection);
                        false
                    }
                }
            })
    }

    fn candidate(&self, slot: &Slot, type_code: &str) -> PlannedAppointment {
        PlannedAppointment {
            specialist_id: slot.specialist_id,
            patient_id: self.patient_id,
            type_code: type_code.to_string(),
            interval: slot.interval,
            remote_id: None,
        }
    }

    fn accept(&mut self, slot: Slot, type_code: &str) {
        let appointment = self.candidate(&slot, type_code);
        debug!("Accepted {}", appointment);
        self.pool.reserve(slot.specialist_id, &slot.interval);
        self.accepted.push(appointment);
    }
}
