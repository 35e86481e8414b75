// libs/appointplan-cell/src/services/context.rs
use tracing::{debug, info};

use crate::models::{
    AppointplanError, BookedAppointment, DealInfo, PlanSpec, SpecialistId, SpecialistInfo,
    WorkingDay,
};
use crate::services::fetcher::Fetcher;

/// Everything read from the store for one planning run.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub deal: DealInfo,
    pub specialists: Vec<SpecialistInfo>,
    pub working_days: Vec<WorkingDay>,
    pub appointments: Vec<BookedAppointment>,
}

/// Read the deal, the specialists and their calendars for the plan's horizon.
///
/// The deal and specialist reads run concurrently, then schedules and
/// bookings for the resulting specialists run concurrently.
pub async fn fill_context<F>(fetcher: &F, spec: &PlanSpec) -> Result<PlanningContext, AppointplanError>
where
    F: Fetcher + ?Sized,
{
    let horizon = spec.horizon().ok_or_else(|| {
        AppointplanError::Validation("Request contains no stages to plan".to_string())
    })?;
    let type_codes = spec.type_codes();

    let (deal, specialists) = futures::try_join!(
        fetcher.get_deal_info(spec.deal_id),
        fetcher.get_specialists_by_type(&type_codes),
    )?;

    let mut ids: Vec<SpecialistId> = specialists.iter().map(|s| s.id).collect();
    ids.sort_unstable();
    ids.dedup();
    debug!("Deal {} belongs to patient {}", deal.deal_id, deal.patient_id);

    let (working_days, appointments) = futures::try_join!(
        fetcher.get_schedules(horizon, &ids),
        fetcher.get_appointments(horizon, &ids),
    )?;

    info!(
        "Context filled: {} specialists, {} working days, {} booked appointments in {}",
        ids.len(),
        working_days.len(),
        appointments.len(),
        horizon
    );

    Ok(PlanningContext {
        deal,
        specialists,
        working_days,
        appointments,
    })
}
