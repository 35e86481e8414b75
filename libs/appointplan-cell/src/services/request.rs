// libs/appointplan-cell/src/services/request.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::models::{
    AppointmentSet, AppointplanError, PlanRequest, PlanSpec, RawAppointmentSet, RawStage, Stage,
};

/// Turn the loosely typed request body into ordered, well-formed stages.
///
/// `now` anchors the default start date (tomorrow, local midnight).
pub fn parse_plan_request(
    request: &PlanRequest,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<PlanSpec, AppointplanError> {
    let mut cursor = resolve_start(request.start_date.as_deref(), tz, now);
    let mut stages = Vec::new();

    for (name, raw) in &request.stages {
        let raw: RawStage = serde_json::from_value(raw.clone()).map_err(|e| {
            AppointplanError::Validation(format!("Stage '{}' is malformed: {}", name, e))
        })?;

        if raw.duration < 0 {
            return Err(AppointplanError::Validation(format!(
                "Stage '{}' has a negative duration",
                name
            )));
        }

        let sets = parse_sets(name, &raw.data)?;
        let weeks = u32::try_from(raw.duration).map_err(|_| {
            AppointplanError::Validation(format!("Stage '{}' duration is too large", name))
        })?;

        match (weeks > 0, sets.is_empty()) {
            (false, true) => {
                debug!("Skipping empty stage '{}'", name);
                continue;
            }
            (true, true) => {
                return Err(AppointplanError::Validation(format!(
                    "Stage '{}' has a duration but no appointments",
                    name
                )));
            }
            (false, false) => {
                return Err(AppointplanError::Validation(format!(
                    "Stage '{}' has appointments but no duration",
                    name
                )));
            }
            (true, false) => {}
        }

        let stage = Stage::new(name.clone(), cursor, weeks, sets);
        cursor = stage.end;
        stages.push(stage);
    }

    if stages.is_empty() {
        return Err(AppointplanError::Validation(
            "Request contains no stages to plan".to_string(),
        ));
    }

    Ok(PlanSpec {
        deal_id: request.deal_id,
        user_id: request.user_id,
        stages,
    })
}

fn parse_sets(stage: &str, raw: &[RawAppointmentSet]) -> Result<Vec<AppointmentSet>, AppointplanError> {
    let mut sets = Vec::with_capacity(raw.len());
    for set in raw {
        if set.quantity < 0 || set.duration < 0 {
            return Err(AppointplanError::Validation(format!(
                "Stage '{}' has a negative quantity or duration for '{}'",
                stage, set.type_code
            )));
        }
        if set.type_code.is_empty() || set.quantity == 0 || set.duration == 0 {
            debug!("Dropping incomplete set {:?} in stage '{}'", set, stage);
            continue;
        }
        let quantity = u32::try_from(set.quantity).map_err(|_| {
            AppointplanError::Validation(format!("Quantity for '{}' is too large", set.type_code))
        })?;
        let duration = u32::try_from(set.duration).map_err(|_| {
            AppointplanError::Validation(format!("Duration for '{}' is too large", set.type_code))
        })?;
        sets.push(AppointmentSet::new(set.type_code.clone(), quantity, duration));
    }
    Ok(sets)
}

/// Requested start date truncated to local midnight, or tomorrow when absent
/// or unreadable.
pub fn resolve_start(raw: Option<&str>, tz: Tz, now: DateTime<Utc>) -> NaiveDateTime {
    let parsed = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| {
            let date = parse_start_date(raw, tz);
            if date.is_none() {
                warn!("Unreadable start date '{}', planning from tomorrow", raw);
            }
            date
        });

    let date = parsed.unwrap_or_else(|| (now.with_timezone(&tz) + Duration::days(1)).date_naive());
    date.and_time(NaiveTime::MIN)
}

fn parse_start_date(raw: &str, tz: Tz) -> Option<NaiveDate> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&tz).date_naive());
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(local.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%d.%m.%Y").ok())
}
