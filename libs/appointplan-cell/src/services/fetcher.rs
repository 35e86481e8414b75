// libs/appointplan-cell/src/services/fetcher.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{
    to_rfc3339, AppointplanError, BookedAppointment, DealId, DealInfo, SpecialistId,
    SpecialistInfo, StoreError, WorkingDay,
};
use crate::services::batch::{execute_batch, fetch_lists, BatchCommand, BatchTransport};
use crate::services::interval::Interval;
use crate::services::mappings::{id_of, StoreMappings};

/// Reads the planner needs from the remote store.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get_specialists_by_type(
        &self,
        type_codes: &[String],
    ) -> Result<Vec<SpecialistInfo>, AppointplanError>;

    async fn get_schedules(
        &self,
        window: Interval,
        specialist_ids: &[SpecialistId],
    ) -> Result<Vec<WorkingDay>, AppointplanError>;

    async fn get_appointments(
        &self,
        window: Interval,
        specialist_ids: &[SpecialistId],
    ) -> Result<Vec<BookedAppointment>, AppointplanError>;

    async fn get_deal_info(&self, deal_id: DealId) -> Result<DealInfo, AppointplanError>;
}

/// [`Fetcher`] over the store's batch endpoint.
#[derive(Clone)]
pub struct BitrixFetcher {
    transport: Arc<dyn BatchTransport>,
    config: Arc<AppConfig>,
    mappings: Arc<StoreMappings>,
}

impl BitrixFetcher {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        config: Arc<AppConfig>,
        mappings: Arc<StoreMappings>,
    ) -> Self {
        Self {
            transport,
            config,
            mappings,
        }
    }

    async fn list(&self, name: &str, command: BatchCommand) -> Result<Vec<Value>, StoreError> {
        let mut lists = fetch_lists(
            self.transport.as_ref(),
            vec![(name.to_string(), command)],
            self.config.batch_limit,
        )
        .await?;

        Ok(match lists.remove(name) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }

    fn parse_specialist(&self, item: &Value, wanted: &[String]) -> Option<SpecialistInfo> {
        let id = item.get("ID").and_then(id_of)?;
        let departments: Vec<u64> = match item.get("UF_DEPARTMENT") {
            Some(Value::Array(ids)) => ids.iter().filter_map(id_of).collect(),
            Some(single) => id_of(single).into_iter().collect(),
            None => Vec::new(),
        };

        let type_codes: Vec<String> = departments
            .into_iter()
            .filter_map(|department| self.mappings.code_for_department(department))
            .filter(|code| wanted.iter().any(|w| w == code))
            .map(str::to_string)
            .collect();

        if type_codes.is_empty() {
            debug!("User {} is not in any requested department", id);
            return None;
        }
        Some(SpecialistInfo { id, type_codes })
    }

    fn parse_schedule(&self, item: &Value) -> Option<WorkingDay> {
        let fields = &self.config.fields;
        let tz = self.config.timezone;

        let specialist_id = item.get(&fields.schedule_specialist).and_then(id_of)?;
        let Some(date) = item
            .get(&fields.schedule_date)
            .and_then(Value::as_str)
            .and_then(|raw| parse_date(tz, raw))
        else {
            warn!("Schedule of specialist {} has no date, skipping", specialist_id);
            return None;
        };

        let raw_intervals = match item.get(&fields.schedule_intervals) {
            Some(Value::Array(raw)) => raw,
            _ => {
                warn!("Schedule of specialist {} on {} has no intervals, skipping", specialist_id, date);
                return None;
            }
        };

        let mut intervals = Vec::with_capacity(raw_intervals.len());
        for raw in raw_intervals.iter().filter_map(Value::as_str) {
            match parse_js_interval(tz, raw) {
                Some(interval) if !interval.is_empty() => intervals.push(interval),
                _ => warn!("Specialist {} has a malformed interval '{}' on {}", specialist_id, raw, date),
            }
        }

        if intervals.is_empty() {
            warn!("Schedule of specialist {} on {} has no usable intervals, skipping", specialist_id, date);
            return None;
        }
        intervals.sort();

        Some(WorkingDay {
            specialist_id,
            date,
            intervals,
        })
    }

    fn parse_appointment(&self, item: &Value) -> Option<BookedAppointment> {
        let fields = &self.config.fields;
        let tz = self.config.timezone;

        let id = item.get("id").and_then(id_of)?;
        let specialist_id = item.get(&fields.appointment_specialist).and_then(id_of)?;

        let start = item
            .get(&fields.appointment_start)
            .and_then(Value::as_str)
            .and_then(|raw| parse_datetime(tz, raw));
        let end = item
            .get(&fields.appointment_end)
            .and_then(Value::as_str)
            .and_then(|raw| parse_datetime(tz, raw));
        let (Some(start), Some(end)) = (start, end) else {
            warn!("Appointment {} has no valid start or end, skipping", id);
            return None;
        };

        let patient_id = match item.get(&fields.appointment_patient) {
            Some(Value::Array(values)) => values.first().and_then(id_of),
            Some(value) => id_of(value),
            None => None,
        };

        let type_code = match item.get(&fields.appointment_code) {
            Some(Value::Array(values)) => values.first(),
            Some(value) => Some(value),
            None => None,
        }
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .and_then(|code_id| self.mappings.code_for_id(&code_id).map(str::to_string));

        Some(BookedAppointment {
            id,
            specialist_id,
            patient_id: patient_id.filter(|id| *id > 0),
            type_code,
            interval: Interval::new(start, end),
        })
    }
}

#[async_trait]
impl Fetcher for BitrixFetcher {
    async fn get_specialists_by_type(
        &self,
        type_codes: &[String],
    ) -> Result<Vec<SpecialistInfo>, AppointplanError> {
        let mut commands = Vec::new();
        for code in type_codes {
            match self.mappings.department_for(code) {
                Some(department) => commands.push((
                    format!("department_{}", department),
                    BatchCommand::new("user.get")
                        .param("UF_DEPARTMENT", department)
                        .param("ACTIVE", true),
                )),
                None => warn!("No department mapped to code '{}'", code),
            }
        }

        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let lists = fetch_lists(self.transport.as_ref(), commands, self.config.batch_limit).await?;

        let specialists: Vec<SpecialistInfo> = lists
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|item| self.parse_specialist(item, type_codes))
            .collect();

        debug!("Fetched {} specialist records", specialists.len());
        Ok(specialists)
    }

    async fn get_schedules(
        &self,
        window: Interval,
        specialist_ids: &[SpecialistId],
    ) -> Result<Vec<WorkingDay>, AppointplanError> {
        if specialist_ids.is_empty() {
            return Ok(Vec::new());
        }
        let fields = &self.config.fields;

        let command = BatchCommand::new("crm.item.list")
            .param("entityTypeId", self.config.schedule_entity_type_id)
            .param(
                "filter",
                json!({
                    (format!(">={}", fields.schedule_date)): window.start.date().to_string(),
                    (format!("<{}", fields.schedule_date)): window.end.date().to_string(),
                    (format!("@{}", fields.schedule_specialist)): specialist_ids,
                }),
            );

        let items = self.list("schedules", command).await?;
        let days: Vec<WorkingDay> = items.iter().filter_map(|item| self.parse_schedule(item)).collect();
        debug!("Fetched {} working days from {} records", days.len(), items.len());
        Ok(days)
    }

    async fn get_appointments(
        &self,
        window: Interval,
        specialist_ids: &[SpecialistId],
    ) -> Result<Vec<BookedAppointment>, AppointplanError> {
        if specialist_ids.is_empty() {
            return Ok(Vec::new());
        }
        let fields = &self.config.fields;
        let tz = self.config.timezone;

        let command = BatchCommand::new("crm.item.list")
            .param("entityTypeId", self.config.appointment_entity_type_id)
            .param(
                "filter",
                json!({
                    (format!(">={}", fields.appointment_start)): to_rfc3339(tz, window.start),
                    (format!("<{}", fields.appointment_start)): to_rfc3339(tz, window.end),
                    (format!("@{}", fields.appointment_specialist)): specialist_ids,
                }),
            );

        let items = self.list("appointments", command).await?;
        let booked: Vec<BookedAppointment> = items
            .iter()
            .filter_map(|item| self.parse_appointment(item))
            .collect();
        debug!("Fetched {} booked appointments", booked.len());
        Ok(booked)
    }

    async fn get_deal_info(&self, deal_id: DealId) -> Result<DealInfo, AppointplanError> {
        let command = BatchCommand::new("crm.deal.get").param("id", deal_id);
        let reply = execute_batch(
            self.transport.as_ref(),
            &[("deal".to_string(), command)],
            self.config.batch_limit,
            false,
        )
        .await
        .map_err(|e| e.source)?;

        if let Some(error) = reply.result_error.get("deal") {
            return Err(AppointplanError::Validation(format!(
                "Deal {} could not be read: {}",
                deal_id, error
            )));
        }

        let deal: &Map<String, Value> = reply
            .result
            .get("deal")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::Malformed(format!("crm.deal.get returned no deal {}", deal_id)))?;

        let patient_id = deal
            .get("CONTACT_ID")
            .and_then(id_of)
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                AppointplanError::Validation(format!("Deal {} has no patient contact", deal_id))
            })?;

        Ok(DealInfo { deal_id, patient_id })
    }
}

/// Schedule dates arrive either as plain dates or as midnight timestamps.
fn parse_date(tz: Tz, raw: &str) -> Option<NaiveDate> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&tz).date_naive());
    }
    raw.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

fn parse_datetime(tz: Tz, raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|stamp| stamp.with_timezone(&tz).naive_local())
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
}

/// Parse `"<startMs>:<endMs>"`. Only the last 13 digits of the start and the
/// first 13 of the end carry the epoch milliseconds.
pub fn parse_js_interval(tz: Tz, raw: &str) -> Option<Interval> {
    let (start, end) = raw.split_once(':')?;
    let start = start.trim();
    let end = end.trim();
    let start = start.get(start.len().saturating_sub(13)..)?;
    let end = end.get(..end.len().min(13))?;

    let start = local_from_millis(tz, start.parse().ok()?)?;
    let end = local_from_millis(tz, end.parse().ok()?)?;
    Some(Interval::new(start, end))
}

fn local_from_millis(tz: Tz, millis: i64) -> Option<NaiveDateTime> {
    tz.timestamp_millis_opt(millis)
        .single()
        .map(|stamp| stamp.naive_local())
}
