// libs/appointplan-cell/src/models.rs
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::services::interval::Interval;

pub type SpecialistId = u64;
pub type PatientId = u64;
pub type DealId = u64;
pub type RemoteId = u64;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Body of `POST /plan`.
///
/// The CRM robot that calls this endpoint sends numbers as strings, leaves
/// fields empty and prefixes user ids, so every numeric field is parsed
/// loosely here and normalized by the request parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    #[serde(alias = "deal_id", deserialize_with = "loose_u64")]
    pub deal_id: DealId,
    #[serde(default, alias = "user_id", deserialize_with = "loose_user_id")]
    pub user_id: Option<u64>,
    #[serde(default, alias = "start_date")]
    pub start_date: Option<String>,
    /// Stage name -> raw stage, in document order.
    #[serde(default)]
    pub stages: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStage {
    #[serde(default, deserialize_with = "loose_i64")]
    pub duration: i64,
    #[serde(default)]
    pub data: Vec<RawAppointmentSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAppointmentSet {
    #[serde(default, rename = "t", deserialize_with = "loose_string")]
    pub type_code: String,
    #[serde(default, rename = "q", deserialize_with = "loose_i64")]
    pub quantity: i64,
    #[serde(default, rename = "d", deserialize_with = "loose_i64")]
    pub duration: i64,
}

fn loose_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_i64(&value).map_err(serde::de::Error::custom)
}

fn loose_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = value_to_i64(&value).map_err(serde::de::Error::custom)?;
    u64::try_from(number).map_err(|_| serde::de::Error::custom(format!("expected a positive id, got {}", number)))
}

fn loose_user_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim().trim_start_matches("user_").to_string(),
        other => other.to_string(),
    };
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("invalid user id '{}'", value)))
}

fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    })
}

/// Numbers may arrive as JSON numbers, numeric strings or `""` (meaning 0).
pub(crate) fn value_to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("expected an integer, got {}", n)),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, got '{}'", s)),
        other => Err(format!("expected an integer, got {}", other)),
    }
}

// ==============================================================================
// PLANNING MODELS
// ==============================================================================

/// One request line: `quantity` appointments of `type_code`, each `duration_minutes` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentSet {
    pub type_code: String,
    pub quantity: u32,
    pub duration_minutes: u32,
}

impl AppointmentSet {
    pub fn new(type_code: impl Into<String>, quantity: u32, duration_minutes: u32) -> Self {
        Self {
            type_code: type_code.into(),
            quantity,
            duration_minutes,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// A contiguous planning window of whole weeks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub start: NaiveDateTime,
    pub duration_weeks: u32,
    pub end: NaiveDateTime,
    pub sets: Vec<AppointmentSet>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        start: NaiveDateTime,
        duration_weeks: u32,
        sets: Vec<AppointmentSet>,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            duration_weeks,
            end: start + Duration::weeks(i64::from(duration_weeks)),
            sets,
        }
    }

    pub fn window(&self) -> Interval {
        Interval::new(self.start, self.end)
    }

    pub fn is_plannable(&self) -> bool {
        self.duration_weeks > 0 && !self.sets.is_empty()
    }
}

/// A fully parsed `POST /plan` request.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub deal_id: DealId,
    pub user_id: Option<u64>,
    pub stages: Vec<Stage>,
}

impl PlanSpec {
    pub fn type_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .stages
            .iter()
            .flat_map(|stage| stage.sets.iter().map(|set| set.type_code.clone()))
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Overall window covered by all stages.
    pub fn horizon(&self) -> Option<Interval> {
        let start = self.stages.first()?.start;
        let end = self.stages.iter().map(|stage| stage.end).max()?;
        Some(Interval::new(start, end))
    }
}

// ==============================================================================
// REMOTE STORE RECORDS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialistInfo {
    pub id: SpecialistId,
    pub type_codes: Vec<String>,
}

/// Published working hours of one specialist on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDay {
    pub specialist_id: SpecialistId,
    pub date: NaiveDate,
    pub intervals: Vec<Interval>,
}

/// An appointment that already exists in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookedAppointment {
    pub id: RemoteId,
    pub specialist_id: SpecialistId,
    pub patient_id: Option<PatientId>,
    pub type_code: Option<String>,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealInfo {
    pub deal_id: DealId,
    pub patient_id: PatientId,
}

// ==============================================================================
// PLANNING RESULTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAppointment {
    pub specialist_id: SpecialistId,
    pub patient_id: PatientId,
    pub type_code: String,
    pub interval: Interval,
    pub remote_id: Option<RemoteId>,
}

impl PlannedAppointment {
    pub fn date(&self) -> NaiveDate {
        self.interval.date()
    }

    pub fn to_view(&self, tz: Tz) -> AppointmentView {
        AppointmentView {
            id: self.remote_id,
            specialist_id: self.specialist_id,
            patient_id: self.patient_id,
            type_code: self.type_code.clone(),
            start: to_rfc3339(tz, self.interval.start),
            end: to_rfc3339(tz, self.interval.end),
        }
    }
}

impl fmt::Display for PlannedAppointment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with specialist {} at {}",
            self.type_code, self.specialist_id, self.interval
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: Option<RemoteId>,
    pub specialist_id: SpecialistId,
    pub patient_id: PatientId,
    pub type_code: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub appointments: Vec<AppointmentView>,
}

/// Render clinic-local wall-clock time with the zone's offset.
///
/// Local times skipped by a DST jump are interpreted as UTC rather than
/// failing the whole response.
pub fn to_rfc3339(tz: Tz, local: NaiveDateTime) -> String {
    tz.from_local_datetime(&local)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
        .to_rfc3339()
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointplanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No specialists available for appointment type {type_code}")]
    NoSpecialists { type_code: String },

    #[error("No free slot for {type_code} ({duration_minutes} min) within stage {stage}")]
    NoSlot {
        stage: String,
        type_code: String,
        duration_minutes: u32,
    },

    #[error("Remote store read failed: {0}")]
    RemoteFetch(String),

    #[error("Commit failed: {reason}")]
    Commit {
        reason: String,
        rolled_back: usize,
        rollback_failed: bool,
    },
}

impl AppointplanError {
    pub fn is_unassignable(&self) -> bool {
        matches!(
            self,
            AppointplanError::NoSpecialists { .. } | AppointplanError::NoSlot { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Remote store request failed: {0}")]
    Transport(String),

    #[error("Malformed remote store reply: {0}")]
    Malformed(String),
}

impl From<StoreError> for AppointplanError {
    fn from(err: StoreError) -> Self {
        AppointplanError::RemoteFetch(err.to_string())
    }
}
