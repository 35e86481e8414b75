// libs/appointplan-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use appointplan_cell::models::{
    AppointplanError, BookedAppointment, DealId, DealInfo, SpecialistId, SpecialistInfo,
    StoreError, WorkingDay,
};
use appointplan_cell::services::batch::{BatchCommand, BatchReply, BatchTransport};
use appointplan_cell::services::fetcher::Fetcher;
use appointplan_cell::services::interval::Interval;
use shared_utils::test_utils::local;

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
struct StoreState {
    next_id: u64,
    items: BTreeMap<u64, Map<String, Value>>,
    creates_seen: usize,
    calls: Vec<(Vec<String>, bool)>,
    sent: Vec<BatchCommand>,
    canned: HashMap<String, Value>,
}

/// Store double that decodes every command and keeps created items in memory.
pub struct FakeStore {
    state: Mutex<StoreState>,
    /// 1-based index of the `crm.item.add` that should fail.
    pub fail_create_at: Option<usize>,
    /// 1-based index of the batch call that should fail at the transport level.
    pub fail_call_at: Option<usize>,
    pub fail_deletes: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_id: 100,
                ..StoreState::default()
            }),
            fail_create_at: None,
            fail_call_at: None,
            fail_deletes: false,
        }
    }

    pub fn failing_create(index: usize) -> Self {
        Self {
            fail_create_at: Some(index),
            ..Self::new()
        }
    }

    /// Reply with `result` to every command of `method` the store does not model.
    pub fn with_canned(self, method: &str, result: Value) -> Self {
        self.state.lock().unwrap().canned.insert(method.to_string(), result);
        self
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn items(&self) -> Vec<Map<String, Value>> {
        self.state.lock().unwrap().items.values().cloned().collect()
    }

    /// Encoded command names per call, with the halt flag.
    pub fn calls(&self) -> Vec<(Vec<String>, bool)> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Every decoded command of `method`, in the order the store saw them.
    pub fn sent(&self, method: &str) -> Vec<BatchCommand> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|command| command.method == method)
            .cloned()
            .collect()
    }

    pub fn commands_of(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .flat_map(|(names, _)| names.iter())
            .filter(|name| name.starts_with(prefix))
            .count()
    }

    fn apply(state: &mut StoreState, fail_create_at: Option<usize>, fail_deletes: bool, command: &BatchCommand) -> Result<Value, Value> {
        match command.method.as_str() {
            "crm.item.add" => {
                state.creates_seen += 1;
                if fail_create_at == Some(state.creates_seen) {
                    return Err(json!({"error": "ERROR_CORE", "error_description": "simulated failure"}));
                }
                let id = state.next_id;
                state.next_id += 1;
                let fields = match command.params.get("fields") {
                    Some(Value::Object(fields)) => fields.clone(),
                    _ => Map::new(),
                };
                state.items.insert(id, fields);
                Ok(json!({"item": {"id": id}}))
            }
            "crm.item.delete" => {
                if fail_deletes {
                    return Err(json!({"error": "ERROR_CORE", "error_description": "delete refused"}));
                }
                let id = command
                    .params
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| json!({"error": "NOT_FOUND"}))?;
                state
                    .items
                    .remove(&id)
                    .map(|_| json!([]))
                    .ok_or_else(|| json!({"error": "NOT_FOUND"}))
            }
            other => state
                .canned
                .get(other)
                .cloned()
                .ok_or_else(|| json!({"error": "ERROR_METHOD_NOT_FOUND"})),
        }
    }
}

#[async_trait]
impl BatchTransport for FakeStore {
    async fn call_batch(&self, commands: &[(String, String)], halt: bool) -> Result<BatchReply, StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((commands.iter().map(|(name, _)| name.clone()).collect(), halt));

        if self.fail_call_at == Some(state.calls.len()) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }

        let mut reply = BatchReply::default();
        for (name, encoded) in commands {
            let command = BatchCommand::parse(encoded).map_err(StoreError::Malformed)?;
            state.sent.push(command.clone());
            match Self::apply(&mut state, self.fail_create_at, self.fail_deletes, &command) {
                Ok(result) => {
                    reply.result.insert(name.clone(), result);
                }
                Err(error) => {
                    reply.result_error.insert(name.clone(), error);
                    if halt {
                        break;
                    }
                }
            }
        }
        Ok(reply)
    }
}

// ==============================================================================
// STATIC FETCHER
// ==============================================================================

/// Fetcher serving fixed records, filtering by the requested window and ids.
#[derive(Default, Clone)]
pub struct StaticFetcher {
    pub patient_id: u64,
    pub specialists: Vec<SpecialistInfo>,
    pub working_days: Vec<WorkingDay>,
    pub appointments: Vec<BookedAppointment>,
    pub fail_schedules: bool,
}

impl StaticFetcher {
    pub fn new(patient_id: u64) -> Self {
        Self {
            patient_id,
            ..Self::default()
        }
    }

    pub fn specialist(mut self, id: SpecialistId, codes: &[&str]) -> Self {
        self.specialists.push(specialist(id, codes));
        self
    }

    pub fn works(mut self, id: SpecialistId, date: &str, intervals: &[(&str, &str)]) -> Self {
        self.working_days.push(working_day(id, date, intervals));
        self
    }

    pub fn booked(mut self, booking: BookedAppointment) -> Self {
        self.appointments.push(booking);
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn get_specialists_by_type(&self, type_codes: &[String]) -> Result<Vec<SpecialistInfo>, AppointplanError> {
        Ok(self
            .specialists
            .iter()
            .filter(|s| s.type_codes.iter().any(|c| type_codes.contains(c)))
            .cloned()
            .collect())
    }

    async fn get_schedules(&self, window: Interval, ids: &[SpecialistId]) -> Result<Vec<WorkingDay>, AppointplanError> {
        if self.fail_schedules {
            return Err(StoreError::Transport("schedule read timed out".to_string()).into());
        }
        Ok(self
            .working_days
            .iter()
            .filter(|d| ids.contains(&d.specialist_id))
            .filter(|d| d.date >= window.start.date() && d.date < window.end.date())
            .cloned()
            .collect())
    }

    async fn get_appointments(&self, window: Interval, ids: &[SpecialistId]) -> Result<Vec<BookedAppointment>, AppointplanError> {
        Ok(self
            .appointments
            .iter()
            .filter(|a| ids.contains(&a.specialist_id))
            .filter(|a| a.interval.start >= window.start && a.interval.start < window.end)
            .cloned()
            .collect())
    }

    async fn get_deal_info(&self, deal_id: DealId) -> Result<DealInfo, AppointplanError> {
        Ok(DealInfo {
            deal_id,
            patient_id: self.patient_id,
        })
    }
}

// ==============================================================================
// BUILDERS
// ==============================================================================

pub fn interval(start: &str, end: &str) -> Interval {
    Interval::new(local(start), local(end))
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

pub fn specialist(id: SpecialistId, codes: &[&str]) -> SpecialistInfo {
    SpecialistInfo {
        id,
        type_codes: codes.iter().map(|c| c.to_string()).collect(),
    }
}

/// `intervals` are `("HH:MM", "HH:MM")` pairs on `date`.
pub fn working_day(id: SpecialistId, date_raw: &str, intervals: &[(&str, &str)]) -> WorkingDay {
    WorkingDay {
        specialist_id: id,
        date: date(date_raw),
        intervals: intervals
            .iter()
            .map(|(s, e)| interval(&format!("{} {}", date_raw, s), &format!("{} {}", date_raw, e)))
            .collect(),
    }
}

pub fn booking(id: u64, specialist_id: SpecialistId, patient_id: u64, start: &str, end: &str) -> BookedAppointment {
    BookedAppointment {
        id,
        specialist_id,
        patient_id: Some(patient_id),
        type_code: None,
        interval: interval(start, end),
    }
}
