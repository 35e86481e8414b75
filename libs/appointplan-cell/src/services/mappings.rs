// libs/appointplan-cell/src/services/mappings.rs
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::models::StoreError;
use crate::services::batch::{execute_batch, fetch_lists, BatchCommand, BatchTransport};

/// Remote identifiers the planner translates to and from type codes.
///
/// Loaded once at startup and shared read-only between requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreMappings {
    department_by_code: HashMap<String, u64>,
    code_by_department: HashMap<u64, String>,
    code_id_by_code: HashMap<String, String>,
    code_by_code_id: HashMap<String, String>,
}

impl StoreMappings {
    /// Build from `(department id, type code)` and `(list value id, type code)` pairs.
    pub fn new(
        departments: impl IntoIterator<Item = (u64, String)>,
        code_ids: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut mappings = Self::default();
        for (department_id, code) in departments {
            mappings.department_by_code.insert(code.clone(), department_id);
            mappings.code_by_department.insert(department_id, code);
        }
        for (code_id, code) in code_ids {
            mappings.code_id_by_code.insert(code.clone(), code_id.clone());
            mappings.code_by_code_id.insert(code_id, code);
        }
        mappings
    }

    /// Read department names and the appointment code list from the store.
    pub async fn load<T>(transport: &T, config: &AppConfig) -> Result<Self, StoreError>
    where
        T: BatchTransport + ?Sized,
    {
        let lists = fetch_lists(
            transport,
            vec![("departments".to_string(), BatchCommand::new("department.get"))],
            config.batch_limit,
        )
        .await?;

        let departments: Vec<(u64, String)> = lists
            .get("departments")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_department).collect())
            .unwrap_or_default();

        let fields_command = BatchCommand::new("crm.item.fields")
            .param("entityTypeId", config.appointment_entity_type_id);
        let reply = execute_batch(
            transport,
            &[("fields".to_string(), fields_command)],
            config.batch_limit,
            false,
        )
        .await
        .map_err(|e| e.source)?;

        if let Some(error) = reply.result_error.get("fields") {
            return Err(StoreError::Transport(format!("crm.item.fields failed: {}", error)));
        }

        let code_field = reply
            .result
            .get("fields")
            .and_then(|value| value.get("fields").or(Some(value)))
            .and_then(|fields| fields.get(&config.fields.appointment_code))
            .ok_or_else(|| {
                StoreError::Malformed(format!(
                    "field '{}' missing from appointment fields",
                    config.fields.appointment_code
                ))
            })?;

        let code_ids: Vec<(String, String)> = code_field
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_list_value).collect())
            .unwrap_or_default();

        let mappings = Self::new(departments, code_ids);
        info!(
            "Loaded {} departments and {} appointment codes",
            mappings.department_by_code.len(),
            mappings.code_id_by_code.len()
        );
        Ok(mappings)
    }

    pub fn department_for(&self, type_code: &str) -> Option<u64> {
        self.department_by_code.get(type_code).copied()
    }

    pub fn code_for_department(&self, department_id: u64) -> Option<&str> {
        self.code_by_department.get(&department_id).map(String::as_str)
    }

    /// List value id for `type_code`; unmapped codes are sent verbatim.
    pub fn code_id_for<'a>(&'a self, type_code: &'a str) -> &'a str {
        match self.code_id_by_code.get(type_code) {
            Some(id) => id,
            None => {
                warn!("No list value id for code '{}', sending it verbatim", type_code);
                type_code
            }
        }
    }

    pub fn code_for_id(&self, code_id: &str) -> Option<&str> {
        self.code_by_code_id.get(code_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.department_by_code.is_empty() && self.code_id_by_code.is_empty()
    }
}

fn parse_department(item: &Value) -> Option<(u64, String)> {
    let record: &Map<String, Value> = item.as_object()?;
    let id = id_of(record.get("ID")?)?;
    let name = record.get("NAME")?.as_str()?.trim();
    (!name.is_empty()).then(|| (id, name.to_string()))
}

fn parse_list_value(item: &Value) -> Option<(String, String)> {
    let id = match item.get("ID")? {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let code = item.get("VALUE")?.as_str()?.to_string();
    Some((id, code))
}

/// Store ids arrive as numbers or numeric strings.
pub(crate) fn id_of(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
