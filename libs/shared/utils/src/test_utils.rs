use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};

use shared_config::AppConfig;

pub struct TestConfig {
    pub bitrix_webhook_url: String,
    pub timezone: Tz,
    pub batch_limit: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            bitrix_webhook_url: "http://localhost:8089/rest/1/test-token".to_string(),
            timezone: chrono_tz::Europe::Moscow,
            batch_limit: 50,
        }
    }
}

impl TestConfig {
    pub fn with_webhook(url: impl Into<String>) -> Self {
        Self {
            bitrix_webhook_url: url.into(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            bitrix_webhook_url: self.bitrix_webhook_url.clone(),
            timezone: self.timezone,
            batch_limit: self.batch_limit,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Parse `"YYYY-MM-DD HH:MM"` as clinic-local wall-clock time.
pub fn local(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .unwrap_or_else(|e| panic!("bad test timestamp '{}': {}", raw, e))
}

/// Epoch milliseconds of a clinic-local wall-clock time.
pub fn local_millis(tz: Tz, raw: &str) -> i64 {
    tz.from_local_datetime(&local(raw))
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| panic!("'{}' does not exist in {}", raw, tz))
}

/// RFC 3339 rendering of a clinic-local wall-clock time.
pub fn local_rfc3339(tz: Tz, raw: &str) -> String {
    tz.from_local_datetime(&local(raw))
        .earliest()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| panic!("'{}' does not exist in {}", raw, tz))
}

pub struct MockBitrixResponses;

impl MockBitrixResponses {
    /// Wrap per-command results the way the `batch` method replies.
    pub fn batch_reply(results: Value, errors: Value, next: Value) -> Value {
        json!({
            "result": {
                "result": results,
                "result_error": errors,
                "result_total": [],
                "result_next": next,
                "result_time": []
            },
            "time": {"start": 0.0, "finish": 0.0}
        })
    }

    pub fn batch_ok(results: Value) -> Value {
        Self::batch_reply(results, json!([]), json!([]))
    }

    pub fn user(id: u64, department_ids: &[u64]) -> Value {
        json!({
            "ID": id.to_string(),
            "ACTIVE": true,
            "NAME": format!("Specialist {}", id),
            "UF_DEPARTMENT": department_ids,
        })
    }

    pub fn department(id: u64, code: &str) -> Value {
        json!({"ID": id.to_string(), "NAME": code, "SORT": 500})
    }

    pub fn appointment_fields(codes: &[(&str, &str)]) -> Value {
        let items: Vec<Value> = codes
            .iter()
            .map(|(id, code)| json!({"ID": id, "VALUE": code}))
            .collect();
        json!({
            "fields": {
                "ufCrm3Code": {"type": "enumeration", "items": items}
            }
        })
    }

    /// A working-day record: `intervals` are clinic-local `("HH:MM", "HH:MM")` pairs on `date`.
    pub fn schedule(tz: Tz, id: u64, specialist_id: u64, date: &str, intervals: &[(&str, &str)]) -> Value {
        let raw: Vec<String> = intervals
            .iter()
            .map(|(start, end)| {
                format!(
                    "{}:{}",
                    local_millis(tz, &format!("{} {}", date, start)),
                    local_millis(tz, &format!("{} {}", date, end)),
                )
            })
            .collect();
        json!({
            "id": id,
            "assignedById": specialist_id,
            "ufCrm4Date": local_rfc3339(tz, &format!("{} 00:00", date)),
            "ufCrm4Intervals": raw,
        })
    }

    pub fn appointment(
        tz: Tz,
        id: u64,
        specialist_id: u64,
        patient_id: u64,
        code_id: &str,
        start: &str,
        end: &str,
    ) -> Value {
        json!({
            "id": id,
            "assignedById": specialist_id,
            "ufCrm3Children": patient_id,
            "ufCrm3Code": [code_id],
            "ufCrm3StartDate": local_rfc3339(tz, start),
            "ufCrm3EndDate": local_rfc3339(tz, end),
        })
    }

    pub fn list_page(items: Vec<Value>) -> Value {
        json!({"items": items})
    }

    pub fn deal(id: u64, contact_id: &str) -> Value {
        json!({"ID": id.to_string(), "CONTACT_ID": contact_id, "TITLE": "Treatment plan"})
    }

    pub fn created_item(id: u64) -> Value {
        json!({"item": {"id": id}})
    }

    pub fn error(message: &str) -> Value {
        json!({"error": "ERROR_CORE", "error_description": message})
    }

    pub fn named(entries: Vec<(String, Value)>) -> Value {
        Value::Object(entries.into_iter().collect::<Map<String, Value>>())
    }
}
