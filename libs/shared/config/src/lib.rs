use std::env;
use std::str::FromStr;

use chrono_tz::Tz;
use tracing::warn;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Moscow;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bitrix_webhook_url: String,
    pub timezone: Tz,
    pub server_port: u16,
    pub batch_limit: usize,
    pub min_break_minutes: i64,
    pub max_break_minutes: i64,
    pub max_daily_appointments: usize,
    pub max_daily_per_type: usize,
    pub appointment_entity_type_id: u32,
    pub schedule_entity_type_id: u32,
    pub planned_status_id: String,
    /// Always told about a run's outcome, alongside the requesting user.
    pub default_notify_user_id: Option<u64>,
    pub fields: StoreFields,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bitrix_webhook_url: String::new(),
            timezone: DEFAULT_TIMEZONE,
            server_port: 3000,
            batch_limit: 50,
            min_break_minutes: 15,
            max_break_minutes: 45,
            max_daily_appointments: 6,
            max_daily_per_type: 2,
            appointment_entity_type_id: 1036,
            schedule_entity_type_id: 1042,
            planned_status_id: "50".to_string(),
            default_notify_user_id: None,
            fields: StoreFields::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bitrix_webhook_url: env::var("BITRIX_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("BITRIX_WEBHOOK_URL not set, using empty value");
                    String::new()
                }),
            timezone: parse_var("APP_TIMEZONE", defaults.timezone),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
            batch_limit: parse_var("BATCH_LIMIT", defaults.batch_limit).max(1),
            min_break_minutes: parse_var("MIN_BREAK_MINUTES", defaults.min_break_minutes),
            max_break_minutes: parse_var("MAX_BREAK_MINUTES", defaults.max_break_minutes),
            max_daily_appointments: parse_var("MAX_DAILY_APPOINTMENTS", defaults.max_daily_appointments),
            max_daily_per_type: parse_var("MAX_DAILY_PER_TYPE", defaults.max_daily_per_type),
            appointment_entity_type_id: parse_var(
                "APPOINTMENT_ENTITY_TYPE_ID",
                defaults.appointment_entity_type_id,
            ),
            schedule_entity_type_id: parse_var(
                "SCHEDULE_ENTITY_TYPE_ID",
                defaults.schedule_entity_type_id,
            ),
            planned_status_id: env::var("PLANNED_STATUS_ID")
                .unwrap_or(defaults.planned_status_id),
            default_notify_user_id: optional_var("DEFAULT_NOTIFY_USER_ID"),
            fields: StoreFields::default(),
        };

        if config.min_break_minutes > config.max_break_minutes {
            warn!(
                "MIN_BREAK_MINUTES ({}) exceeds MAX_BREAK_MINUTES ({}), only back-to-back appointments will be planned on shared days",
                config.min_break_minutes, config.max_break_minutes
            );
        }

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.bitrix_webhook_url.is_empty()
    }
}

/// Names of the remote record fields the planner reads and writes.
#[derive(Debug, Clone)]
pub struct StoreFields {
    pub appointment_specialist: String,
    pub appointment_patient: String,
    pub appointment_start: String,
    pub appointment_end: String,
    pub appointment_code: String,
    pub appointment_status: String,
    pub appointment_parent_deal: String,
    pub schedule_specialist: String,
    pub schedule_date: String,
    pub schedule_intervals: String,
}

impl Default for StoreFields {
    fn default() -> Self {
        Self {
            appointment_specialist: "assignedById".to_string(),
            appointment_patient: "ufCrm3Children".to_string(),
            appointment_start: "ufCrm3StartDate".to_string(),
            appointment_end: "ufCrm3EndDate".to_string(),
            appointment_code: "ufCrm3Code".to_string(),
            appointment_status: "ufCrm3Status".to_string(),
            appointment_parent_deal: "ufCrm3ParentDeal".to_string(),
            schedule_specialist: "assignedById".to_string(),
            schedule_date: "ufCrm4Date".to_string(),
            schedule_intervals: "ufCrm4Intervals".to_string(),
        }
    }
}

fn optional_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warn!("{} has an invalid value '{}', ignoring it", name, raw);
    }
    parsed
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
