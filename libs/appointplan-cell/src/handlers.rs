// libs/appointplan-cell/src/handlers.rs
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{AppointplanError, PlanRequest, PlanResponse};
use crate::services::appointplan::AppointplanService;
use crate::state::AppointplanState;

impl From<AppointplanError> for AppError {
    fn from(err: AppointplanError) -> Self {
        match err {
            AppointplanError::Validation(msg) => AppError::BadRequest(msg),
            e @ (AppointplanError::NoSpecialists { .. } | AppointplanError::NoSlot { .. }) => {
                AppError::Unprocessable(e.to_string())
            }
            e @ AppointplanError::RemoteFetch(_) => AppError::ExternalService(e.to_string()),
            e @ AppointplanError::Commit { .. } => AppError::ExternalService(e.to_string()),
        }
    }
}

/// The body is decoded by hand so malformed input gets the JSON error body.
fn decode_request(body: Value) -> Result<PlanRequest, AppError> {
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
}

fn ensure_configured(state: &AppointplanState) -> Result<(), AppError> {
    if state.config.is_configured() {
        Ok(())
    } else {
        Err(AppError::Unavailable("Remote store is not configured".to_string()))
    }
}

pub async fn health() -> &'static str {
    "Appointment planner is running"
}

#[axum::debug_handler]
pub async fn plan_appointments(
    State(state): State<Arc<AppointplanState>>,
    Json(body): Json<Value>,
) -> Result<Json<PlanResponse>, AppError> {
    ensure_configured(&state)?;
    let request = decode_request(body)?;
    let tz = state.config.timezone;
    let service = AppointplanService::new(state);

    let appointments = service.run(request).await?;

    Ok(Json(PlanResponse {
        appointments: appointments.iter().map(|a| a.to_view(tz)).collect(),
    }))
}

#[axum::debug_handler]
pub async fn plan_appointments_async(
    State(state): State<Arc<AppointplanState>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_configured(&state)?;
    let request = decode_request(body)?;
    let service = AppointplanService::new(state);
    let spec = service.parse(&request)?;
    let run_id = Uuid::new_v4();
    let deal_id = spec.deal_id;

    tokio::spawn(async move {
        match service.run_spec(spec, run_id).await {
            Ok(planned) => info!(
                "Background run {} for deal {} committed {} appointments",
                run_id,
                deal_id,
                planned.len()
            ),
            Err(e) => error!("Background run {} for deal {} failed: {}", run_id, deal_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "accepted": true,
            "runId": run_id
        })),
    ))
}
