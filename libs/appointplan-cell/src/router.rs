// libs/appointplan-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppointplanState;

pub fn appointplan_routes(state: Arc<AppointplanState>) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/plan", post(handlers::plan_appointments))
        .route("/plan/async", post(handlers::plan_appointments_async)) // Fire-and-forget, outcome only logged
        .with_state(state)
}
