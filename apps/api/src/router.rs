use std::sync::Arc;

use axum::Router;

use appointplan_cell::router::appointplan_routes;
use appointplan_cell::state::AppointplanState;

pub fn create_router(state: Arc<AppointplanState>) -> Router {
    Router::new()
        .merge(appointplan_routes(state))
}
