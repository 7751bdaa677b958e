// libs/schedule-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        // Recurring weekly rules
        .route("/{doctor_id}/rules", post(handlers::create_rule))
        .route("/{doctor_id}/rules", get(handlers::list_rules))
        .route("/{doctor_id}/rules/{rule_id}", delete(handlers::delete_rule))
        // Date-specific exceptions (vacation days, one-off closures)
        .route("/{doctor_id}/exceptions", post(handlers::upsert_exception))
        // Derived availability and bookable slots
        .route("/{doctor_id}/availability", get(handlers::get_effective_availability))
        .route("/{doctor_id}/slots", get(handlers::list_open_slots))
        .route("/{doctor_id}/slots/generate", post(handlers::generate_slots))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
