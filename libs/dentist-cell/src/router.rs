// libs/dentist-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn dentist_routes(state: Arc<AppConfig>) -> Router {
    // All schedule operations require authentication
    let protected_routes = Router::new()
        // Recurring working hours
        .route("/{dentist_id}/working-hours", get(handlers::list_working_hours))
        .route("/{dentist_id}/working-hours", post(handlers::create_working_hours))
        .route("/working-hours/{working_hours_id}", put(handlers::update_working_hours))
        .route("/working-hours/{working_hours_id}", delete(handlers::delete_working_hours))
        // Date-bound exceptions (holidays, blocked periods)
        .route("/{dentist_id}/exceptions", get(handlers::list_exceptions))
        .route("/{dentist_id}/exceptions", post(handlers::create_exception))
        .route("/exceptions/{exception_id}", delete(handlers::delete_exception))
        // Derived bookable slots
        .route("/{dentist_id}/slots", get(handlers::get_slots))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
