use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use crate::handlers;
use crate::services::policy::PolicyRegistry;

pub fn policy_routes(registry: Arc<PolicyRegistry>) -> Router {
    Router::new()
        .route(
            "/{clinician_id}/working-hours",
            get(handlers::get_working_hours)
                .put(handlers::set_working_hours)
                .delete(handlers::clear_working_hours),
        )
        .route("/{clinician_id}/slots", get(handlers::get_candidate_slots))
        .with_state(registry)
}
