use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::{booking_routes, BookingState};
use scheduling_cell::{policy_routes, PolicyRegistry};

pub fn create_router(booking: BookingState, policies: Arc<PolicyRegistry>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/appointments", booking_routes(booking))
        .nest("/clinicians", policy_routes(policies))
}
