use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    book_appointment,
    cancel_reservation,
    get_available_slots,
    get_booking_stats,
    get_day_queue,
    get_patient_reservations,
    stream_outcomes,
};
use scheduling_cell::PolicyRegistry;

use crate::services::{
    AvailabilityService, BookingCoordinator, BookingMetrics, BookingNotifier, CoordinatorSettings, LedgerStore,
};

#[derive(Clone)]
pub struct BookingState {
    pub coordinator: Arc<BookingCoordinator>,
    pub availability: Arc<AvailabilityService>,
    pub notifier: Arc<BookingNotifier>,
    pub metrics: Arc<BookingMetrics>,
}

impl BookingState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        policies: Arc<PolicyRegistry>,
        settings: CoordinatorSettings,
        notification_buffer: usize,
    ) -> Self {
        let notifier = Arc::new(BookingNotifier::new(notification_buffer));
        let metrics = Arc::new(BookingMetrics::new());

        let coordinator = Arc::new(BookingCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&policies),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
            settings,
        ));
        let availability = Arc::new(AvailabilityService::new(store, policies));

        Self {
            coordinator,
            availability,
            notifier,
            metrics,
        }
    }
}

pub fn booking_routes(state: BookingState) -> Router {
    Router::new()
        .route("/", post(book_appointment))
        .route("/available", get(get_available_slots))
        .route("/doctors/{clinician_id}/queue", get(get_day_queue))
        .route("/doctors/{clinician_id}/{date}/{serial_number}/cancel", post(cancel_reservation))
        .route("/patients/{patient_id}", get(get_patient_reservations))
        .route("/stats", get(get_booking_stats))
        .route("/events", get(stream_outcomes))
        .with_state(state)
}
