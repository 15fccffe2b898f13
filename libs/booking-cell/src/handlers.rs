use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use scheduling_cell::hhmm;
use shared_models::{AppError, ClinicianId, PatientId};

use crate::models::{
    AvailabilityQuery, BookAppointmentRequest, BookingConfirmation, BookingRequest, QueueQuery, SlotAvailability,
};
use crate::router::BookingState;
use crate::services::BookingStats;

/// `[{time, available}]` for one clinician and date
pub async fn get_available_slots(
    State(state): State<BookingState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<SlotAvailability>>, AppError> {
    let clinician_id = ClinicianId::new(query.clinician_id);
    let entries = state.availability.availability(&clinician_id, query.date).await?;

    Ok(Json(entries.iter().map(SlotAvailability::from).collect()))
}

/// Book a slot. Replays of an idempotency key answer 200 instead of 201.
pub async fn book_appointment(
    State(state): State<BookingState>,
    Json(body): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<BookingConfirmation>), AppError> {
    info!("Booking request for clinician {} on {} at {}", body.clinician_id, body.date, body.time);

    let start_time = hhmm::parse(&body.time)?;
    let mut request = BookingRequest::new(
        ClinicianId::new(body.clinician_id),
        PatientId::new(body.patient_id),
        body.date,
        start_time,
    );
    request.notes = body.notes;
    request.idempotency_key = body.idempotency_key;

    let booking = state.coordinator.book(request).await?;
    let status = if booking.replayed { StatusCode::OK } else { StatusCode::CREATED };

    Ok((status, Json(BookingConfirmation::from(&booking))))
}

/// Waiting-room queue for a clinician's day
pub async fn get_day_queue(
    State(state): State<BookingState>,
    Path(clinician_id): Path<String>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let clinician_id = ClinicianId::new(clinician_id);
    let queue = state.coordinator.day_queue(&clinician_id, query.date).await?;
    let confirmed = queue.iter().filter(|r| r.is_confirmed()).count();

    Ok(Json(json!({
        "clinician_id": clinician_id,
        "date": query.date,
        "confirmed": confirmed,
        "reservations": queue
    })))
}

pub async fn cancel_reservation(
    State(state): State<BookingState>,
    Path((clinician_id, date, serial_number)): Path<(String, NaiveDate, u32)>,
) -> Result<Json<Value>, AppError> {
    let clinician_id = ClinicianId::new(clinician_id);
    let reservation = state.coordinator.cancel(&clinician_id, date, serial_number).await?;

    Ok(Json(json!({
        "success": true,
        "reservation": reservation,
        "message": "Reservation cancelled"
    })))
}

pub async fn get_patient_reservations(
    State(state): State<BookingState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let patient_id = PatientId::new(patient_id);
    let reservations = state.coordinator.patient_reservations(&patient_id).await?;

    Ok(Json(json!({
        "patient_id": patient_id,
        "total": reservations.len(),
        "reservations": reservations
    })))
}

pub async fn get_booking_stats(State(state): State<BookingState>) -> Json<BookingStats> {
    Json(state.metrics.snapshot())
}

/// Server-sent stream of booking outcomes for waiting-room displays
pub async fn stream_outcomes(
    State(state): State<BookingState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.notifier.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(outcome) => {
                    let event = match Event::default().event(outcome.kind()).json_data(&*outcome) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Dropping unserializable booking outcome: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok::<_, Infallible>(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Outcome stream subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
