use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use scheduling_cell::hhmm;
use shared_models::{ClinicianId, PatientId};

// ==============================================================================
// LEDGER IDENTITY
// ==============================================================================

/// One ledger exists per clinician per calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub clinician_id: ClinicianId,
    pub date: NaiveDate,
}

impl LedgerKey {
    pub fn new(clinician_id: ClinicianId, date: NaiveDate) -> Self {
        Self { clinician_id, date }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.clinician_id, self.date)
    }
}

/// Identity of a slot without its duration; what errors and queries refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub clinician_id: ClinicianId,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
}

impl SlotRef {
    pub fn new(key: &LedgerKey, time: NaiveTime) -> Self {
        Self {
            clinician_id: key.clinician_id.clone(),
            date: key.date,
            time,
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} at {}", self.clinician_id, self.date, hhmm::format(&self.time))
    }
}

/// Derived value; identity is the whole tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub clinician_id: ClinicianId,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn slot_ref(&self) -> SlotRef {
        SlotRef {
            clinician_id: self.clinician_id.clone(),
            date: self.date,
            time: self.start_time,
        }
    }
}

// ==============================================================================
// RESERVATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Confirmed => write!(f, "CONFIRMED"),
            ReservationStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub serial_number: u32,
    pub patient_id: PatientId,
    pub slot: Slot,
    pub notes: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

// ==============================================================================
// BOOKING REQUEST/RESULT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub clinician_id: ClinicianId,
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

impl BookingRequest {
    pub fn new(
        clinician_id: ClinicianId,
        patient_id: PatientId,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Self {
        Self {
            clinician_id,
            patient_id,
            date,
            start_time,
            notes: None,
            idempotency_key: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.clinician_id.clone(), self.date)
    }

    pub fn slot_ref(&self) -> SlotRef {
        SlotRef {
            clinician_id: self.clinician_id.clone(),
            date: self.date,
            time: self.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub serial_number: u32,
    pub patient_id: PatientId,
    pub slot: Slot,
    /// `Cancelled` only when a replayed key points at a reservation that
    /// was cancelled after it was booked.
    pub status: ReservationStatus,
    /// True when an idempotency key matched an earlier commit.
    pub replayed: bool,
}

impl ConfirmedBooking {
    pub fn from_reservation(reservation: &Reservation, replayed: bool) -> Self {
        Self {
            serial_number: reservation.serial_number,
            patient_id: reservation.patient_id.clone(),
            slot: reservation.slot.clone(),
            status: reservation.status,
            replayed,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityEntry {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub is_available: bool,
    pub occupancy: u32,
    pub capacity: u32,
}

// ==============================================================================
// NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingOutcome {
    Confirmed {
        booking: ConfirmedBooking,
        at: DateTime<Utc>,
    },
    Rejected {
        slot: SlotRef,
        patient_id: PatientId,
        code: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        reservation: Reservation,
        at: DateTime<Utc>,
    },
}

impl BookingOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            BookingOutcome::Confirmed { .. } => "confirmed",
            BookingOutcome::Rejected { .. } => "rejected",
            BookingOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn ledger_key(&self) -> LedgerKey {
        match self {
            BookingOutcome::Confirmed { booking, .. } => {
                LedgerKey::new(booking.slot.clinician_id.clone(), booking.slot.date)
            }
            BookingOutcome::Rejected { slot, .. } => LedgerKey::new(slot.clinician_id.clone(), slot.date),
            BookingOutcome::Cancelled { reservation, .. } => {
                LedgerKey::new(reservation.slot.clinician_id.clone(), reservation.slot.date)
            }
        }
    }
}

// ==============================================================================
// WIRE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(rename = "doctorId", alias = "clinicianId")]
    pub clinician_id: String,
    pub date: NaiveDate,
}

/// `{time, available}` as rendered to booking clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub time: String,
    pub available: bool,
}

impl From<&AvailabilityEntry> for SlotAvailability {
    fn from(entry: &AvailabilityEntry) -> Self {
        Self {
            time: hhmm::format(&entry.start_time),
            available: entry.is_available,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    #[serde(alias = "doctorId")]
    pub clinician_id: String,
    pub patient_id: String,
    pub date: NaiveDate,
    pub time: String,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    pub serial_number: u32,
    pub clinician: String,
    pub date: NaiveDate,
    pub time: String,
    pub status: ReservationStatus,
    pub replayed: bool,
}

impl From<&ConfirmedBooking> for BookingConfirmation {
    fn from(booking: &ConfirmedBooking) -> Self {
        Self {
            serial_number: booking.serial_number,
            clinician: booking.slot.clinician_id.to_string(),
            date: booking.slot.date,
            time: hhmm::format(&booking.slot.start_time),
            status: booking.status,
            replayed: booking.replayed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueQuery {
    pub date: NaiveDate,
}
