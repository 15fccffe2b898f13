use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use scheduling_cell::{enumerate_slots, PolicyRegistry};
use shared_config::AppConfig;
use shared_models::{ClinicianId, PatientId};

use crate::error::BookingError;
use crate::models::{BookingOutcome, BookingRequest, ConfirmedBooking, LedgerKey, Reservation};
use crate::services::ledger::SlotLedger;
use crate::services::metrics::BookingMetrics;
use crate::services::notification::BookingNotifier;
use crate::services::store::LedgerStore;

const MAX_NOTES_LENGTH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Bound on waiting for a ledger's critical section.
    pub lock_timeout: Duration,
    /// Version conflicts tolerated inside one critical section.
    pub max_cas_retries: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            max_cas_retries: 5,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lock_timeout: Duration::from_millis(config.booking_lock_timeout_ms),
            max_cas_retries: config.booking_max_cas_retries,
        }
    }
}

/// What a critical-section step did to the ledger.
enum Step<T> {
    Commit(T),
    Unchanged(T),
}

/// Serializes every ledger mutation per (clinician, date).
///
/// Within a process a fair `tokio::sync::Mutex` per key admits callers in the
/// order they started waiting. Across processes the store's compare-and-swap
/// catches writers that raced us; those are retried under the same lock.
pub struct BookingCoordinator {
    store: Arc<dyn LedgerStore>,
    policies: Arc<PolicyRegistry>,
    notifier: Arc<BookingNotifier>,
    metrics: Arc<BookingMetrics>,
    locks: RwLock<HashMap<LedgerKey, Arc<Mutex<()>>>>,
    settings: CoordinatorSettings,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        policies: Arc<PolicyRegistry>,
        notifier: Arc<BookingNotifier>,
        metrics: Arc<BookingMetrics>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            policies,
            notifier,
            metrics,
            locks: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.store)
    }

    pub fn policies(&self) -> Arc<PolicyRegistry> {
        Arc::clone(&self.policies)
    }

    /// Reserves the requested slot and returns its serial number.
    ///
    /// The outcome, success or failure, is published only after the ledger's
    /// critical section has been released. Replaying the key of a reservation
    /// that has since been cancelled changes nothing and publishes nothing.
    #[instrument(skip(self, request), fields(ledger = %request.ledger_key(), time = %request.start_time))]
    pub async fn book(&self, request: BookingRequest) -> Result<ConfirmedBooking, BookingError> {
        self.metrics.record_attempt();

        let result = self.try_book(&request).await;

        let outcome = match &result {
            Ok(booking) => {
                self.metrics.record_confirmed(booking.replayed);
                info!(
                    "Booked serial #{} for patient {} ({}, {})",
                    booking.serial_number,
                    booking.patient_id,
                    if booking.replayed { "replayed" } else { "new" },
                    booking.status
                );
                booking.is_confirmed().then(|| BookingOutcome::Confirmed {
                    booking: booking.clone(),
                    at: Utc::now(),
                })
            }
            Err(e) => {
                self.metrics.record_failure(e);
                match e {
                    BookingError::SlotUnavailable { .. } | BookingError::Timeout { .. } => {
                        debug!("Booking rejected: {}", e)
                    }
                    _ => warn!("Booking rejected: {}", e),
                }
                Some(BookingOutcome::Rejected {
                    slot: request.slot_ref(),
                    patient_id: request.patient_id.clone(),
                    code: e.code().to_string(),
                    reason: e.to_string(),
                    at: Utc::now(),
                })
            }
        };

        if let Some(outcome) = outcome {
            self.notifier.publish(outcome).await;
        }
        result
    }

    async fn try_book(&self, request: &BookingRequest) -> Result<ConfirmedBooking, BookingError> {
        validate_request(request)?;

        let policy = self.policies.policy_for(&request.clinician_id).await;
        let key = request.ledger_key();

        // The current policy only shapes a ledger that does not exist yet;
        // after that the ledger's own grid and capacity decide.
        let seed = || -> Result<SlotLedger, BookingError> {
            let slots = enumerate_slots(&policy, request.date)
                .map_err(|e| BookingError::from_calendar(&request.clinician_id, e))?;
            if slots.is_empty() {
                return Err(BookingError::InvalidSlot {
                    slot: request.slot_ref(),
                });
            }
            Ok(SlotLedger::new(key.clone(), policy.capacity_per_slot, policy.grid()))
        };

        self.with_ledger(&key, seed, |ledger| {
            if let Some(token) = &request.idempotency_key {
                if let Some(existing) = ledger.find_by_idempotency_key(token) {
                    return replay(request, token, existing).map(Step::Unchanged);
                }
            }

            let reservation = ledger.try_reserve(
                request.start_time,
                request.patient_id.clone(),
                request.notes.clone(),
                request.idempotency_key.clone(),
                Utc::now(),
            )?;
            Ok(Step::Commit(ConfirmedBooking::from_reservation(&reservation, false)))
        })
        .await
    }

    /// Cancels a confirmed reservation. Cancelling twice is `NotFound`.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        clinician_id: &ClinicianId,
        date: NaiveDate,
        serial_number: u32,
    ) -> Result<Reservation, BookingError> {
        let key = LedgerKey::new(clinician_id.clone(), date);
        let missing_key = key.clone();

        let result = self
            .with_ledger(
                &key,
                move || {
                    Err(BookingError::NotFound {
                        key: missing_key.clone(),
                        serial_number,
                    })
                },
                |ledger| ledger.cancel(serial_number, Utc::now()).map(Step::Commit),
            )
            .await;

        match &result {
            Ok(reservation) => {
                self.metrics.record_cancellation();
                info!("Cancelled serial #{} in ledger {}", serial_number, key);
                self.notifier
                    .publish(BookingOutcome::Cancelled {
                        reservation: reservation.clone(),
                        at: Utc::now(),
                    })
                    .await;
            }
            Err(e) => {
                self.metrics.record_failure(e);
                debug!("Cancel of serial #{} failed: {}", serial_number, e);
            }
        }

        result
    }

    /// Every reservation for the key in serial order, cancelled ones included.
    pub async fn day_queue(
        &self,
        clinician_id: &ClinicianId,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, BookingError> {
        let key = LedgerKey::new(clinician_id.clone(), date);
        Ok(self
            .store
            .load(&key)
            .await?
            .map(|v| v.ledger.reservations_by_serial())
            .unwrap_or_default())
    }

    /// A patient's reservations across all ledgers, latest appointment first.
    pub async fn patient_reservations(&self, patient_id: &PatientId) -> Result<Vec<Reservation>, BookingError> {
        let mut reservations = Vec::new();

        for key in self.store.ledgers_for_patient(patient_id).await? {
            if let Some(versioned) = self.store.load(&key).await? {
                reservations.extend(
                    versioned
                        .ledger
                        .reservations_by_serial()
                        .into_iter()
                        .filter(|r| &r.patient_id == patient_id),
                );
            }
        }

        reservations.sort_by(|a, b| {
            (b.slot.date, b.slot.start_time, b.serial_number).cmp(&(a.slot.date, a.slot.start_time, a.serial_number))
        });
        Ok(reservations)
    }

    async fn lock_for(&self, key: &LedgerKey) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(key) {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write().await;
        Arc::clone(locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Runs `step` against the current ledger inside the key's critical section.
    ///
    /// `seed` supplies the ledger when none has been stored yet. A committed
    /// step is written with compare-and-swap; on a version conflict the ledger
    /// is reloaded and `step` runs again.
    async fn with_ledger<T, S, F>(&self, key: &LedgerKey, seed: S, mut step: F) -> Result<T, BookingError>
    where
        S: Fn() -> Result<SlotLedger, BookingError>,
        F: FnMut(&mut SlotLedger) -> Result<Step<T>, BookingError>,
    {
        let waiting_since = Instant::now();
        let lock = self.lock_for(key).await;

        let _guard = timeout(self.settings.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| BookingError::Timeout {
                key: key.clone(),
                waited_ms: waiting_since.elapsed().as_millis() as u64,
            })?;

        let entered = Instant::now();
        let mut conflicts = 0;

        let result = loop {
            let (version, mut ledger) = match self.store.load(key).await? {
                Some(versioned) => (versioned.version, versioned.ledger),
                None => (0, seed()?),
            };

            let value = match step(&mut ledger)? {
                Step::Unchanged(value) => break Ok(value),
                Step::Commit(value) => value,
            };

            if self.store.compare_and_swap(key, version, &ledger).await? {
                break Ok(value);
            }

            conflicts += 1;
            self.metrics.record_cas_retry();
            if conflicts > self.settings.max_cas_retries {
                warn!("Ledger {} kept changing underneath us after {} attempts", key, conflicts);
                break Err(BookingError::Timeout {
                    key: key.clone(),
                    waited_ms: waiting_since.elapsed().as_millis() as u64,
                });
            }

            debug!("Version conflict on ledger {}, retry {}/{}", key, conflicts, self.settings.max_cas_retries);
            tokio::time::sleep(Duration::from_millis(5 * u64::from(conflicts))).await;
        };

        self.metrics.record_critical_section(entered.elapsed().as_micros() as u64);
        result
    }
}

fn validate_request(request: &BookingRequest) -> Result<(), BookingError> {
    if request.patient_id.as_str().trim().is_empty() {
        return Err(BookingError::InvalidRequest("patient id must not be empty".to_string()));
    }
    if request.clinician_id.as_str().trim().is_empty() {
        return Err(BookingError::InvalidRequest("clinician id must not be empty".to_string()));
    }
    if let Some(notes) = &request.notes {
        if notes.chars().count() > MAX_NOTES_LENGTH {
            return Err(BookingError::InvalidRequest(format!(
                "notes must be at most {} characters",
                MAX_NOTES_LENGTH
            )));
        }
    }
    if matches!(&request.idempotency_key, Some(token) if token.trim().is_empty()) {
        return Err(BookingError::InvalidRequest("idempotency key must not be blank".to_string()));
    }
    Ok(())
}

/// An idempotency key replays only the exact booking it was first used for.
fn replay(request: &BookingRequest, token: &str, existing: &Reservation) -> Result<ConfirmedBooking, BookingError> {
    if existing.patient_id != request.patient_id || existing.slot.start_time != request.start_time {
        return Err(BookingError::IdempotencyMismatch {
            idempotency_key: token.to_string(),
            existing_serial: existing.serial_number,
        });
    }
    Ok(ConfirmedBooking::from_reservation(existing, true))
}
