use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use scheduling_cell::{enumerate_slots, PolicyRegistry};
use shared_models::ClinicianId;

use crate::error::BookingError;
use crate::models::{AvailabilityEntry, LedgerKey};
use crate::services::store::LedgerStore;

/// Read side of the booking engine. Never takes a ledger lock and never writes.
pub struct AvailabilityService {
    store: Arc<dyn LedgerStore>,
    policies: Arc<PolicyRegistry>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn LedgerStore>, policies: Arc<PolicyRegistry>) -> Self {
        Self { store, policies }
    }

    /// Every enumerated slot for the date with its current occupancy.
    ///
    /// Reads the committed ledger, so a booking that has already returned is
    /// always reflected. Once a ledger exists its grid and capacity are used
    /// in place of the clinician's current policy.
    pub async fn availability(
        &self,
        clinician_id: &ClinicianId,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityEntry>, BookingError> {
        let key = LedgerKey::new(clinician_id.clone(), date);
        let snapshot = self.store.load(&key).await?.map(|v| v.ledger.snapshot());

        let (slots, capacity) = match &snapshot {
            Some(snapshot) => (snapshot.grid.slots(), snapshot.capacity_per_slot),
            None => {
                let policy = self.policies.policy_for(clinician_id).await;
                let slots =
                    enumerate_slots(&policy, date).map_err(|e| BookingError::from_calendar(clinician_id, e))?;
                (slots, policy.capacity_per_slot)
            }
        };

        if slots.is_empty() {
            debug!("Clinician {} has no slots on {}", clinician_id, date);
            return Ok(Vec::new());
        }

        let entries = slots
            .into_iter()
            .map(|start_time| {
                let occupancy = snapshot.as_ref().map(|s| s.occupancy(&start_time)).unwrap_or(0);
                AvailabilityEntry {
                    start_time,
                    is_available: occupancy < capacity,
                    occupancy,
                    capacity,
                }
            })
            .collect();

        Ok(entries)
    }

    /// Start times still open, in order.
    pub async fn open_slots(
        &self,
        clinician_id: &ClinicianId,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityEntry>, BookingError> {
        Ok(self
            .availability(clinician_id, date)
            .await?
            .into_iter()
            .filter(|entry| entry.is_available)
            .collect())
    }
}
