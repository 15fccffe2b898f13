use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use scheduling_cell::DayGrid;
use shared_models::PatientId;

use crate::error::BookingError;
use crate::models::{LedgerKey, Reservation, ReservationStatus, Slot, SlotRef};

/// Reservation record for one clinician on one date.
///
/// `reservations` holds confirmed entries only, so no start time ever lists
/// more than `capacity_per_slot` of them. Cancelled entries move to
/// `cancelled` and keep their serial numbers.
///
/// The ledger assumes a single writer. Callers serialize `try_reserve` and
/// `cancel` per key; the ledger itself never locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLedger {
    key: LedgerKey,
    capacity_per_slot: u32,
    grid: DayGrid,
    reservations: BTreeMap<NaiveTime, Vec<Reservation>>,
    cancelled: Vec<Reservation>,
    next_serial: u32,
    idempotency_keys: HashMap<String, u32>,
}

/// Occupancy of a single start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOccupancy {
    pub confirmed: u32,
    pub cancelled: u32,
}

/// Read-only view handed to the availability path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub key: LedgerKey,
    pub capacity_per_slot: u32,
    pub grid: DayGrid,
    pub next_serial: u32,
    pub slots: BTreeMap<NaiveTime, SlotOccupancy>,
}

impl LedgerSnapshot {
    /// Confirmed reservations at `start_time`.
    pub fn occupancy(&self, start_time: &NaiveTime) -> u32 {
        self.slots.get(start_time).map(|o| o.confirmed).unwrap_or(0)
    }

    pub fn is_available(&self, start_time: &NaiveTime) -> bool {
        self.occupancy(start_time) < self.capacity_per_slot
    }
}

impl SlotLedger {
    pub fn new(key: LedgerKey, capacity_per_slot: u32, grid: DayGrid) -> Self {
        Self {
            key,
            capacity_per_slot: capacity_per_slot.max(1),
            grid,
            reservations: BTreeMap::new(),
            cancelled: Vec::new(),
            next_serial: 1,
            idempotency_keys: HashMap::new(),
        }
    }

    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    pub fn capacity_per_slot(&self) -> u32 {
        self.capacity_per_slot
    }

    pub fn grid(&self) -> DayGrid {
        self.grid
    }

    pub fn next_serial(&self) -> u32 {
        self.next_serial
    }

    pub fn occupancy(&self, start_time: &NaiveTime) -> u32 {
        self.reservations_at(start_time).len() as u32
    }

    /// Confirmed reservations at `start_time`, in booking order.
    pub fn reservations_at(&self, start_time: &NaiveTime) -> &[Reservation] {
        self.reservations
            .get(start_time)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Commits a reservation if `start_time` is on the ledger's grid and has
    /// spare capacity.
    ///
    /// Serial numbers are taken from `next_serial`, which only ever grows.
    pub fn try_reserve(
        &mut self,
        start_time: NaiveTime,
        patient_id: PatientId,
        notes: Option<String>,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BookingError> {
        if !self.grid.contains(start_time) {
            return Err(BookingError::InvalidSlot {
                slot: SlotRef::new(&self.key, start_time),
            });
        }

        if self.occupancy(&start_time) >= self.capacity_per_slot {
            return Err(BookingError::SlotUnavailable {
                slot: SlotRef::new(&self.key, start_time),
            });
        }

        let reservation = Reservation {
            serial_number: self.next_serial,
            patient_id,
            slot: Slot {
                clinician_id: self.key.clinician_id.clone(),
                date: self.key.date,
                start_time,
                duration_minutes: self.grid.slot_minutes,
            },
            notes,
            status: ReservationStatus::Confirmed,
            created_at: now,
            cancelled_at: None,
            idempotency_key: idempotency_key.clone(),
        };

        self.next_serial += 1;
        if let Some(token) = idempotency_key {
            self.idempotency_keys.insert(token, reservation.serial_number);
        }
        self.reservations
            .entry(start_time)
            .or_default()
            .push(reservation.clone());

        Ok(reservation)
    }

    /// Marks a confirmed reservation cancelled. Frees its capacity unit; the
    /// serial number is never handed out again.
    pub fn cancel(&mut self, serial_number: u32, now: DateTime<Utc>) -> Result<Reservation, BookingError> {
        let position = self.reservations.iter().find_map(|(start_time, list)| {
            list.iter()
                .position(|r| r.serial_number == serial_number)
                .map(|index| (*start_time, index))
        });

        let (start_time, index) = position.ok_or_else(|| BookingError::NotFound {
            key: self.key.clone(),
            serial_number,
        })?;

        let list = self.reservations.entry(start_time).or_default();
        let mut reservation = list.remove(index);
        if list.is_empty() {
            self.reservations.remove(&start_time);
        }

        reservation.status = ReservationStatus::Cancelled;
        reservation.cancelled_at = Some(now);
        self.cancelled.push(reservation.clone());
        Ok(reservation)
    }

    pub fn find(&self, serial_number: u32) -> Option<&Reservation> {
        self.reservations
            .values()
            .flatten()
            .chain(self.cancelled.iter())
            .find(|r| r.serial_number == serial_number)
    }

    pub fn find_by_idempotency_key(&self, token: &str) -> Option<&Reservation> {
        self.idempotency_keys
            .get(token)
            .and_then(|serial| self.find(*serial))
    }

    /// Every reservation, confirmed or cancelled, in serial order.
    pub fn reservations_by_serial(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self
            .reservations
            .values()
            .flatten()
            .chain(self.cancelled.iter())
            .cloned()
            .collect();
        all.sort_by_key(|r| r.serial_number);
        all
    }

    /// Patients holding or having held a reservation in this ledger.
    pub fn patients(&self) -> BTreeSet<PatientId> {
        self.reservations
            .values()
            .flatten()
            .chain(self.cancelled.iter())
            .map(|r| r.patient_id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut slots: BTreeMap<NaiveTime, SlotOccupancy> = self
            .reservations
            .iter()
            .map(|(start_time, list)| {
                let occupancy = SlotOccupancy {
                    confirmed: list.len() as u32,
                    cancelled: 0,
                };
                (*start_time, occupancy)
            })
            .collect();

        for reservation in &self.cancelled {
            slots
                .entry(reservation.slot.start_time)
                .or_insert(SlotOccupancy { confirmed: 0, cancelled: 0 })
                .cancelled += 1;
        }

        LedgerSnapshot {
            key: self.key.clone(),
            capacity_per_slot: self.capacity_per_slot,
            grid: self.grid,
            next_serial: self.next_serial,
            slots,
        }
    }
}
