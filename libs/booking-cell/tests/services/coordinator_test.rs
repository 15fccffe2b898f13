use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio_test::{assert_err, assert_ok};

use booking_cell::*;
use shared_utils::test_utils::{next_wednesday, time};

use crate::common::{hourly_policy, test_settings, ContendedStore, SlowStore, TestHarness};

#[tokio::test]
async fn test_hourly_day_assigns_serials_and_blocks_taken_slot() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;

    let first = assert_ok!(coordinator.book(harness.request("alice", time(14, 0))).await);
    assert_eq!(first.serial_number, 1);
    assert!(!first.replayed);
    assert_eq!(first.slot.duration_minutes, 60);

    let entries = harness
        .state
        .availability
        .availability(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    assert_eq!(entries.len(), 8);
    for entry in &entries {
        assert_eq!(entry.is_available, entry.start_time != time(14, 0), "slot {}", entry.start_time);
    }

    let second = coordinator.book(harness.request("bob", time(14, 0))).await;
    assert_matches!(second, Err(BookingError::SlotUnavailable { slot }) if slot.time == time(14, 0));

    let third = coordinator.book(harness.request("bob", time(10, 0))).await.unwrap();
    assert_eq!(third.serial_number, 2, "rejected attempt must not consume a serial");
}

#[tokio::test]
async fn test_off_grid_and_out_of_hours_times_are_invalid_slots() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;

    for at in [time(14, 30), time(17, 0), time(8, 0)] {
        let result = coordinator.book(harness.request("alice", at)).await;
        assert_matches!(result, Err(BookingError::InvalidSlot { .. }), "time {}", at);
    }

    let queue = coordinator
        .day_queue(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    assert!(queue.is_empty(), "invalid slots must never create a ledger entry");
}

#[tokio::test]
async fn test_excluded_date_has_no_bookable_slots() {
    let policy = hourly_policy().excluding_dates([next_wednesday()]);
    let harness = TestHarness::new(policy);

    let entries = harness
        .state
        .availability
        .availability(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    assert!(entries.is_empty());

    let result = harness.state.coordinator.book(harness.request("alice", time(9, 0))).await;
    assert_matches!(result, Err(BookingError::InvalidSlot { .. }));
}

#[tokio::test]
async fn test_invalid_request_fields_are_rejected() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;

    let long_notes = harness.request("alice", time(9, 0)).with_notes("x".repeat(501));
    assert_matches!(coordinator.book(long_notes).await, Err(BookingError::InvalidRequest(_)));

    let mut anonymous = harness.request("alice", time(9, 0));
    anonymous.patient_id = shared_models::PatientId::new("  ");
    assert_matches!(coordinator.book(anonymous).await, Err(BookingError::InvalidRequest(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_capacity() {
    let harness = TestHarness::new(hourly_policy().with_capacity(3));
    let patients = harness.clinic.patients(20);

    let handles: Vec<_> = patients
        .into_iter()
        .map(|patient| {
            let coordinator = Arc::clone(&harness.state.coordinator);
            let request = BookingRequest::new(harness.clinic.clinician_id.clone(), patient, next_wednesday(), time(11, 0));
            tokio::spawn(async move { coordinator.book(request).await })
        })
        .collect();

    let mut serials = BTreeSet::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(booking) => {
                serials.insert(booking.serial_number);
            }
            Err(BookingError::SlotUnavailable { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(serials, BTreeSet::from([1, 2, 3]));
    assert_eq!(conflicts, 17);

    let stats = harness.state.metrics.snapshot();
    assert_eq!(stats.attempts, 20);
    assert_eq!(stats.confirmed, 3);
    assert_eq!(stats.conflicts, 17);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serials_are_contiguous_across_slots_under_contention() {
    let harness = TestHarness::new(hourly_policy().with_capacity(2));

    // 8 slots x capacity 2 = 16 seats for 24 callers
    let handles: Vec<_> = (0..24)
        .map(|i| {
            let coordinator = Arc::clone(&harness.state.coordinator);
            let request = harness.request(&format!("p{}", i), time(9 + (i % 8) as u32, 0));
            tokio::spawn(async move { coordinator.book(request).await })
        })
        .collect();

    let mut serials = Vec::new();
    for handle in handles {
        if let Ok(booking) = handle.await.unwrap() {
            serials.push(booking.serial_number);
        }
    }
    serials.sort_unstable();

    assert_eq!(serials, (1..=16).collect::<Vec<u32>>());

    let queue = harness
        .state
        .coordinator
        .day_queue(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    let queued: Vec<u32> = queue.iter().map(|r| r.serial_number).collect();
    assert_eq!(queued, serials, "queue is ordered by serial");
}

#[tokio::test]
async fn test_idempotent_retry_returns_same_serial() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let request = harness
        .request("alice", time(9, 0))
        .with_notes("first visit")
        .with_idempotency_key("attempt-1");

    let first = coordinator.book(request.clone()).await.unwrap();
    let retry = coordinator.book(request).await.unwrap();

    assert_eq!(first.serial_number, retry.serial_number);
    assert!(!first.replayed);
    assert!(retry.replayed);

    let queue = coordinator
        .day_queue(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(harness.state.metrics.snapshot().replayed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_with_one_key_create_one_reservation() {
    let harness = TestHarness::new(hourly_policy().with_capacity(5));
    let request = harness.request("alice", time(15, 0)).with_idempotency_key("double-click");

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&harness.state.coordinator);
            let request = request.clone();
            tokio::spawn(async move { coordinator.book(request).await })
        })
        .collect();

    let mut serials = BTreeSet::new();
    for handle in handles {
        serials.insert(handle.await.unwrap().unwrap().serial_number);
    }
    assert_eq!(serials, BTreeSet::from([1]));

    let entries = harness
        .state
        .availability
        .availability(&harness.clinic.clinician_id, next_wednesday())
        .await
        .unwrap();
    let slot = entries.iter().find(|e| e.start_time == time(15, 0)).unwrap();
    assert_eq!(slot.occupancy, 1);
}

#[tokio::test]
async fn test_idempotency_key_reused_for_different_booking_is_rejected() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;

    let original = coordinator
        .book(harness.request("alice", time(9, 0)).with_idempotency_key("k-1"))
        .await
        .unwrap();

    let other_slot = coordinator
        .book(harness.request("alice", time(10, 0)).with_idempotency_key("k-1"))
        .await;
    assert_matches!(
        other_slot,
        Err(BookingError::IdempotencyMismatch { existing_serial, .. }) if existing_serial == original.serial_number
    );
}

#[tokio::test]
async fn test_idempotent_retry_survives_working_hours_change() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let request = harness.request("alice", time(14, 0)).with_idempotency_key("t1");

    let first = coordinator.book(request.clone()).await.unwrap();
    harness
        .policies
        .set_policy(
            harness.clinic.clinician_id.clone(),
            scheduling_cell::WorkingHoursPolicy::new(time(9, 0), time(12, 0), 60),
        )
        .await
        .unwrap();

    let retry = assert_ok!(coordinator.book(request).await);
    assert_eq!(retry.serial_number, first.serial_number);
    assert!(retry.replayed);
    assert_eq!(retry.slot.start_time, time(14, 0));
}

#[tokio::test]
async fn test_replaying_a_cancelled_reservation_reports_its_status() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let mut events = harness.state.notifier.subscribe();
    let request = harness.request("alice", time(10, 0)).with_idempotency_key("t2");

    let booked = coordinator.book(request.clone()).await.unwrap();
    assert_eq!(booked.status, ReservationStatus::Confirmed);
    coordinator
        .cancel(&harness.clinic.clinician_id, next_wednesday(), booked.serial_number)
        .await
        .unwrap();

    let retry = coordinator.book(request).await.unwrap();
    assert_eq!(retry.serial_number, booked.serial_number);
    assert!(retry.replayed);
    assert_eq!(retry.status, ReservationStatus::Cancelled);
    assert!(!retry.is_confirmed());

    let mut kinds = Vec::new();
    while let Ok(outcome) = events.try_recv() {
        kinds.push(outcome.kind());
    }
    assert_eq!(kinds, vec!["confirmed", "cancelled"], "a cancelled replay must not announce a confirmation");
}

#[tokio::test]
async fn test_existing_ledger_keeps_its_slot_grid() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let clinician = harness.clinic.clinician_id.clone();

    let alice = coordinator.book(harness.request("alice", time(14, 0))).await.unwrap();
    harness
        .policies
        .set_policy(clinician.clone(), scheduling_cell::WorkingHoursPolicy::new(time(9, 0), time(17, 0), 30))
        .await
        .unwrap();

    let overlapping = coordinator.book(harness.request("bob", time(14, 30))).await;
    assert_matches!(overlapping, Err(BookingError::InvalidSlot { slot }) if slot.time == time(14, 30));

    let bob = coordinator.book(harness.request("bob", time(15, 0))).await.unwrap();
    assert_eq!(alice.slot.duration_minutes, 60);
    assert_eq!(bob.slot.duration_minutes, 60);

    let entries = harness.state.availability.availability(&clinician, next_wednesday()).await.unwrap();
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.start_time.format("%M").to_string() == "00"));

    // A day without a ledger follows the new policy
    let next_week = next_wednesday() + chrono::Duration::days(7);
    let entries = harness.state.availability.availability(&clinician, next_week).await.unwrap();
    assert_eq!(entries.len(), 16);
    let request = BookingRequest::new(clinician, harness.clinic.patient("carol"), next_week, time(14, 30));
    let carol = coordinator.book(request).await.unwrap();
    assert_eq!(carol.slot.duration_minutes, 30);
}

#[tokio::test]
async fn test_cancel_frees_capacity_without_reusing_serial() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let clinician = &harness.clinic.clinician_id;

    let booked = coordinator.book(harness.request("alice", time(13, 0))).await.unwrap();
    let cancelled = coordinator.cancel(clinician, next_wednesday(), booked.serial_number).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let rebooked = coordinator.book(harness.request("bob", time(13, 0))).await.unwrap();
    assert_eq!(rebooked.serial_number, 2);

    let again = coordinator.cancel(clinician, next_wednesday(), booked.serial_number).await;
    assert_matches!(again, Err(BookingError::NotFound { serial_number: 1, .. }));

    let queue = coordinator.day_queue(clinician, next_wednesday()).await.unwrap();
    let statuses: Vec<_> = queue.iter().map(|r| (r.serial_number, r.status)).collect();
    assert_eq!(
        statuses,
        vec![(1, ReservationStatus::Cancelled), (2, ReservationStatus::Confirmed)]
    );
}

#[tokio::test]
async fn test_cancel_on_unknown_ledger_is_not_found() {
    let harness = TestHarness::new(hourly_policy());
    let result = harness
        .state
        .coordinator
        .cancel(&harness.clinic.clinician_id, next_wednesday(), 1)
        .await;

    assert_err!(&result);
    assert_matches!(result, Err(BookingError::NotFound { .. }));

    let keys = harness.state.coordinator.store().keys().await.unwrap();
    assert!(keys.is_empty(), "a failed cancel must not create a ledger");
}

#[tokio::test]
async fn test_lock_wait_is_bounded() {
    let store = Arc::new(SlowStore {
        inner: InMemoryLedgerStore::new(),
        delay: Duration::from_millis(400),
    });
    let settings = CoordinatorSettings {
        lock_timeout: Duration::from_millis(50),
        ..test_settings()
    };
    let harness = TestHarness::with_store(hourly_policy(), store, settings);

    let holder = {
        let coordinator = Arc::clone(&harness.state.coordinator);
        let request = harness.request("alice", time(9, 0));
        tokio::spawn(async move { coordinator.book(request).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiter = harness.state.coordinator.book(harness.request("bob", time(10, 0))).await;
    let err = waiter.unwrap_err();
    assert_matches!(err, BookingError::Timeout { .. });
    assert!(err.is_retryable());

    assert_ok!(holder.await.unwrap());
    assert_eq!(harness.state.metrics.snapshot().timeouts, 1);
}

#[tokio::test]
async fn test_lost_version_races_end_in_timeout() {
    let settings = test_settings();
    let harness = TestHarness::with_store(hourly_policy(), Arc::new(ContendedStore), settings);

    let result = harness.state.coordinator.book(harness.request("alice", time(9, 0))).await;
    assert_matches!(result, Err(BookingError::Timeout { .. }));

    let stats = harness.state.metrics.snapshot();
    assert_eq!(stats.cas_retries, u64::from(settings.max_cas_retries) + 1);
    assert_eq!(stats.confirmed, 0);
}

#[tokio::test]
async fn test_ledger_keeps_capacity_it_was_created_with() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let clinician = harness.clinic.clinician_id.clone();

    coordinator.book(harness.request("alice", time(9, 0))).await.unwrap();
    harness
        .policies
        .set_policy(clinician.clone(), hourly_policy().with_capacity(2))
        .await
        .unwrap();

    let result = coordinator.book(harness.request("bob", time(9, 0))).await;
    assert_matches!(result, Err(BookingError::SlotUnavailable { .. }));

    let entries = harness.state.availability.availability(&clinician, next_wednesday()).await.unwrap();
    assert!(entries.iter().all(|e| e.capacity == 1));
}

#[tokio::test]
async fn test_patient_reservations_latest_first() {
    let harness = TestHarness::new(hourly_policy());
    let coordinator = &harness.state.coordinator;
    let patient = harness.clinic.patient("carol");
    let day = next_wednesday();
    let next_week = day + chrono::Duration::days(7);

    for (date, at) in [(day, time(9, 0)), (next_week, time(11, 0)), (day, time(15, 0))] {
        let request = BookingRequest::new(harness.clinic.clinician_id.clone(), patient.clone(), date, at);
        coordinator.book(request).await.unwrap();
    }
    coordinator.book(harness.request("someone-else", time(10, 0))).await.unwrap();

    let history = coordinator.patient_reservations(&patient).await.unwrap();
    let order: Vec<_> = history.iter().map(|r| (r.slot.date, r.slot.start_time)).collect();
    assert_eq!(order, vec![(next_week, time(11, 0)), (day, time(15, 0)), (day, time(9, 0))]);
}
