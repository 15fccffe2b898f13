// Needs a live Redis: REDIS_TEST_URL=redis://localhost:6379 cargo test -- --ignored

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use booking_cell::*;
use shared_models::{ClinicianId, PatientId};
use shared_utils::test_utils::{next_wednesday, time, TestConfig};

use crate::common::{hourly_policy, test_settings, TestHarness};

async fn isolated_store() -> RedisLedgerStore {
    let config = TestConfig::with_redis().to_app_config();
    RedisLedgerStore::with_prefix(&config, format!("test_ledger_{}", Uuid::new_v4().simple()))
        .await
        .expect("Redis should be reachable at REDIS_TEST_URL")
}

#[tokio::test]
#[ignore]
async fn test_redis_compare_and_swap_round_trip() {
    let store = isolated_store().await;
    let key = LedgerKey::new(ClinicianId::new("dr:with:colons"), next_wednesday());

    assert!(store.load(&key).await.unwrap().is_none());

    let grid = hourly_policy().grid();
    let mut ledger = SlotLedger::new(key.clone(), 1, grid);
    ledger
        .try_reserve(time(9, 0), PatientId::new("alice"), None, Some("k-1".into()), Utc::now())
        .unwrap();

    assert!(store.compare_and_swap(&key, 0, &ledger).await.unwrap());
    assert!(!store.compare_and_swap(&key, 0, &ledger).await.unwrap(), "stale version must lose");

    let loaded = store.load(&key).await.unwrap().unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.ledger, ledger);

    assert_eq!(store.keys().await.unwrap(), vec![key.clone()]);
    assert_eq!(store.ledgers_for_patient(&PatientId::new("alice")).await.unwrap(), vec![key]);
    assert!(store.ledgers_for_patient(&PatientId::new("bob")).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_two_coordinators_share_one_redis_ledger() {
    let store: Arc<dyn LedgerStore> = Arc::new(isolated_store().await);

    // Separate coordinators model separate processes: no shared in-process lock
    let first = TestHarness::with_store(hourly_policy().with_capacity(2), Arc::clone(&store), test_settings());
    let mut second = TestHarness::with_store(hourly_policy().with_capacity(2), Arc::clone(&store), test_settings());
    second.clinic.clinician_id = first.clinic.clinician_id.clone();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let harness = if i % 2 == 0 { &first } else { &second };
            let coordinator = Arc::clone(&harness.state.coordinator);
            let request = harness.request(&format!("p{}", i), time(9, 0));
            tokio::spawn(async move { coordinator.book(request).await })
        })
        .collect();

    let mut serials = BTreeSet::new();
    for handle in handles {
        if let Ok(booking) = handle.await.unwrap() {
            serials.insert(booking.serial_number);
        }
    }

    assert_eq!(serials, BTreeSet::from([1, 2]));
}
