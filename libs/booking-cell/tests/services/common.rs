use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;

use booking_cell::{
    BookingRequest, BookingState, CoordinatorSettings, InMemoryLedgerStore, LedgerKey, LedgerStore,
    LedgerStoreError, SlotLedger, VersionedLedger,
};
use scheduling_cell::{PolicyRegistry, WorkingHoursPolicy};
use shared_models::PatientId;
use shared_utils::test_utils::{next_wednesday, time, TestClinic, TestConfig};

/// 09:00-17:00 in hourly slots, one patient per slot.
pub fn hourly_policy() -> WorkingHoursPolicy {
    WorkingHoursPolicy::new(time(9, 0), time(17, 0), 60)
}

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings::from_config(&TestConfig::default().to_app_config())
}

pub struct TestHarness {
    pub state: BookingState,
    pub policies: Arc<PolicyRegistry>,
    pub clinic: TestClinic,
}

impl TestHarness {
    pub fn new(policy: WorkingHoursPolicy) -> Self {
        Self::with_store(policy, Arc::new(InMemoryLedgerStore::new()), test_settings())
    }

    pub fn with_store(policy: WorkingHoursPolicy, store: Arc<dyn LedgerStore>, settings: CoordinatorSettings) -> Self {
        let policies = Arc::new(PolicyRegistry::new(policy).expect("valid test policy"));
        let state = BookingState::new(store, Arc::clone(&policies), settings, 64);

        Self {
            state,
            policies,
            clinic: TestClinic::default(),
        }
    }

    pub fn request(&self, patient: &str, at: NaiveTime) -> BookingRequest {
        BookingRequest::new(
            self.clinic.clinician_id.clone(),
            self.clinic.patient(patient),
            next_wednesday(),
            at,
        )
    }
}

/// Delays every load, holding the caller inside the critical section.
pub struct SlowStore {
    pub inner: InMemoryLedgerStore,
    pub delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowStore {
    async fn load(&self, key: &LedgerKey) -> Result<Option<VersionedLedger>, LedgerStoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.load(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &LedgerKey,
        expected_version: u64,
        ledger: &SlotLedger,
    ) -> Result<bool, LedgerStoreError> {
        self.inner.compare_and_swap(key, expected_version, ledger).await
    }

    async fn keys(&self) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        self.inner.keys().await
    }

    async fn ledgers_for_patient(&self, patient_id: &PatientId) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        self.inner.ledgers_for_patient(patient_id).await
    }
}

/// Simulates another process winning every write.
#[derive(Default)]
pub struct ContendedStore;

#[async_trait]
impl LedgerStore for ContendedStore {
    async fn load(&self, _key: &LedgerKey) -> Result<Option<VersionedLedger>, LedgerStoreError> {
        Ok(None)
    }

    async fn compare_and_swap(
        &self,
        _key: &LedgerKey,
        _expected_version: u64,
        _ledger: &SlotLedger,
    ) -> Result<bool, LedgerStoreError> {
        Ok(false)
    }

    async fn keys(&self) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        Ok(Vec::new())
    }

    async fn ledgers_for_patient(&self, _patient_id: &PatientId) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        Ok(Vec::new())
    }
}
