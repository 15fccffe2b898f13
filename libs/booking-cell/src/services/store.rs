use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use shared_models::PatientId;

use crate::error::LedgerStoreError;
use crate::models::LedgerKey;
use crate::services::ledger::SlotLedger;

/// A ledger together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedLedger {
    pub version: u64,
    pub ledger: SlotLedger,
}

/// Durable home of every `SlotLedger`.
///
/// Writes go through `compare_and_swap` only. A key that has never been
/// written is at version 0, so creating a ledger is a swap against 0.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self, key: &LedgerKey) -> Result<Option<VersionedLedger>, LedgerStoreError>;

    /// Stores `ledger` at `expected_version + 1` if the current version is
    /// still `expected_version`. Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &LedgerKey,
        expected_version: u64,
        ledger: &SlotLedger,
    ) -> Result<bool, LedgerStoreError>;

    async fn keys(&self) -> Result<Vec<LedgerKey>, LedgerStoreError>;

    /// Ledgers in which the patient has ever held a reservation. Maintained
    /// on every successful swap.
    async fn ledgers_for_patient(&self, patient_id: &PatientId) -> Result<Vec<LedgerKey>, LedgerStoreError>;
}

#[derive(Default)]
struct Ledgers {
    by_key: HashMap<LedgerKey, VersionedLedger>,
    by_patient: HashMap<PatientId, BTreeSet<LedgerKey>>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    ledgers: RwLock<Ledgers>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self, key: &LedgerKey) -> Result<Option<VersionedLedger>, LedgerStoreError> {
        Ok(self.ledgers.read().await.by_key.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &LedgerKey,
        expected_version: u64,
        ledger: &SlotLedger,
    ) -> Result<bool, LedgerStoreError> {
        let mut ledgers = self.ledgers.write().await;
        let current = ledgers.by_key.get(key).map(|v| v.version).unwrap_or(0);

        if current != expected_version {
            debug!("Version conflict on ledger {}: expected {}, found {}", key, expected_version, current);
            return Ok(false);
        }

        for patient_id in ledger.patients() {
            ledgers.by_patient.entry(patient_id).or_default().insert(key.clone());
        }
        ledgers.by_key.insert(
            key.clone(),
            VersionedLedger {
                version: expected_version + 1,
                ledger: ledger.clone(),
            },
        );
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        let mut keys: Vec<LedgerKey> = self.ledgers.read().await.by_key.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn ledgers_for_patient(&self, patient_id: &PatientId) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        Ok(self
            .ledgers
            .read()
            .await
            .by_patient
            .get(patient_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}
