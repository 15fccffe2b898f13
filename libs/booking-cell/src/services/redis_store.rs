use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::Script;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_models::{ClinicianId, PatientId};

use crate::error::LedgerStoreError;
use crate::models::LedgerKey;
use crate::services::ledger::SlotLedger;
use crate::services::store::{LedgerStore, VersionedLedger};

const DEFAULT_PREFIX: &str = "slot_ledger";
const SCAN_BATCH: usize = 200;

// KEYS[1] ledger hash, KEYS[2..] patient index sets,
// ARGV[1] expected version, ARGV[2] next version, ARGV[3] ledger json
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then current = '0' end
if current ~= ARGV[1] then return 0 end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'data', ARGV[3])
for i = 2, #KEYS do
  redis.call('SADD', KEYS[i], KEYS[1])
end
return 1
"#;

/// Ledgers kept as Redis hashes `{prefix}:{clinician}:{date}` with fields
/// `version` and `data`. Each patient has a set `{prefix}_patients:{patient}`
/// of the ledger hashes they appear in.
pub struct RedisLedgerStore {
    pool: Pool,
    prefix: String,
    cas: Script,
}

impl RedisLedgerStore {
    pub async fn new(config: &AppConfig) -> Result<Self, LedgerStoreError> {
        Self::with_prefix(config, DEFAULT_PREFIX).await
    }

    pub async fn with_prefix(config: &AppConfig, prefix: impl Into<String>) -> Result<Self, LedgerStoreError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| LedgerStoreError::PoolError(format!("Pool creation error: {}", e)))?;

        let store = Self {
            pool,
            prefix: prefix.into(),
            cas: Script::new(CAS_SCRIPT),
        };

        // Test connection
        let mut conn = store.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis ledger store initialized with prefix '{}'", store.prefix);

        Ok(store)
    }

    fn redis_key(&self, key: &LedgerKey) -> String {
        format!("{}:{}:{}", self.prefix, key.clinician_id, key.date)
    }

    fn patient_key(&self, patient_id: &PatientId) -> String {
        format!("{}_patients:{}", self.prefix, patient_id)
    }

    fn parse_key(&self, raw: &str) -> Result<LedgerKey, LedgerStoreError> {
        let rest = raw
            .strip_prefix(&self.prefix)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| LedgerStoreError::CorruptRecord(raw.to_string()))?;

        // Clinician ids may contain ':', the date never does
        let (clinician, date) = rest
            .rsplit_once(':')
            .ok_or_else(|| LedgerStoreError::CorruptRecord(raw.to_string()))?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| LedgerStoreError::CorruptRecord(raw.to_string()))?;

        Ok(LedgerKey::new(ClinicianId::new(clinician), date))
    }

    async fn get_connection(&self) -> Result<Connection, LedgerStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| LedgerStoreError::PoolError(format!("Connection error: {}", e)))
    }
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    async fn load(&self, key: &LedgerKey) -> Result<Option<VersionedLedger>, LedgerStoreError> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.redis_key(key);

        let (version, data): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(&redis_key)
            .arg("version")
            .arg("data")
            .query_async(&mut conn)
            .await?;

        match (version, data) {
            (Some(version), Some(data)) => {
                let ledger: SlotLedger = serde_json::from_str(&data)?;
                Ok(Some(VersionedLedger { version, ledger }))
            }
            (None, None) => Ok(None),
            _ => Err(LedgerStoreError::CorruptRecord(redis_key)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &LedgerKey,
        expected_version: u64,
        ledger: &SlotLedger,
    ) -> Result<bool, LedgerStoreError> {
        let mut conn = self.get_connection().await?;
        let data = serde_json::to_string(ledger)?;

        let mut invocation = self.cas.key(self.redis_key(key));
        for patient_id in ledger.patients() {
            invocation.key(self.patient_key(&patient_id));
        }

        let swapped: i32 = invocation
            .arg(expected_version)
            .arg(expected_version + 1)
            .arg(data)
            .invoke_async(&mut conn)
            .await?;

        if swapped == 0 {
            debug!("Version conflict on ledger {} at version {}", key, expected_version);
        }
        Ok(swapped == 1)
    }

    async fn keys(&self) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}:*", self.prefix);

        let mut raw = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            raw.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut keys = raw
            .iter()
            .map(|k| self.parse_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        // SCAN may report a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ledgers_for_patient(&self, patient_id: &PatientId) -> Result<Vec<LedgerKey>, LedgerStoreError> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.patient_key(patient_id))
            .query_async(&mut conn)
            .await?;

        let mut keys = raw
            .iter()
            .map(|k| self.parse_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        keys.sort();
        Ok(keys)
    }
}
