use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_models::ClinicianId;

use crate::error::CalendarError;
use crate::models::WorkingHoursPolicy;

/// Per-clinician working hours with a clinic-wide fallback.
///
/// Policies are handed out as `Arc` snapshots. Replacing a clinician's policy
/// only affects lookups made afterwards.
#[derive(Debug)]
pub struct PolicyRegistry {
    default_policy: Arc<WorkingHoursPolicy>,
    policies: RwLock<HashMap<ClinicianId, Arc<WorkingHoursPolicy>>>,
}

impl PolicyRegistry {
    pub fn new(default_policy: WorkingHoursPolicy) -> Result<Self, CalendarError> {
        default_policy.validate()?;

        Ok(Self {
            default_policy: Arc::new(default_policy),
            policies: RwLock::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, CalendarError> {
        let policy = WorkingHoursPolicy::from_config(config)?;
        info!(
            "Default working hours {}-{} in {}-minute slots (capacity {})",
            policy.start_time, policy.end_time, policy.slot_minutes, policy.capacity_per_slot
        );
        Self::new(policy)
    }

    pub fn default_policy(&self) -> Arc<WorkingHoursPolicy> {
        Arc::clone(&self.default_policy)
    }

    pub async fn policy_for(&self, clinician_id: &ClinicianId) -> Arc<WorkingHoursPolicy> {
        let policies = self.policies.read().await;
        policies
            .get(clinician_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_policy))
    }

    pub async fn has_custom_policy(&self, clinician_id: &ClinicianId) -> bool {
        self.policies.read().await.contains_key(clinician_id)
    }

    pub async fn set_policy(
        &self,
        clinician_id: ClinicianId,
        policy: WorkingHoursPolicy,
    ) -> Result<Arc<WorkingHoursPolicy>, CalendarError> {
        policy.validate()?;

        let policy = Arc::new(policy);
        let mut policies = self.policies.write().await;
        policies.insert(clinician_id.clone(), Arc::clone(&policy));

        debug!("Working hours updated for clinician {}", clinician_id);
        Ok(policy)
    }

    /// Drops a clinician's own policy. Returns whether one existed.
    pub async fn clear_policy(&self, clinician_id: &ClinicianId) -> bool {
        let mut policies = self.policies.write().await;
        let removed = policies.remove(clinician_id).is_some();

        if removed {
            debug!("Clinician {} reverted to default working hours", clinician_id);
        }
        removed
    }
}
