use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use shared_models::{AppError, ClinicianId};

use crate::models::{hhmm, PolicyResponse, SlotsQuery, WorkingHoursPolicy};
use crate::services::{calendar::enumerate_slots, policy::PolicyRegistry};

/// Effective working hours for a clinician
pub async fn get_working_hours(
    State(registry): State<Arc<PolicyRegistry>>,
    Path(clinician_id): Path<String>,
) -> Result<Json<PolicyResponse>, AppError> {
    let clinician_id = ClinicianId::new(clinician_id);
    let policy = registry.policy_for(&clinician_id).await;

    Ok(Json(PolicyResponse {
        is_default: !registry.has_custom_policy(&clinician_id).await,
        slots_per_day: policy.slots_per_day(),
        clinician_id: clinician_id.to_string(),
        policy: policy.as_ref().clone(),
    }))
}

/// Replace a clinician's working hours. Applies to subsequent queries only.
pub async fn set_working_hours(
    State(registry): State<Arc<PolicyRegistry>>,
    Path(clinician_id): Path<String>,
    Json(policy): Json<WorkingHoursPolicy>,
) -> Result<Json<PolicyResponse>, AppError> {
    info!("Working hours update for clinician {}", clinician_id);

    let clinician_id = ClinicianId::new(clinician_id);
    let policy = registry.set_policy(clinician_id.clone(), policy).await?;

    Ok(Json(PolicyResponse {
        clinician_id: clinician_id.to_string(),
        is_default: false,
        slots_per_day: policy.slots_per_day(),
        policy: policy.as_ref().clone(),
    }))
}

/// Revert a clinician to the clinic default
pub async fn clear_working_hours(
    State(registry): State<Arc<PolicyRegistry>>,
    Path(clinician_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let clinician_id = ClinicianId::new(clinician_id);

    if !registry.clear_policy(&clinician_id).await {
        return Err(AppError::NotFound(format!(
            "Clinician {} has no custom working hours",
            clinician_id
        )));
    }

    Ok(Json(json!({
        "success": true,
        "clinician_id": clinician_id,
        "message": "Working hours reverted to clinic default"
    })))
}

/// Candidate slot grid for a date, ignoring bookings
pub async fn get_candidate_slots(
    State(registry): State<Arc<PolicyRegistry>>,
    Path(clinician_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let clinician_id = ClinicianId::new(clinician_id);
    let policy = registry.policy_for(&clinician_id).await;
    let slots = enumerate_slots(&policy, query.date)?;

    Ok(Json(json!({
        "clinician_id": clinician_id,
        "date": query.date,
        "slot_minutes": policy.slot_minutes,
        "slots": slots.iter().map(hhmm::format).collect::<Vec<_>>()
    })))
}
