use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{ClinicianId, PatientId};

pub struct TestConfig {
    pub lock_timeout_ms: u64,
    pub max_cas_retries: u32,
    pub slot_capacity: u32,
    pub redis_url: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 500,
            max_cas_retries: 3,
            slot_capacity: 1,
            redis_url: None,
        }
    }
}

impl TestConfig {
    pub fn with_redis() -> Self {
        Self {
            redis_url: Some(
                std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            ),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            redis_url: self.redis_url.clone(),
            booking_lock_timeout_ms: self.lock_timeout_ms,
            booking_max_cas_retries: self.max_cas_retries,
            default_slot_capacity: self.slot_capacity,
            ..AppConfig::default()
        }
    }
}

/// Fresh identifiers per test so shared stores never collide.
pub struct TestClinic {
    pub clinician_id: ClinicianId,
}

impl Default for TestClinic {
    fn default() -> Self {
        Self {
            clinician_id: ClinicianId::new(format!("dr-{}", Uuid::new_v4())),
        }
    }
}

impl TestClinic {
    pub fn patient(&self, label: &str) -> PatientId {
        PatientId::new(format!("{}-{}", label, Uuid::new_v4()))
    }

    pub fn patients(&self, count: usize) -> Vec<PatientId> {
        (0..count).map(|i| self.patient(&format!("p{}", i))).collect()
    }
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid test time")
}

/// Next Wednesday strictly after today, so default weekday exclusions never apply.
pub fn next_wednesday() -> NaiveDate {
    let mut date = Utc::now().date_naive() + Duration::days(1);
    while date.weekday() != Weekday::Wed {
        date += Duration::days(1);
    }
    date
}
