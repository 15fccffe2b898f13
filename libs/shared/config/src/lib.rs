use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub booking_lock_timeout_ms: u64,
    pub booking_max_cas_retries: u32,
    pub default_day_start: String,
    pub default_day_end: String,
    pub default_slot_minutes: u32,
    pub default_slot_capacity: u32,
    pub default_excluded_days: Vec<String>,
    pub notification_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            booking_lock_timeout_ms: 2000,
            booking_max_cas_retries: 5,
            default_day_start: "09:00".to_string(),
            default_day_end: "17:00".to_string(),
            default_slot_minutes: 30,
            default_slot_capacity: 1,
            default_excluded_days: Vec::new(),
            notification_buffer: 256,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDR not set, using default");
                    defaults.bind_addr.clone()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            booking_lock_timeout_ms: parse_or("BOOKING_LOCK_TIMEOUT_MS", defaults.booking_lock_timeout_ms),
            booking_max_cas_retries: parse_or("BOOKING_MAX_CAS_RETRIES", defaults.booking_max_cas_retries),
            default_day_start: env::var("DEFAULT_DAY_START")
                .unwrap_or_else(|_| defaults.default_day_start.clone()),
            default_day_end: env::var("DEFAULT_DAY_END")
                .unwrap_or_else(|_| defaults.default_day_end.clone()),
            default_slot_minutes: parse_or("DEFAULT_SLOT_MINUTES", defaults.default_slot_minutes),
            default_slot_capacity: parse_or("DEFAULT_SLOT_CAPACITY", defaults.default_slot_capacity),
            default_excluded_days: env::var("DEFAULT_EXCLUDED_DAYS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            notification_buffer: parse_or("NOTIFICATION_BUFFER", defaults.notification_buffer),
        };

        if !config.is_persistent() {
            warn!("REDIS_URL not set - slot ledgers will be kept in memory only");
        }

        config
    }

    pub fn is_persistent(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
