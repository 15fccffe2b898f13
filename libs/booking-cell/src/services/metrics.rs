// =====================================================================================
// BOOKING METRICS
// =====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::BookingError;

/// Point-in-time counters for the booking path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingStats {
    pub attempts: u64,
    pub confirmed: u64,
    pub replayed: u64,
    pub conflicts: u64,
    pub invalid: u64,
    pub timeouts: u64,
    pub store_errors: u64,
    pub cancellations: u64,
    pub cas_retries: u64,
    pub conflict_rate_percentage: f64,
    pub average_critical_section_ms: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug)]
pub struct BookingMetrics {
    attempts: AtomicU64,
    confirmed: AtomicU64,
    replayed: AtomicU64,
    conflicts: AtomicU64,
    invalid: AtomicU64,
    timeouts: AtomicU64,
    store_errors: AtomicU64,
    cancellations: AtomicU64,
    cas_retries: AtomicU64,
    critical_section_us: AtomicU64,
    critical_sections: AtomicU64,
    start_time: Instant,
}

impl Default for BookingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingMetrics {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            cas_retries: AtomicU64::new(0),
            critical_section_us: AtomicU64::new(0),
            critical_sections: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self, replayed: bool) {
        if replayed {
            self.replayed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.confirmed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_critical_section(&self, elapsed_us: u64) {
        self.critical_section_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.critical_sections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &BookingError) {
        let counter = match err {
            BookingError::SlotUnavailable { .. } => &self.conflicts,
            BookingError::Timeout { .. } => &self.timeouts,
            BookingError::Store(_) => &self.store_errors,
            BookingError::NotFound { .. } => return,
            _ => &self.invalid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BookingStats {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let conflicts = self.conflicts.load(Ordering::Relaxed);
        let sections = self.critical_sections.load(Ordering::Relaxed);

        let conflict_rate_percentage = if attempts > 0 {
            (conflicts as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        let average_critical_section_ms = if sections > 0 {
            self.critical_section_us.load(Ordering::Relaxed) as f64 / sections as f64 / 1000.0
        } else {
            0.0
        };

        BookingStats {
            attempts,
            confirmed: self.confirmed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            conflicts,
            invalid: self.invalid.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            conflict_rate_percentage,
            average_critical_section_ms,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
