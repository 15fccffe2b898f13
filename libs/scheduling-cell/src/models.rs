use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use shared_config::AppConfig;

use crate::error::CalendarError;

// ==============================================================================
// WORKING HOURS POLICY
// ==============================================================================

/// Working window of a clinician (or the clinic-wide default) for one day.
///
/// A policy is treated as a value: the registry swaps whole policies, so a
/// booking cycle that already holds one keeps seeing the same hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHoursPolicy {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
    #[serde(default = "default_capacity")]
    pub capacity_per_slot: u32,
    #[serde(default)]
    pub excluded_days: Vec<Weekday>,
    /// One-off closures such as leave or public holidays.
    #[serde(default)]
    pub excluded_dates: Vec<NaiveDate>,
}

fn default_capacity() -> u32 {
    1
}

impl WorkingHoursPolicy {
    pub fn new(start_time: NaiveTime, end_time: NaiveTime, slot_minutes: u32) -> Self {
        Self {
            start_time,
            end_time,
            slot_minutes,
            capacity_per_slot: default_capacity(),
            excluded_days: Vec::new(),
            excluded_dates: Vec::new(),
        }
    }

    pub fn with_capacity(mut self, capacity_per_slot: u32) -> Self {
        self.capacity_per_slot = capacity_per_slot;
        self
    }

    pub fn excluding_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.excluded_days.extend(days);
        self
    }

    pub fn excluding_dates(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.excluded_dates.extend(dates);
        self
    }

    /// Builds the clinic-wide default from the raw environment values.
    pub fn from_config(config: &AppConfig) -> Result<Self, CalendarError> {
        let start_time = hhmm::parse(&config.default_day_start)?;
        let end_time = hhmm::parse(&config.default_day_end)?;

        let excluded_days = config
            .default_excluded_days
            .iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| CalendarError::invalid_policy(format!("unknown weekday '{}'", day)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let policy = Self::new(start_time, end_time, config.default_slot_minutes)
            .with_capacity(config.default_slot_capacity)
            .excluding_days(excluded_days);

        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        if self.slot_minutes == 0 {
            return Err(CalendarError::invalid_policy("slot duration must be positive"));
        }

        if self.start_time >= self.end_time {
            return Err(CalendarError::invalid_policy(format!(
                "start time {} must be before end time {}",
                hhmm::format(&self.start_time),
                hhmm::format(&self.end_time)
            )));
        }

        let window_seconds = (self.end_time - self.start_time).num_seconds();
        let slot_seconds = i64::from(self.slot_minutes) * 60;
        if window_seconds % slot_seconds != 0 {
            return Err(CalendarError::invalid_policy(format!(
                "{}-minute slots do not evenly divide the {}-{} window",
                self.slot_minutes,
                hhmm::format(&self.start_time),
                hhmm::format(&self.end_time)
            )));
        }

        if self.capacity_per_slot == 0 {
            return Err(CalendarError::invalid_policy("capacity per slot must be at least 1"));
        }

        Ok(())
    }

    pub fn is_closed_on(&self, date: NaiveDate) -> bool {
        self.excluded_days.contains(&date.weekday()) || self.excluded_dates.contains(&date)
    }

    /// Number of slots on an open day. Only meaningful for a valid policy.
    pub fn slots_per_day(&self) -> usize {
        self.grid().len()
    }

    pub fn grid(&self) -> DayGrid {
        DayGrid {
            start_time: self.start_time,
            end_time: self.end_time,
            slot_minutes: self.slot_minutes,
        }
    }
}

/// Slot layout of one open day. A ledger keeps the grid it was created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayGrid {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
}

impl DayGrid {
    pub fn len(&self) -> usize {
        let window_minutes = (self.end_time - self.start_time).num_minutes();
        (window_minutes.max(0) / i64::from(self.slot_minutes.max(1))) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> Vec<NaiveTime> {
        let step = Duration::minutes(i64::from(self.slot_minutes));
        (0..self.len())
            .map(|index| self.start_time + step * index as i32)
            .collect()
    }

    pub fn contains(&self, start_time: NaiveTime) -> bool {
        self.slots().contains(&start_time)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub clinician_id: String,
    pub is_default: bool,
    pub slots_per_day: usize,
    pub policy: WorkingHoursPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// HH:MM WIRE FORMAT
// ==============================================================================

/// `HH:MM` rendering used on every external interface.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::CalendarError;

    pub fn format(time: &NaiveTime) -> String {
        time.format("%H:%M").to_string()
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, CalendarError> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| CalendarError::InvalidTime(raw.to_string()))
    }

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
