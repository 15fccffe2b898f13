use chrono::{NaiveDate, NaiveTime};

use crate::error::CalendarError;
use crate::models::WorkingHoursPolicy;

/// Candidate start times for `date` under `policy`, in ascending order.
///
/// The policy is validated first, so a broken policy is reported even for a
/// date the policy excludes. Excluded dates yield an empty sequence.
pub fn enumerate_slots(
    policy: &WorkingHoursPolicy,
    date: NaiveDate,
) -> Result<Vec<NaiveTime>, CalendarError> {
    policy.validate()?;

    if policy.is_closed_on(date) {
        return Ok(Vec::new());
    }

    Ok(policy.grid().slots())
}

/// Whether `start_time` is one of the enumerated slots for `date`.
pub fn is_enumerated_slot(
    policy: &WorkingHoursPolicy,
    date: NaiveDate,
    start_time: NaiveTime,
) -> Result<bool, CalendarError> {
    Ok(enumerate_slots(policy, date)?.contains(&start_time))
}
