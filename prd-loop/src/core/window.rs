//! Calendar-hour window arithmetic for the call-rate budget.

use chrono::{NaiveDateTime, Timelike};

const SECONDS_PER_HOUR: u64 = 3600;

/// Window marker for the hour containing `now` (`%Y%m%d%H`).
pub fn hour_key(now: NaiveDateTime) -> String {
    now.format("%Y%m%d%H").to_string()
}

/// Seconds from `now` until the top of the next hour (1..=3600).
pub fn seconds_until_next_hour(now: NaiveDateTime) -> u64 {
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    SECONDS_PER_HOUR - into_hour
}
