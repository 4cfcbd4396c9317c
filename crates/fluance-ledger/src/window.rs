//! Day offsets that come from operators (validity, days back, report windows).
//!
//! Values that chrono cannot represent are reported as `Validation` errors.

use chrono::{DateTime, Duration, Utc};

use crate::error::{LedgerError, Result};

fn days(n: i64) -> Result<Duration> {
    Duration::try_days(n)
        .ok_or_else(|| LedgerError::validation(format!("{n} days is out of range")))
}

/// `at + n days`.
pub fn days_after(at: DateTime<Utc>, n: i64) -> Result<DateTime<Utc>> {
    at.checked_add_signed(days(n)?)
        .ok_or_else(|| LedgerError::validation(format!("{n} days from {at} is out of range")))
}

/// `at - n days`.
pub fn days_before(at: DateTime<Utc>, n: i64) -> Result<DateTime<Utc>> {
    at.checked_sub_signed(days(n)?)
        .ok_or_else(|| LedgerError::validation(format!("{n} days before {at} is out of range")))
}
