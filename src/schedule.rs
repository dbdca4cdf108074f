//! Schedule expressions used when adding or retrying jobs.
//!
//! Supported forms:
//! - `now`, `today`, `tomorrow`, `yesterday`
//! - relative terms such as `+10 minutes`, `-1 day`, `+1 hour 30 minutes`
//!   (optionally prefixed with `now`)
//! - absolute `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`

use chrono::{Duration, NaiveDate, NaiveDateTime, SubsecRound};

use crate::error::{Error, Result};

/// Resolve `expression` against `now`.
pub fn resolve(expression: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let normalized = expression.trim().to_ascii_lowercase();
    let invalid = || Error::InvalidSchedule(expression.to_owned());

    match normalized.as_str() {
        "" | "now" => return Ok(now),
        "today" => return Ok(midnight(now)),
        "tomorrow" => return Ok(midnight(now) + Duration::days(1)),
        "yesterday" => return Ok(midnight(now) - Duration::days(1)),
        _ => {}
    }

    if let Ok(at) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S") {
        return Ok(at.trunc_subsecs(0));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?);
    }

    let mut tokens = normalized.split_whitespace().peekable();
    if tokens.peek() == Some(&"now") {
        tokens.next();
    }

    let mut offset = Duration::zero();
    let mut terms = 0;
    while let Some(token) = tokens.next() {
        // "+10minutes" and "+10 minutes" are both accepted.
        let split = token
            .char_indices()
            .find(|(i, c)| *i > 0 && c.is_ascii_alphabetic())
            .map(|(i, _)| i);
        let (amount, unit) = match split {
            Some(i) => (&token[..i], &token[i..]),
            None => (token, tokens.next().ok_or_else(invalid)?),
        };

        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        let term = unit_duration(unit, amount).ok_or_else(invalid)?;
        offset = offset.checked_add(&term).ok_or_else(invalid)?;
        terms += 1;
    }

    if terms == 0 {
        return Err(invalid());
    }

    now.checked_add_signed(offset).ok_or_else(invalid)
}

fn midnight(now: NaiveDateTime) -> NaiveDateTime {
    now.date().and_time(chrono::NaiveTime::MIN)
}

fn unit_duration(unit: &str, amount: i64) -> Option<Duration> {
    match unit {
        "second" | "seconds" | "sec" | "secs" => Duration::try_seconds(amount),
        "minute" | "minutes" | "min" | "mins" => Duration::try_minutes(amount),
        "hour" | "hours" => Duration::try_hours(amount),
        "day" | "days" => Duration::try_days(amount),
        "week" | "weeks" => Duration::try_weeks(amount),
        _ => None,
    }
}
