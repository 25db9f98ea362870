// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Schedules
//!
//! A schedule maps "now" to the next activation time of a pipeline. The
//! trigger loop asks for the next time after every activation, so schedules
//! are plain functions of time with no state of their own.
//!
//! Supported specs:
//!
//! - `""`: re-trigger immediately (tight loop, throttled by backpressure)
//! - `@every 1m30s`: fixed interval (`ms`, `s`, `m`, `h`, `d` units)
//! - `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
//! - five-field cron: `minute hour day-of-month month day-of-week`

mod cron;

pub use cron::CronSchedule;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{TreeflowError, TreeflowResult};

/// Computes the next activation time
pub trait Schedule: Send + Sync + Debug {
    /// Next activation strictly derived from `now`; may equal `now`
    fn next(&self, now: DateTime<Local>) -> DateTime<Local>;
}

/// Fires again as soon as the previous activation returns
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Schedule for Immediate {
    fn next(&self, now: DateTime<Local>) -> DateTime<Local> {
        now
    }
}

/// Fires at a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct Every {
    interval: Duration,
}

impl Every {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Schedule for Every {
    /// Saturates at the latest representable time rather than wrapping
    fn next(&self, now: DateTime<Local>) -> DateTime<Local> {
        chrono::Duration::from_std(self.interval)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC.with_timezone(&Local))
    }
}

/// Parse a schedule spec
pub fn parse(spec: &str) -> TreeflowResult<Arc<dyn Schedule>> {
    let trimmed = spec.trim();
    let invalid = |reason: String| TreeflowError::InvalidSchedule {
        spec: spec.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Ok(Arc::new(Immediate));
    }

    if let Some(rest) = trimmed.strip_prefix("@every") {
        let interval = parse_duration(rest.trim()).map_err(invalid)?;
        if chrono::Duration::from_std(interval).is_err() {
            return Err(invalid(format!("interval {:?} is too large", interval)));
        }
        return Ok(Arc::new(Every::new(interval)));
    }

    let expression = match trimmed {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other if other.starts_with('@') => {
            return Err(invalid(format!("unknown descriptor '{}'", other)));
        }
        other => other,
    };

    let cron = CronSchedule::parse(expression).map_err(invalid)?;
    Ok(Arc::new(cron))
}

/// Parse a compact duration such as `90s`, `1h30m` or `250ms`
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let whole = Regex::new(r"^(?:\d+(?:ms|s|m|h|d))+$").map_err(|e| e.to_string())?;
    let part = Regex::new(r"(\d+)(ms|s|m|h|d)").map_err(|e| e.to_string())?;

    if !whole.is_match(text) {
        return Err(format!("'{}' is not a duration like 30s or 1h15m", text));
    }

    let mut total = Duration::ZERO;
    for caps in part.captures_iter(text) {
        let value: u64 = caps[1]
            .parse()
            .map_err(|e| format!("'{}': {}", &caps[1], e))?;
        let unit = match &caps[2] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            _ => Duration::from_secs(value.saturating_mul(86_400)),
        };
        total = total.saturating_add(unit);
    }

    if total.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_empty_spec_is_immediate() {
        let schedule = parse("").unwrap();
        let now = Local::now();
        assert_eq!(schedule.next(now), now);
    }

    #[test]
    fn test_every_interval() {
        let schedule = parse("@every 1m30s").unwrap();
        let now = at(2024, 3, 10, 12, 0);
        assert_eq!(schedule.next(now), now + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d1s").unwrap(), Duration::from_secs(86_401));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_descriptors() {
        let hourly = parse("@hourly").unwrap();
        assert_eq!(hourly.next(at(2024, 3, 10, 12, 15)), at(2024, 3, 10, 13, 0));

        let daily = parse("@daily").unwrap();
        assert_eq!(daily.next(at(2024, 3, 10, 12, 15)), at(2024, 3, 11, 0, 0));
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            parse("@sometimes"),
            Err(TreeflowError::InvalidSchedule { .. })
        ));
        assert!(parse("@every").is_err());
        assert!(parse("not a cron").is_err());
    }

    #[test]
    fn test_huge_intervals() {
        assert!(matches!(
            parse("@every 18446744073709551615s"),
            Err(TreeflowError::InvalidSchedule { .. })
        ));

        // representable as a duration but past the last representable date
        let schedule = parse("@every 100000000d").unwrap();
        let now = Local::now();
        let next = schedule.next(now);
        assert!(next > now);
        assert!(next - now > chrono::Duration::days(365 * 1000));
    }
}
