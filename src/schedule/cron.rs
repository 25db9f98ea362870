// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Five-field cron expressions

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};

use super::Schedule;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far ahead to search before treating an expression as never firing
const SEARCH_YEARS: i32 = 5;

/// Calendar schedule: `minute hour day-of-month month day-of-week`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    any_day: bool,
    any_weekday: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour day month weekday), found {}",
                fields.len()
            ));
        }

        let mut weekdays = parse_field(fields[4], 0, 7, &WEEKDAY_NAMES, 0)?;
        // 7 is an alias for Sunday
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59, &[], 0)?,
            hours: parse_field(fields[1], 0, 23, &[], 0)?,
            days: parse_field(fields[2], 1, 31, &[], 0)?,
            months: parse_field(fields[3], 1, 12, &MONTH_NAMES, 1)?,
            weekdays,
            any_day: fields[2].starts_with('*'),
            any_weekday: fields[4].starts_with('*'),
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has(self.days, date.day());
        let dow = has(self.weekdays, date.weekday().num_days_from_sunday());
        // a restricted day-of-month and day-of-week match either one
        if self.any_day || self.any_weekday {
            dom && dow
        } else {
            dom || dow
        }
    }

    fn search(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let limit = NaiveDate::from_ymd_opt(start.year() + SEARCH_YEARS, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let mut t = start;

        while t < limit {
            if !has(self.months, t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + chrono::Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t += chrono::Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl Schedule for CronSchedule {
    fn next(&self, now: DateTime<Local>) -> DateTime<Local> {
        let mut start = now
            .naive_local()
            .date()
            .and_hms_opt(now.hour(), now.minute(), 0)
            .map(|t| t + chrono::Duration::minutes(1));

        while let Some(candidate) = start.and_then(|s| self.search(s)) {
            match Local.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => return dt,
                LocalResult::Ambiguous(earliest, _) => return earliest,
                // skipped by a DST transition
                LocalResult::None => start = Some(candidate + chrono::Duration::minutes(1)),
            }
        }

        // never fires within the search window
        now + chrono::Duration::days(365 * i64::from(SEARCH_YEARS))
    }
}

fn has(set: u64, value: u32) -> bool {
    value < 64 && set & (1 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn parse_value(text: &str, names: &[&str], name_base: u32) -> Result<u32, String> {
    if let Ok(value) = text.parse::<u32>() {
        return Ok(value);
    }
    let lower = text.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|idx| idx as u32 + name_base)
        .ok_or_else(|| format!("'{}' is not a number or known name", text))
}

fn parse_field(field: &str, min: u32, max: u32, names: &[&str], name_base: u32) -> Result<u64, String> {
    let mut set = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step in '{}'", part))?;
                if step == 0 {
                    return Err(format!("step cannot be zero in '{}'", part));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, names, name_base)?, parse_value(hi, names, name_base)?)
        } else {
            let value = parse_value(range, names, name_base)?;
            // `5/15` runs from 5 to the end of the range
            (value, if step > 1 { max } else { value })
        };

        if start < min || end > max || start > end {
            return Err(format!("'{}' is outside {}-{}", part, min, max));
        }

        let mut value = start;
        while value <= end {
            set |= 1 << value;
            value += step;
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let cron = CronSchedule::parse("*/5 * * * *").unwrap();
        assert_eq!(cron.next(at(2024, 5, 1, 10, 2)), at(2024, 5, 1, 10, 5));
        assert_eq!(cron.next(at(2024, 5, 1, 10, 55)), at(2024, 5, 1, 11, 0));
    }

    #[test]
    fn test_next_is_strictly_later() {
        let cron = CronSchedule::parse("30 9 * * *").unwrap();
        assert_eq!(cron.next(at(2024, 5, 1, 9, 30)), at(2024, 5, 2, 9, 30));
    }

    #[test]
    fn test_month_rollover() {
        let cron = CronSchedule::parse("0 0 1 * *").unwrap();
        assert_eq!(cron.next(at(2024, 12, 15, 8, 0)), at(2025, 1, 1, 0, 0));
    }

    #[test]
    fn test_weekday_names_and_ranges() {
        // 2024-05-03 is a Friday
        let cron = CronSchedule::parse("0 8 * * mon-fri").unwrap();
        assert_eq!(cron.next(at(2024, 5, 3, 9, 0)), at(2024, 5, 6, 8, 0));
    }

    #[test]
    fn test_sunday_alias() {
        let a = CronSchedule::parse("0 0 * * 0").unwrap();
        let b = CronSchedule::parse("0 0 * * 7").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_day_of_month_or_weekday() {
        // the 15th or any Monday; 2024-05-06 is a Monday
        let cron = CronSchedule::parse("0 12 15 * 1").unwrap();
        assert_eq!(cron.next(at(2024, 5, 4, 0, 0)), at(2024, 5, 6, 12, 0));
    }

    #[test]
    fn test_rejects_bad_expressions() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("* * * foo *").is_err());
    }
}
