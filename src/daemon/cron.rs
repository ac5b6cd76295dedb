//! Five-field cron expressions.
//!
//! Supports `*`, single values, `a-b` ranges, `*/n` and `a-b/n` steps, comma
//! lists, month and weekday names and the usual `@daily`-style macros.
//! Evaluation happens in UTC at minute resolution.

use super::errors::{Result, SyncError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How far ahead `next_after` searches before giving up. Eight years covers
/// a Feb 29 schedule across a skipped leap year.
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let expanded = expand_macro(trimmed).unwrap_or(trimmed);

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SyncError::cron(
                expr,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let minutes = parse_field(expr, fields[0], 0, 59, &[])?;
        let hours = parse_field(expr, fields[1], 0, 23, &[])?;
        let days_of_month = parse_field(expr, fields[2], 1, 31, &[])?;
        let months = parse_field(expr, fields[3], 1, 12, &MONTH_NAMES)?;
        let mut days_of_week = parse_field(expr, fields[4], 0, 7, &WEEKDAY_NAMES)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(CronSchedule {
            expr: trimmed.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Returns the first matching minute strictly after `after`, or `None`
    /// if the expression never fires within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let naive = after.naive_utc();
        let mut candidate = naive
            .date()
            .and_hms_opt(naive.hour(), naive.minute(), 0)?
            + Duration::minutes(1);
        let limit = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= limit {
            if !has_bit(self.months, candidate.month()) {
                candidate = first_of_next_month(candidate)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = candidate.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has_bit(self.hours, candidate.hour()) {
                candidate = candidate.date().and_hms_opt(candidate.hour(), 0, 0)?
                    + Duration::hours(1);
                continue;
            }
            if !has_bit(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate.and_utc());
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has_bit(self.days_of_month, date.day());
        let dow = has_bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn expand_macro(expr: &str) -> Option<&'static str> {
    let expanded = match expr.to_ascii_lowercase().as_str() {
        "@hourly" => "0 * * * *",
        "@daily" | "@midnight" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        "@yearly" | "@annually" => "0 0 1 1 *",
        _ => return None,
    };
    Some(expanded)
}

fn has_bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(expr: &str, field: &str, min: u32, max: u32, names: &[&str]) -> Result<u64> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| SyncError::cron(expr, format!("invalid step '{step}'")))?;
                if step == 0 {
                    return Err(SyncError::cron(expr, "step must be positive"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(expr, a, min, names)?,
                parse_value(expr, b, min, names)?,
            )
        } else {
            let value = parse_value(expr, range, min, names)?;
            // `5/15` means "from 5 through the end of the range, every 15"
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if lo < min || hi > max || lo > hi {
            return Err(SyncError::cron(
                expr,
                format!("'{part}' is outside {min}-{max}"),
            ));
        }

        for value in (lo..=hi).step_by(step as usize) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

fn parse_value(expr: &str, text: &str, offset: u32, names: &[&str]) -> Result<u32> {
    if let Ok(value) = text.parse::<u32>() {
        return Ok(value);
    }
    let lower = text.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|index| index as u32 + offset)
        .ok_or_else(|| SyncError::cron(expr, format!("invalid value '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_six_hours() {
        let cron = CronSchedule::parse("0 */6 * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 10, 7, 0)), Some(at(2024, 3, 10, 12, 0)));
        assert_eq!(cron.next_after(at(2024, 3, 10, 18, 0)), Some(at(2024, 3, 11, 0, 0)));
    }

    #[test]
    fn next_is_strictly_after_anchor() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 30).unwrap();
        assert_eq!(cron.next_after(anchor), Some(at(2024, 1, 1, 10, 6)));
    }

    #[test]
    fn lists_ranges_and_names() {
        let cron = CronSchedule::parse("15,45 9-17 * jan-mar mon-fri").unwrap();
        // 2024-03-09 is a Saturday
        assert_eq!(cron.next_after(at(2024, 3, 9, 12, 0)), Some(at(2024, 3, 11, 9, 15)));
        // end of March rolls over to next January
        assert_eq!(cron.next_after(at(2024, 3, 29, 17, 45)), Some(at(2025, 1, 1, 9, 15)));
    }

    #[test]
    fn restricted_dom_and_dow_are_ored() {
        // the 1st of the month or any Sunday
        let cron = CronSchedule::parse("0 0 1 * 7").unwrap();
        // 2024-06-01 is a Saturday, 2024-06-02 a Sunday
        assert_eq!(cron.next_after(at(2024, 5, 31, 12, 0)), Some(at(2024, 6, 1, 0, 0)));
        assert_eq!(cron.next_after(at(2024, 6, 1, 0, 0)), Some(at(2024, 6, 2, 0, 0)));
    }

    #[test]
    fn macros_expand() {
        let cron = CronSchedule::parse("@daily").unwrap();
        assert_eq!(cron.next_after(at(2024, 2, 28, 23, 59)), Some(at(2024, 2, 29, 0, 0)));
        assert_eq!(cron.expression(), "@daily");
    }

    #[test]
    fn leap_day_is_found() {
        let cron = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 0, 0)));
    }

    #[test]
    fn impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["", "* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "a b c d e", "5-1 * * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "accepted {expr:?}");
        }
    }
}
