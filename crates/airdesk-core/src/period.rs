//! Reporting period identifiers.
//!
//! Every trackable condition is keyed by a period: a calendar day for daily
//! reports and user events, a year-month for monthly reports and rewards.
//! Periods are always derived from an instant in the report time zone, so a
//! period key never depends on the process time zone.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Time zone all report deadlines are evaluated in.
pub const REPORT_TZ: Tz = chrono_tz::Europe::Bratislava;

/// Local hour after which a missing report counts as overdue.
pub const REPORT_DEADLINE_HOUR: u32 = 8;

/// Normalized identifier for a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeriodKey {
    /// A calendar day, e.g. `2024-03-15`.
    Day(NaiveDate),
    /// A year-month, e.g. `2024-06`.
    Month { year: i32, month: u32 },
}

impl PeriodKey {
    /// The calendar day the instant falls on in `tz`.
    pub fn day_of(at: DateTime<Utc>, tz: Tz) -> Self {
        PeriodKey::Day(at.with_timezone(&tz).date_naive())
    }

    /// The year-month the instant falls in, in `tz`.
    pub fn month_of(at: DateTime<Utc>, tz: Tz) -> Self {
        let local = at.with_timezone(&tz);
        PeriodKey::Month {
            year: local.year(),
            month: local.month(),
        }
    }

    /// The year-month immediately before the instant's month, in `tz`.
    pub fn previous_month_of(at: DateTime<Utc>, tz: Tz) -> Self {
        let local = at.with_timezone(&tz);
        let (year, month) = if local.month() == 1 {
            (local.year() - 1, 12)
        } else {
            (local.year(), local.month() - 1)
        };
        PeriodKey::Month { year, month }
    }

    /// Parse a period key from its canonical text form.
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(PeriodKey::Day(date));
        }
        let (year_str, month_str) = s.split_once('-')?;
        let year: i32 = year_str.parse().ok()?;
        let month: u32 = month_str.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(PeriodKey::Month { year, month })
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            PeriodKey::Month { year, month } => write!(f, "{year:04}-{month:02}"),
        }
    }
}

impl From<PeriodKey> for String {
    fn from(key: PeriodKey) -> String {
        key.to_string()
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        PeriodKey::parse(&s).ok_or_else(|| format!("invalid period key '{s}'"))
    }
}

/// Whether the instant has passed the report deadline for its local day.
pub fn deadline_passed(at: DateTime<Utc>, tz: Tz) -> bool {
    at.with_timezone(&tz).hour() >= REPORT_DEADLINE_HOUR
}

/// Whether the instant falls on the first calendar day of its local month.
pub fn is_first_of_month(at: DateTime<Utc>, tz: Tz) -> bool {
    at.with_timezone(&tz).day() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap()
    }

    #[test]
    fn parse_and_display_roundtrip() {
        for text in ["2024-03-15", "2024-06", "1999-12-31", "2025-01"] {
            let key = PeriodKey::parse(text).unwrap();
            assert_eq!(key.to_string(), text);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(PeriodKey::parse("").is_none());
        assert!(PeriodKey::parse("2024").is_none());
        assert!(PeriodKey::parse("2024-13").is_none());
        assert!(PeriodKey::parse("not-a-period").is_none());
    }

    #[test]
    fn day_of_uses_local_calendar() {
        // 23:30 UTC is already the next day in Bratislava (UTC+1 in winter).
        let at = utc("2024-01-10T23:30:00+00:00");
        assert_eq!(
            PeriodKey::day_of(at, REPORT_TZ),
            PeriodKey::Day(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap())
        );
    }

    #[test]
    fn previous_month_wraps_year() {
        let at = utc("2024-01-15T12:00:00+00:00");
        assert_eq!(
            PeriodKey::previous_month_of(at, REPORT_TZ),
            PeriodKey::Month { year: 2023, month: 12 }
        );
    }

    #[test]
    fn deadline_boundary_in_local_time() {
        // 06:59 UTC == 07:59 Bratislava (winter), 07:00 UTC == 08:00.
        assert!(!deadline_passed(utc("2024-03-15T06:59:00+00:00"), REPORT_TZ));
        assert!(deadline_passed(utc("2024-03-15T07:00:00+00:00"), REPORT_TZ));
    }

    #[test]
    fn deadline_follows_dst() {
        // In July Bratislava is UTC+2: 06:30 UTC is already 08:30 local.
        let at = utc("2024-07-15T06:30:00+00:00");
        assert_eq!(at.with_timezone(&REPORT_TZ).hour(), 8);
        assert!(deadline_passed(at, REPORT_TZ));
    }
}
