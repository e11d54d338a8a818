//! Reporting period resolution.
//!
//! Pure: callers pass `now` and the business timezone, so every function here
//! is deterministic and directly testable. All calendar arithmetic happens in
//! the business timezone; the resolved bounds are returned in UTC because the
//! source adapters filter on UTC timestamps.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Named reporting windows. Unknown strings fall back to [`PeriodKey::Today`]
/// so a typo in a chat command still produces a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKey {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl PeriodKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "today" | "day" => Some(Self::Today),
            "yesterday" => Some(Self::Yesterday),
            // Unseparated forms are legacy spellings still accepted.
            "this_week" | "thisweek" => Some(Self::ThisWeek),
            "last_week" | "lastweek" | "week" => Some(Self::LastWeek),
            "this_month" | "thismonth" => Some(Self::ThisMonth),
            "last_month" | "lastmonth" | "month" => Some(Self::LastMonth),
            _ => None,
        }
    }
}

/// Where the window closes for still-running periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpperBound {
    /// Up to the moment of the request.
    Live,
    /// Through 23:59:59 of the period's final day. Scheduled runs use this so
    /// a report generated at 20:00 still covers the whole business day.
    EndOfDay,
}

/// A resolved reporting window, inclusive on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub label: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Resolve a raw period string, falling back to `today` on garbage input.
pub fn resolve_key(raw: &str, now: DateTime<Utc>, tz: Tz, bound: UpperBound) -> Period {
    let key = match PeriodKey::parse(raw) {
        Some(key) => key,
        None => {
            log::warn!("Unknown period '{}', falling back to today", raw);
            PeriodKey::Today
        }
    };
    resolve(key, now, tz, bound)
}

/// Resolve a named period relative to `now`.
pub fn resolve(key: PeriodKey, now: DateTime<Utc>, tz: Tz, bound: UpperBound) -> Period {
    let today = now.with_timezone(&tz).date_naive();

    let (start, end) = match key {
        PeriodKey::Today => (today, today),
        PeriodKey::Yesterday => {
            let yesterday = today - Duration::days(1);
            (yesterday, yesterday)
        }
        PeriodKey::ThisWeek => (monday_of(today), today),
        PeriodKey::LastWeek => {
            let monday = monday_of(today);
            (monday - Duration::days(7), monday - Duration::days(1))
        }
        PeriodKey::ThisMonth => (first_of_month(today), today),
        PeriodKey::LastMonth => {
            let last_of_previous = first_of_month(today) - Duration::days(1);
            (first_of_month(last_of_previous), last_of_previous)
        }
    };

    from_dates(start, end, now, tz, bound)
}

/// Resolve an explicit `from..to` date range (inclusive). Ordering is the
/// caller's to enforce: an inverted range resolves as given and matches
/// nothing downstream.
pub fn resolve_custom(
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
    tz: Tz,
    bound: UpperBound,
) -> Period {
    from_dates(start, end, now, tz, bound)
}

fn from_dates(
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
    tz: Tz,
    bound: UpperBound,
) -> Period {
    let from = local_instant(tz, start, 0, 0, 0).with_timezone(&Utc);
    let day_end = local_instant(tz, end, 23, 59, 59).with_timezone(&Utc);

    let to = match bound {
        UpperBound::Live => day_end.min(now),
        UpperBound::EndOfDay => day_end,
    };

    let label = if start == end {
        start.format("%Y-%m-%d").to_string()
    } else {
        format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    };

    Period { label, from, to }
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    // with_day(1) cannot fail for day 1
    date.with_day(1).unwrap_or(date)
}

/// Interpret a local wall-clock time in `tz`, handling DST transitions.
/// Ambiguous times take the earlier offset; times skipped by a forward jump
/// walk ahead hour by hour until the clock exists again.
fn local_instant(tz: Tz, date: NaiveDate, hour: u32, min: u32, sec: u32) -> DateTime<Tz> {
    let mut candidate = date.and_hms_opt(hour, min, sec).unwrap_or_else(|| {
        date.and_hms_opt(0, 0, 0)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_time(Default::default()))
    });

    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::hours(1),
        }
    }

    // No sane timezone skips more than a few hours; treat as UTC offset zero.
    Utc.from_utc_datetime(&candidate).with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    const TASHKENT: Tz = chrono_tz::Asia::Tashkent;

    fn at(tz: Tz, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn today_live_ends_at_now() {
        let now = at(TASHKENT, 2025, 3, 14, 15, 30);
        let period = resolve(PeriodKey::Today, now, TASHKENT, UpperBound::Live);
        assert_eq!(period.from, at(TASHKENT, 2025, 3, 14, 0, 0));
        assert_eq!(period.to, now);
        assert_eq!(period.label, "2025-03-14");
    }

    #[test]
    fn today_end_of_day_extends_past_now() {
        let now = at(TASHKENT, 2025, 3, 14, 20, 0);
        let period = resolve(PeriodKey::Today, now, TASHKENT, UpperBound::EndOfDay);
        let expected = TASHKENT
            .with_ymd_and_hms(2025, 3, 14, 23, 59, 59)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(period.to, expected);
        assert!(period.to > now);
    }

    #[test]
    fn yesterday_closes_at_its_own_end_even_live() {
        let now = at(TASHKENT, 2025, 3, 14, 10, 0);
        let period = resolve(PeriodKey::Yesterday, now, TASHKENT, UpperBound::Live);
        let expected = TASHKENT
            .with_ymd_and_hms(2025, 3, 13, 23, 59, 59)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(period.to, expected);
        assert_eq!(period.label, "2025-03-13");
    }

    #[test]
    fn weeks_start_on_monday() {
        // 2025-03-12 is a Wednesday.
        let now = at(TASHKENT, 2025, 3, 12, 12, 0);
        let this_week = resolve(PeriodKey::ThisWeek, now, TASHKENT, UpperBound::Live);
        assert_eq!(this_week.from, at(TASHKENT, 2025, 3, 10, 0, 0));

        let last_week = resolve(PeriodKey::LastWeek, now, TASHKENT, UpperBound::Live);
        assert_eq!(last_week.from, at(TASHKENT, 2025, 3, 3, 0, 0));
        assert_eq!(last_week.label, "2025-03-03 to 2025-03-09");
    }

    #[test]
    fn monday_is_its_own_week_start() {
        // 2025-03-10 is a Monday.
        let now = at(TASHKENT, 2025, 3, 10, 9, 0);
        let period = resolve(PeriodKey::ThisWeek, now, TASHKENT, UpperBound::Live);
        assert_eq!(period.from, at(TASHKENT, 2025, 3, 10, 0, 0));
    }

    #[test]
    fn last_month_across_year_boundary() {
        let now = at(TASHKENT, 2025, 1, 15, 12, 0);
        let period = resolve(PeriodKey::LastMonth, now, TASHKENT, UpperBound::Live);
        assert_eq!(period.from, at(TASHKENT, 2024, 12, 1, 0, 0));
        assert_eq!(period.label, "2024-12-01 to 2024-12-31");
    }

    #[test]
    fn last_month_after_a_31_day_month() {
        // March 31st minus one month must land in February, not skip it.
        let now = at(TASHKENT, 2025, 3, 31, 12, 0);
        let period = resolve(PeriodKey::LastMonth, now, TASHKENT, UpperBound::Live);
        assert_eq!(period.label, "2025-02-01 to 2025-02-28");
    }

    #[test]
    fn unknown_key_falls_back_to_today() {
        let now = at(TASHKENT, 2025, 3, 14, 15, 0);
        let period = resolve_key("lastt_week", now, TASHKENT, UpperBound::Live);
        assert_eq!(period.label, "2025-03-14");
    }

    #[test]
    fn key_aliases_parse() {
        assert_eq!(PeriodKey::parse("WEEK"), Some(PeriodKey::LastWeek));
        assert_eq!(PeriodKey::parse(" month "), Some(PeriodKey::LastMonth));
        assert_eq!(PeriodKey::parse("thisweek"), Some(PeriodKey::ThisWeek));
        assert_eq!(PeriodKey::parse("LastMonth"), Some(PeriodKey::LastMonth));
        assert_eq!(PeriodKey::parse("nonsense"), None);
    }

    #[test]
    fn custom_range_resolves_to_full_day_bounds() {
        let now = at(TASHKENT, 2025, 3, 20, 12, 0);
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let period = resolve_custom(start, end, now, TASHKENT, UpperBound::EndOfDay);
        assert_eq!(period.label, "2025-03-01 to 2025-03-10");
        assert_eq!(period.from, at(TASHKENT, 2025, 3, 1, 0, 0));
        let expected_to = TASHKENT
            .with_ymd_and_hms(2025, 3, 10, 23, 59, 59)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(period.to, expected_to);
    }

    #[test]
    fn inverted_custom_range_resolves_as_given() {
        let now = at(TASHKENT, 2025, 3, 20, 12, 0);
        let start = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let period = resolve_custom(start, end, now, TASHKENT, UpperBound::EndOfDay);
        // Ordering is not validated; the inverted window passes through and
        // can match no records.
        assert_eq!(period.label, "2025-03-10 to 2025-03-01");
        assert!(period.from > period.to);
    }

    #[test]
    fn single_day_custom_range_is_non_empty() {
        let now = at(TASHKENT, 2025, 3, 20, 12, 0);
        let day = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let period = resolve_custom(day, day, now, TASHKENT, UpperBound::EndOfDay);
        assert_eq!(period.label, "2025-03-15");
        assert!(period.from < period.to);
    }

    #[test]
    fn midnight_skipped_by_dst_jump_walks_forward() {
        // Chile springs forward at midnight: 2025-09-07 00:00 does not exist
        // and the day starts at 01:00.
        let santiago: Tz = chrono_tz::America::Santiago;
        let now = santiago
            .with_ymd_and_hms(2025, 9, 7, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let period = resolve(PeriodKey::Today, now, santiago, UpperBound::Live);
        let local_from = period.from.with_timezone(&santiago);
        assert_eq!(local_from.format("%H:%M").to_string(), "01:00");
    }

}
