//! Local calendar-month windows expressed as UTC instants.
//!
//! The user's timezone is always passed in explicitly. An unknown zone name
//! falls back to UTC (with a warning); nothing in here can fail.

use crate::{model::UserProfile, types::YearMonth};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Inclusive `[start, end]` bounds of one local calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end:   DateTime<Utc>,
}

impl MonthWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Parse an IANA zone name. Absent, blank or unknown names yield UTC.
pub fn parse_timezone(name: Option<&str>) -> Tz {
    match name.map(str::trim) {
        None | Some("") => Tz::UTC,
        Some(raw) => raw.parse::<Tz>().unwrap_or_else(|_| {
            log::warn!("unknown timezone '{raw}', falling back to UTC");
            Tz::UTC
        }),
    }
}

pub fn user_timezone(user: &UserProfile) -> Tz {
    parse_timezone(user.timezone.as_deref())
}

/// The local month containing `instant`, as UTC bounds.
pub fn resolve_month_window(user: &UserProfile, instant: DateTime<Utc>) -> MonthWindow {
    month_window_in(user_timezone(user), instant)
}

pub fn month_window_in(tz: Tz, instant: DateTime<Utc>) -> MonthWindow {
    let local_month = YearMonth::of(&instant.with_timezone(&tz));
    let start = local_to_utc(tz, local_month.first_day().and_time(NaiveTime::MIN));
    let next_start = local_to_utc(tz, local_month.next().first_day().and_time(NaiveTime::MIN));
    // Last representable instant of the month: 23:59:59.999999 local.
    MonthWindow {
        start,
        end: next_start - Duration::microseconds(1),
    }
}

/// The year-month `instant` falls in on the user's local calendar.
pub fn local_year_month(user: &UserProfile, instant: DateTime<Utc>) -> YearMonth {
    YearMonth::of(&instant.with_timezone(&user_timezone(user)))
}

/// A point safely inside `year_month`: the 15th at local midday.
/// Far enough from both month edges that no DST shift can move it out.
pub fn representative_instant(tz: Tz, year_month: YearMonth) -> DateTime<Utc> {
    let date = year_month.day(15).unwrap_or_else(|| year_month.first_day());
    let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN);
    local_to_utc(tz, date.and_time(noon))
}

pub fn window_for_year_month(tz: Tz, year_month: YearMonth) -> MonthWindow {
    month_window_in(tz, representative_instant(tz, year_month))
}

/// Convert a local wall-clock time to UTC.
///
/// Ambiguous times (clocks fell back) take the earlier instant. Times inside
/// a gap (clocks sprang forward) move to the first valid minute after it.
fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut probe = local;
    for _ in 0..(24 * 60) {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => probe += Duration::minutes(1),
        }
    }
    Utc.from_utc_datetime(&local)
}

/// First local midnight on `date`, in UTC.
pub fn start_of_local_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    local_to_utc(tz, date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn utc_month_bounds() {
        let w = month_window_in(Tz::UTC, utc("2024-02-10T08:00:00Z"));
        assert_eq!(w.start, utc("2024-02-01T00:00:00Z"));
        assert_eq!(w.end, utc("2024-02-29T23:59:59.999999Z"));
    }

    #[test]
    fn instant_is_bucketed_by_local_calendar() {
        // 03:00 UTC on March 1st is still February in New York.
        let w = month_window_in(chrono_tz::America::New_York, utc("2024-03-01T03:00:00Z"));
        assert_eq!(w.start, utc("2024-02-01T05:00:00Z"));
        assert_eq!(w.end, utc("2024-03-01T04:59:59.999999Z"));
    }

    #[test]
    fn dst_month_keeps_local_midnights() {
        // March 2024 in New York starts in EST and ends in EDT.
        let w = window_for_year_month(chrono_tz::America::New_York, "2024-03".parse().unwrap());
        assert_eq!(w.start, utc("2024-03-01T05:00:00Z"));
        assert_eq!(w.end, utc("2024-04-01T03:59:59.999999Z"));
    }

    #[test]
    fn midnight_inside_dst_gap_moves_forward() {
        // Santiago sprang forward at local midnight on 2022-09-11.
        let tz = chrono_tz::America::Santiago;
        let start = start_of_local_day(tz, NaiveDate::from_ymd_opt(2022, 9, 11).unwrap());
        let local = start.with_timezone(&tz);
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2022, 9, 11).unwrap());
        assert_eq!(local.time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
    }

    #[test]
    fn unknown_zone_fails_closed_to_utc() {
        assert_eq!(parse_timezone(Some("Mars/Olympus_Mons")), Tz::UTC);
        assert_eq!(parse_timezone(Some("  ")), Tz::UTC);
        assert_eq!(parse_timezone(None), Tz::UTC);
    }
}
