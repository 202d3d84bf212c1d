//! Weekly recurrence expansion in a reference timezone.
//
// Occurrences are built from wall-clock dates and times, then localized. DST
// transitions resolve to the later instant for repeated hours and shift
// forward by an hour inside a spring-forward gap.

use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

/// Monday of the week containing `now`, as seen in `tz`
pub fn start_of_week(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let today = now.with_timezone(&tz).date_naive();
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// Every `weekday` from `week_start` up to and including `until`, one per week.
/// Stops early at the end of the representable calendar.
pub fn expand(
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
    week_start: NaiveDate,
    until: NaiveDate,
    tz: Tz,
) -> Vec<Occurrence> {
    let offset = (7 + i64::from(weekday.num_days_from_monday())
        - i64::from(week_start.weekday().num_days_from_monday()))
        % 7;
    let mut next = week_start.checked_add_days(Days::new(offset as u64));

    let mut occurrences = Vec::new();
    while let Some(date) = next.filter(|date| *date <= until) {
        occurrences.push(Occurrence {
            start: localize(date.and_time(start), tz),
            end: localize(date.and_time(end), tz),
        });
        next = date.checked_add_days(Days::new(7));
    }
    occurrences
}

/// Attach `tz` to a wall-clock time
pub fn localize(local: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(_, later) => later,
        LocalResult::None => {
            let shifted = local.checked_add_signed(Duration::hours(1)).unwrap_or(local);
            warn!("{} does not exist in {}, using {}", local, tz, shifted);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(instant) | LocalResult::Ambiguous(_, instant) => instant,
                LocalResult::None => tz.from_utc_datetime(&local),
            }
        }
    }
}
