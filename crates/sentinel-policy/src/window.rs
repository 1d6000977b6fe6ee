//! Time-window matching.
//!
//! The evaluation instant is converted into the window's named zone, then the
//! weekday set and clock range are checked there. An inverted clock range
//! (start above end) wraps through midnight.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::TimeWindow;
use crate::validate::parse_hhmm;

/// Whether `now` falls inside the window.
///
/// Assumes the window passed policy validation; an unparseable zone or hour
/// bound here fails the match rather than panicking, so a stale policy can
/// never widen access.
pub fn window_matches(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    let Ok(tz) = window.timezone.parse::<Tz>() else {
        return false;
    };
    let local = now.with_timezone(&tz);

    if !window.weekdays.is_empty() {
        let today = crate::model::Weekday::from(local.weekday());
        if !window.weekdays.contains(&today) {
            return false;
        }
    }

    match &window.hours {
        None => true,
        Some(range) => {
            let (Some(start), Some(end)) = (parse_hhmm(&range.start), parse_hhmm(&range.end))
            else {
                return false;
            };
            let minute_of_day = local.hour() * 60 + local.minute();
            if start <= end {
                start <= minute_of_day && minute_of_day < end
            } else {
                // Wraps past midnight: 23:00–01:00 covers 23:30 and 00:30.
                minute_of_day >= start || minute_of_day < end
            }
        }
    }
}
