//! Trigger calculator: reminder rule + "now" → next fire instant.
//!
//! Pure and deterministic — this is what makes recovery after a crash
//! correct: recomputing from the same rule and the same "now" yields the
//! same instant that was in effect before the crash, and instants that
//! already passed while the process was down simply resolve to the next
//! future one (missed windows are dropped, never bursted).

use chrono::{DateTime, Datelike, Days, FixedOffset, Utc};

use crate::rule::ReminderRule;

/// Earliest instant strictly after `now` matching the rule's time-of-day
/// and weekday constraints, interpreted in the deployment time zone `tz`.
///
/// Scans forward at most 8 candidate days (today through today+7); any
/// valid rule matches a weekday within that window. Returns `None` only
/// for structurally invalid rules (e.g. an empty weekday set), which the
/// caller treats as unschedulable.
///
/// The strictly-after contract doubles as the clock-anomaly guard: even if
/// the system clock jumps backward, no candidate at or before `now` is
/// ever emitted, so an occurrence can never immediately re-fire.
pub fn next_fire(rule: &ReminderRule, now: DateTime<Utc>, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&tz);

    for day_offset in 0..=7u64 {
        let date = local.date_naive().checked_add_days(Days::new(day_offset))?;
        if !rule.recurrence.matches(date.weekday()) {
            continue;
        }
        let candidate = date
            .and_time(rule.time_of_day)
            .and_local_timezone(tz)
            .single()?
            .with_timezone(&Utc);
        if candidate > now {
            return Some(candidate);
        }
    }

    None
}
