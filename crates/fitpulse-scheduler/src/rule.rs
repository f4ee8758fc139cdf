//! Reminder rule definitions — the core data model for scheduled reminders.

use std::collections::BTreeSet;

use chrono::{NaiveTime, Weekday};
use fitpulse_core::{PlanId, ReminderId, ScheduleKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How often a reminder recurs. Weekdays are 1–7, Monday = 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day at the rule's time of day.
    Daily,
    /// A fixed weekly pattern, e.g. {1,3,5} = Mon/Wed/Fri.
    Weekly { days: BTreeSet<u8> },
    /// A user-picked set of weekdays.
    Custom { days: BTreeSet<u8> },
}

impl Recurrence {
    /// Does this recurrence fire on the given weekday?
    pub fn matches(&self, weekday: Weekday) -> bool {
        match self {
            Recurrence::Daily => true,
            Recurrence::Weekly { days } | Recurrence::Custom { days } => {
                days.contains(&(weekday.number_from_monday() as u8))
            }
        }
    }

    /// Stable kind tag used by the schedule store.
    pub fn kind(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly { .. } => "weekly",
            Recurrence::Custom { .. } => "custom",
        }
    }

    /// Weekday set, empty for daily.
    pub fn days(&self) -> BTreeSet<u8> {
        match self {
            Recurrence::Daily => BTreeSet::new(),
            Recurrence::Weekly { days } | Recurrence::Custom { days } => days.clone(),
        }
    }

    /// Rebuild from the store's `(kind, days)` columns.
    pub fn from_parts(kind: &str, days: BTreeSet<u8>) -> Option<Self> {
        match kind {
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly { days }),
            "custom" => Some(Recurrence::Custom { days }),
            _ => None,
        }
    }
}

/// A user-declared reminder rule attached to a fitness plan.
///
/// Owned exclusively by the plan that declares it — never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRule {
    pub reminder_id: ReminderId,
    pub plan_id: PlanId,
    /// Local wall-clock time of day (in the deployment time zone).
    pub time_of_day: NaiveTime,
    pub recurrence: Recurrence,
    pub enabled: bool,
}

/// Rule validation errors, rejected at the CRUD boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("weekly/custom recurrence requires a non-empty weekday set")]
    EmptyWeekdaySet,

    #[error("weekday {0} out of range (expected 1-7, Monday=1)")]
    WeekdayOutOfRange(u8),

    #[error("rule matches no fire instant within the next 7 days")]
    Unschedulable,
}

impl ReminderRule {
    pub fn new(
        reminder_id: ReminderId,
        plan_id: PlanId,
        time_of_day: NaiveTime,
        recurrence: Recurrence,
    ) -> Self {
        Self { reminder_id, plan_id, time_of_day, recurrence, enabled: true }
    }

    /// Composite schedule identity.
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey { plan_id: self.plan_id, reminder_id: self.reminder_id }
    }

    /// Structural validation: daily ignores the weekday set; weekly/custom
    /// require a non-empty set with every element in 1..=7.
    pub fn validate(&self) -> Result<(), RuleError> {
        match &self.recurrence {
            Recurrence::Daily => Ok(()),
            Recurrence::Weekly { days } | Recurrence::Custom { days } => {
                if days.is_empty() {
                    return Err(RuleError::EmptyWeekdaySet);
                }
                for &day in days {
                    if !(1..=7).contains(&day) {
                        return Err(RuleError::WeekdayOutOfRange(day));
                    }
                }
                Ok(())
            }
        }
    }
}
