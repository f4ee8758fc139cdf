//! Lifecycle synchronizer — the write side of the engine.
//!
//! Reminder and plan mutations from the CRUD collaborator land here; the
//! store and the gate are updated and the scheduling loop is woken so it
//! never acts on stale data. A newly created reminder or an edited time
//! pre-empts whatever sleep the loop is in.

use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use fitpulse_core::{PlanId, ReminderId};
use thiserror::Error;
use tokio::sync::Notify;

use crate::gate::{PlanGate, PlanStatus};
use crate::rule::{ReminderRule, RuleError};
use crate::store::{ScheduleStore, StoreError};
use crate::trigger;

/// Errors surfaced to the CRUD collaborator. Delivery failures never show
/// up here — they are invisible at mutation time by design.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entry point for reminder/plan mutations.
pub struct LifecycleSync {
    store: Arc<dyn ScheduleStore>,
    gate: Arc<PlanGate>,
    wake: Arc<Notify>,
    tz: FixedOffset,
}

impl LifecycleSync {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        gate: Arc<PlanGate>,
        wake: Arc<Notify>,
        tz: FixedOffset,
    ) -> Self {
        Self { store, gate, wake, tz }
    }

    /// Create or replace a reminder. Validates the rule, stores the
    /// snapshot with a freshly computed next-fire instant, and wakes the
    /// loop so the new instant can pre-empt a longer sleep.
    pub fn create_or_update_reminder(&self, rule: ReminderRule) -> Result<(), SyncError> {
        rule.validate()?;
        let next = trigger::next_fire(&rule, Utc::now(), self.tz).ok_or(RuleError::Unschedulable)?;
        self.store.upsert(&rule, next)?;
        self.wake.notify_one();
        tracing::info!("📅 Reminder {} scheduled, next fire {next}", rule.key());
        Ok(())
    }

    /// Delete one reminder. An occurrence already handed to the worker
    /// pool still delivers; only future occurrences are cancelled.
    pub fn delete_reminder(&self, reminder_id: ReminderId) -> Result<bool, SyncError> {
        let removed = self.store.remove(reminder_id)?;
        if removed {
            self.wake.notify_one();
            tracing::info!("🗑️ Reminder {reminder_id} unscheduled");
        }
        Ok(removed)
    }

    /// Cascade over every reminder of a deleted plan. The gate is marked
    /// first so nothing dispatches even if a stale occurrence is already
    /// in the loop's hands.
    pub fn delete_plan_reminders(&self, plan_id: PlanId) -> Result<usize, SyncError> {
        self.gate.set_status(plan_id, PlanStatus::Deleted);
        let removed = self.store.remove_plan(plan_id)?;
        self.wake.notify_one();
        tracing::info!("🗑️ Plan {plan_id} deleted, {removed} reminder(s) unscheduled");
        Ok(removed)
    }

    /// Pause: gate-only, the schedule store is untouched. Takes effect on
    /// the very next occurrence.
    pub fn pause_plan(&self, plan_id: PlanId) {
        self.gate.set_status(plan_id, PlanStatus::Paused);
        tracing::info!("⏸️ Plan {plan_id} paused");
    }

    /// Resume: gate-only. Reminders restart without being re-created.
    pub fn resume_plan(&self, plan_id: PlanId) {
        self.gate.set_status(plan_id, PlanStatus::Active);
        tracing::info!("▶️ Plan {plan_id} resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Recurrence;
    use crate::store::SqliteStore;
    use chrono::{NaiveTime, Offset};
    use std::collections::BTreeSet;

    fn fixture() -> (LifecycleSync, Arc<SqliteStore>, Arc<Notify>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let wake = Arc::new(Notify::new());
        let sync = LifecycleSync::new(
            store.clone(),
            Arc::new(PlanGate::new()),
            wake.clone(),
            Utc.fix(),
        );
        (sync, store, wake)
    }

    fn rule(recurrence: Recurrence) -> ReminderRule {
        ReminderRule::new(
            ReminderId::new(),
            PlanId::new(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            recurrence,
        )
    }

    #[tokio::test]
    async fn test_create_stores_future_instant_and_wakes() {
        let (sync, store, wake) = fixture();
        sync.create_or_update_reminder(rule(Recurrence::Daily)).unwrap();

        let entries = store.load_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].next_fire > Utc::now());

        // The loop's pending wake was signalled.
        tokio::time::timeout(std::time::Duration::from_millis(10), wake.notified())
            .await
            .expect("wake signal pending");
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected_at_the_boundary() {
        let (sync, store, _) = fixture();
        let err = sync
            .create_or_update_reminder(rule(Recurrence::Weekly { days: BTreeSet::new() }))
            .unwrap_err();
        assert!(matches!(err, SyncError::Rule(RuleError::EmptyWeekdaySet)));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_the_snapshot() {
        let (sync, store, _) = fixture();
        let mut r = rule(Recurrence::Daily);
        sync.create_or_update_reminder(r.clone()).unwrap();

        r.time_of_day = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        sync.create_or_update_reminder(r.clone()).unwrap();

        let entries = store.load_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rule.time_of_day, r.time_of_day);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_it_existed() {
        let (sync, store, _) = fixture();
        let r = rule(Recurrence::Daily);
        sync.create_or_update_reminder(r.clone()).unwrap();

        assert!(sync.delete_reminder(r.reminder_id).unwrap());
        assert!(!sync.delete_reminder(r.reminder_id).unwrap());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_does_not_touch_the_store() {
        let (sync, store, _) = fixture();
        let r = rule(Recurrence::Daily);
        sync.create_or_update_reminder(r.clone()).unwrap();
        let before = store.load_all().unwrap();

        sync.pause_plan(r.plan_id);
        sync.resume_plan(r.plan_id);
        assert_eq!(store.load_all().unwrap(), before);
    }
}
