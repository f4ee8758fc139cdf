//! Scheduling loop — the single coordinating task that owns the time
//! ordering and hands due reminders to dispatch workers.
//!
//! Per-occurrence state machine: Pending → Due → {Dispatched | Suppressed}
//! → Pending(next). The loop sleeps until the earliest next-fire instant,
//! or is woken early by a mutation signal so a newly created reminder or a
//! just-edited time can pre-empt a long sleep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use fitpulse_core::ScheduleKey;
use tokio::sync::{Notify, Semaphore};

use crate::dispatch::Dispatcher;
use crate::gate::PlanGate;
use crate::store::{ScheduleStore, StoreError};
use crate::trigger;

const STORE_RETRY_INITIAL: Duration = Duration::from_millis(500);
const STORE_RETRY_CAP: Duration = Duration::from_secs(8);

/// What one evaluation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Occurrences handed to the worker pool.
    pub dispatched: Vec<ScheduleKey>,
    /// Occurrences that reached their instant while their plan was not
    /// active. Advanced like dispatched ones, just not delivered.
    pub suppressed: Vec<ScheduleKey>,
}

/// The scheduling loop. One instance per process; all decisions are made
/// here, dispatch work is fire-and-forget on the bounded worker pool.
pub struct ReminderEngine {
    store: Arc<dyn ScheduleStore>,
    gate: Arc<PlanGate>,
    dispatcher: Arc<Dispatcher>,
    wake: Arc<Notify>,
    workers: Arc<Semaphore>,
    tz: FixedOffset,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        gate: Arc<PlanGate>,
        dispatcher: Arc<Dispatcher>,
        wake: Arc<Notify>,
        tz: FixedOffset,
        workers: usize,
    ) -> Self {
        Self {
            store,
            gate,
            dispatcher,
            wake,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tz,
        }
    }

    /// The mutation signal shared with the lifecycle synchronizer.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Run the loop forever. On start the store is the sole source of
    /// truth: the time ordering is rebuilt from it and occurrences missed
    /// while the process was down resolve to their next future instant —
    /// dropped, not bursted.
    pub async fn run(&self) {
        let restored = self.store_retry("load_all", |s| s.load_all()).await;
        tracing::info!("⏰ Reminder engine started ({} schedule entries restored)", restored.len());

        loop {
            let deadline = self.store_retry("next_wake", |s| s.next_wake()).await;
            match deadline {
                Some(at) => {
                    let sleep_for = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(sleep_for) => {}
                    }
                }
                // Nothing scheduled: sleep until a mutation wakes us.
                None => self.wake.notified().await,
            }
            self.tick(Utc::now()).await;
        }
    }

    /// One evaluation pass over everything due at `now`.
    ///
    /// Each due entry is advanced to its next instant *before* the
    /// occurrence is released to a worker: occurrence N+1 can never be
    /// computed or dispatched before occurrence N's advance completed.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let due = self.store_retry("list_due", |s| s.list_due(now)).await;
        let mut summary = TickSummary::default();

        for entry in due {
            let key = entry.rule.key();
            let Some(next) = trigger::next_fire(&entry.rule, now, self.tz) else {
                // Store-side validation makes this unreachable for loaded
                // rows; guard anyway so one bad rule cannot spin the loop.
                tracing::warn!("⚠️ Reminder {key} matches no future instant, leaving it parked");
                continue;
            };
            let advanced = self
                .store_retry("advance", |s| s.advance(key.reminder_id, entry.next_fire, next))
                .await;
            if !advanced {
                // A user edit landed after list_due read this entry; the
                // edited schedule wins and the stale occurrence is dropped.
                tracing::debug!("✏️ Reminder {key} edited mid-cycle, deferring to its new schedule");
                continue;
            }

            if self.gate.is_dispatchable(key.plan_id) {
                let dispatcher = self.dispatcher.clone();
                let workers = self.workers.clone();
                let occurrence = entry.next_fire;
                tokio::spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    dispatcher.dispatch(key, occurrence).await;
                });
                summary.dispatched.push(key);
            } else {
                tracing::debug!("🔕 Suppressed reminder {key} (plan not active)");
                summary.suppressed.push(key);
            }
        }

        summary
    }

    /// Store operations are cycle-fatal when they fail: back off and retry
    /// rather than dropping due occurrences, since losing an advance would
    /// either duplicate or permanently stall a reminder.
    async fn store_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&dyn ScheduleStore) -> Result<T, StoreError>,
    ) -> T {
        let mut backoff = STORE_RETRY_INITIAL;
        loop {
            match op(self.store.as_ref()) {
                Ok(value) => return value,
                Err(e) => {
                    tracing::warn!("⚠️ Schedule store {what} failed: {e}; retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(STORE_RETRY_CAP);
                }
            }
        }
    }
}
