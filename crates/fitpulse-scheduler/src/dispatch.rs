//! Notification dispatcher — delivers one occurrence with bounded retries.
//!
//! Retries never span dispatch cycles: by the time a dispatch starts, the
//! occurrence has already been advanced in the store, so a failed reminder
//! can never block or duplicate future ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fitpulse_core::ScheduleKey;

use crate::channels::{DeliveryChannel, DeliveryError, ReminderNotification};
use crate::plans::PlanDirectory;
use crate::store::{ScheduleStore, TerminalFailure};

/// Retry behavior for one dispatch cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per occurrence, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per retry (1s, 2s, ...).
    pub base_backoff: Duration,
    /// Per-attempt timeout. Must stay below the backoff that follows it so
    /// a hung attempt never eats into the next one.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_millis(800),
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
}

/// Record of one dispatch try, observable for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// How a dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Plan no longer exists; nothing to send.
    Skipped,
    /// Terminal failure, recorded in the failure log.
    Failed,
}

/// Delivers one notification occurrence through the injected channel.
pub struct Dispatcher {
    plans: Arc<dyn PlanDirectory>,
    channel: Arc<dyn DeliveryChannel>,
    store: Arc<dyn ScheduleStore>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        plans: Arc<dyn PlanDirectory>,
        channel: Arc<dyn DeliveryChannel>,
        store: Arc<dyn ScheduleStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self { plans, channel, store, policy }
    }

    /// One dispatch cycle: build the payload, then attempt delivery with
    /// exponential backoff. Returns the outcome plus every attempt record.
    pub async fn dispatch(
        &self,
        key: ScheduleKey,
        occurrence: DateTime<Utc>,
    ) -> (DispatchOutcome, Vec<DeliveryAttempt>) {
        let Some(summary) = self.plans.plan_summary(key.plan_id).await else {
            tracing::debug!("Plan {} gone, skipping occurrence {occurrence}", key.plan_id);
            return (DispatchOutcome::Skipped, Vec::new());
        };
        let notification = ReminderNotification::render(key, occurrence, &summary);

        let mut attempts = Vec::new();
        let mut last_reason = String::new();

        for attempt in 1..=self.policy.max_attempts {
            let result =
                tokio::time::timeout(self.policy.attempt_timeout, self.channel.deliver(&notification))
                    .await;

            match result {
                Ok(Ok(())) => {
                    attempts.push(DeliveryAttempt { attempt, outcome: AttemptOutcome::Success });
                    tracing::info!(
                        "✅ Delivered reminder {key} via {} (attempt {attempt})",
                        self.channel.name()
                    );
                    return (DispatchOutcome::Delivered, attempts);
                }
                Ok(Err(DeliveryError::Permanent(reason))) => {
                    attempts.push(DeliveryAttempt {
                        attempt,
                        outcome: AttemptOutcome::PermanentFailure(reason.clone()),
                    });
                    self.record_terminal(key, occurrence, &reason);
                    return (DispatchOutcome::Failed, attempts);
                }
                Ok(Err(DeliveryError::Transient(reason))) => {
                    tracing::warn!("⚠️ Attempt {attempt} for reminder {key} failed: {reason}");
                    attempts.push(DeliveryAttempt {
                        attempt,
                        outcome: AttemptOutcome::TransientFailure(reason.clone()),
                    });
                    last_reason = reason;
                }
                Err(_) => {
                    let reason = format!(
                        "attempt timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    );
                    tracing::warn!("⚠️ Attempt {attempt} for reminder {key}: {reason}");
                    attempts.push(DeliveryAttempt {
                        attempt,
                        outcome: AttemptOutcome::TransientFailure(reason.clone()),
                    });
                    last_reason = reason;
                }
            }

            if attempt < self.policy.max_attempts {
                // Clamp the exponent so an oversized max_attempts config
                // saturates the backoff instead of overflowing the shift.
                let exp = (attempt - 1).min(31);
                let backoff = self.policy.base_backoff.saturating_mul(1u32 << exp);
                tokio::time::sleep(backoff).await;
            }
        }

        self.record_terminal(key, occurrence, &last_reason);
        (DispatchOutcome::Failed, attempts)
    }

    fn record_terminal(&self, key: ScheduleKey, occurrence: DateTime<Utc>, reason: &str) {
        tracing::error!("❌ Reminder {key} occurrence {occurrence} failed terminally: {reason}");
        let failure = TerminalFailure {
            plan_id: key.plan_id,
            reminder_id: key.reminder_id,
            occurrence,
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.record_failure(&failure) {
            tracing::warn!("⚠️ Could not persist terminal failure for {key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DeliveryChannel;
    use crate::plans::{InMemoryPlanDirectory, PlanSummary};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use fitpulse_core::{PlanId, ReminderId};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a transient error N times, then succeeds.
    struct FlakyChannel {
        failures_left: AtomicU32,
        delivered: AtomicU32,
    }

    impl FlakyChannel {
        fn new(failures: u32) -> Self {
            Self { failures_left: AtomicU32::new(failures), delivered: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl DeliveryChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _n: &ReminderNotification) -> Result<(), DeliveryError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                return Err(DeliveryError::Transient("connection reset".into()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingChannel;

    #[async_trait]
    impl DeliveryChannel for RejectingChannel {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn deliver(&self, _n: &ReminderNotification) -> Result<(), DeliveryError> {
            Err(DeliveryError::Permanent("invalid destination".into()))
        }
    }

    struct HangingChannel;

    #[async_trait]
    impl DeliveryChannel for HangingChannel {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn deliver(&self, _n: &ReminderNotification) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    fn fixture(channel: Arc<dyn DeliveryChannel>) -> (Dispatcher, Arc<SqliteStore>, ScheduleKey) {
        let plan_id = PlanId::new();
        let key = ScheduleKey { plan_id, reminder_id: ReminderId::new() };
        let plans = Arc::new(InMemoryPlanDirectory::new());
        plans.insert(plan_id, PlanSummary { name: "Plan".into(), exercises: Vec::new() });
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(plans, channel, store.clone(), RetryPolicy::default());
        (dispatcher, store, key)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let channel = Arc::new(FlakyChannel::new(2));
        let (dispatcher, store, key) = fixture(channel.clone());

        let started = tokio::time::Instant::now();
        let (outcome, attempts) = dispatcher.dispatch(key, Utc::now()).await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(attempts.len(), 3);
        assert!(matches!(attempts[0].outcome, AttemptOutcome::TransientFailure(_)));
        assert!(matches!(attempts[1].outcome, AttemptOutcome::TransientFailure(_)));
        assert_eq!(attempts[2].outcome, AttemptOutcome::Success);
        assert_eq!(channel.delivered.load(Ordering::SeqCst), 1);

        // Backoffs of 1s then 2s elapsed between the three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");

        // Success leaves no terminal failure behind.
        assert!(store.recent_failures(10).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_transient_records_terminal_failure() {
        let (dispatcher, store, key) = fixture(Arc::new(FlakyChannel::new(10)));
        let occurrence = Utc::now();

        let (outcome, attempts) = dispatcher.dispatch(key, occurrence).await;
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(attempts.len(), 3);

        let failures = store.recent_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key(), key);
        assert_eq!(failures[0].occurrence, occurrence);
        assert!(failures[0].reason.contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_short_circuits() {
        let (dispatcher, store, key) = fixture(Arc::new(RejectingChannel));

        let started = tokio::time::Instant::now();
        let (outcome, attempts) = dispatcher.dispatch(key, Utc::now()).await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(attempts.len(), 1);
        assert!(matches!(attempts[0].outcome, AttemptOutcome::PermanentFailure(_)));
        // No backoffs were taken.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.recent_failures(10).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempts_time_out_as_transient() {
        let (dispatcher, store, key) = fixture(Arc::new(HangingChannel));

        let (outcome, attempts) = dispatcher.dispatch(key, Utc::now()).await;
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(attempts.len(), 3);
        for attempt in &attempts {
            assert!(matches!(attempt.outcome, AttemptOutcome::TransientFailure(_)));
        }
        assert!(store.recent_failures(10).unwrap()[0].reason.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_attempt_budget_saturates_backoff() {
        let plan_id = PlanId::new();
        let key = ScheduleKey { plan_id, reminder_id: ReminderId::new() };
        let plans = Arc::new(InMemoryPlanDirectory::new());
        plans.insert(plan_id, PlanSummary { name: "Plan".into(), exercises: Vec::new() });
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let policy = RetryPolicy {
            max_attempts: 40,
            base_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let dispatcher =
            Dispatcher::new(plans, Arc::new(FlakyChannel::new(u32::MAX)), store.clone(), policy);

        let (outcome, attempts) = dispatcher.dispatch(key, Utc::now()).await;
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(attempts.len(), 40);
        assert_eq!(store.recent_failures(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_plan_is_skipped() {
        let key = ScheduleKey { plan_id: PlanId::new(), reminder_id: ReminderId::new() };
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryPlanDirectory::new()),
            Arc::new(FlakyChannel::new(0)),
            store.clone(),
            RetryPolicy::default(),
        );

        let (outcome, attempts) = dispatcher.dispatch(key, Utc::now()).await;
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(attempts.is_empty());
        assert!(store.recent_failures(10).unwrap().is_empty());
    }
}
