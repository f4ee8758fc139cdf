//! # FitPulse Scheduler
//!
//! Recurring reminder scheduling & notification dispatch engine.
//! Turns a reminder rule (time of day + weekday pattern) attached to a
//! fitness plan into reliably-delivered, non-duplicated notifications.
//!
//! ## Guarantees
//! - At-most-one delivery per scheduled occurrence
//! - SQLite persistence — survives restarts without losing or duplicating work
//! - Immediate reaction to pause / resume / delete / edit
//! - Bounded retries against a flaky delivery channel
//!
//! ## Architecture
//! ```text
//! LifecycleSync (CRUD events)          ReminderEngine (single loop)
//!   ├── create/update → upsert + wake    ├── sleep until min(next_fire)
//!   ├── delete        → remove + wake    │   (or early wake on mutation)
//!   ├── plan delete   → cascade + wake   ├── list_due(now)
//!   └── pause/resume  → PlanGate only    ├── advance BEFORE handing off
//!                                        └── gate open? → worker pool
//!                                                           │
//!                                        Dispatcher ────────┘
//!                                          ├── payload from PlanDirectory
//!                                          ├── 3 attempts, 1s/2s backoff
//!                                          └── terminal failures → log
//! ```

pub mod channels;
pub mod dispatch;
pub mod engine;
pub mod gate;
pub mod plans;
pub mod rule;
pub mod store;
pub mod sync;
pub mod trigger;

pub use channels::{DeliveryChannel, DeliveryError, LogChannel, ReminderNotification, WebhookChannel};
pub use dispatch::{AttemptOutcome, DeliveryAttempt, DispatchOutcome, Dispatcher, RetryPolicy};
pub use engine::{ReminderEngine, TickSummary};
pub use gate::{PlanGate, PlanStatus};
pub use plans::{ExerciseSummary, Intensity, InMemoryPlanDirectory, PlanDirectory, PlanSummary};
pub use rule::{Recurrence, ReminderRule, RuleError};
pub use store::{ScheduleEntry, ScheduleStore, SqliteStore, StoreError, TerminalFailure};
pub use sync::{LifecycleSync, SyncError};
