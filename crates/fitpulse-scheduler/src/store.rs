//! SQLite-backed schedule store — the single source of truth after a crash.
//!
//! One record per reminder id: rule snapshot + next-fire instant. On process
//! start this is the only state used to rebuild the loop's ordering; no
//! in-memory state survives a restart. Also holds the durable terminal
//! delivery-failure log for observability.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Timelike, Utc};
use fitpulse_core::{PlanId, ReminderId, ScheduleKey};
use rusqlite::Connection;
use thiserror::Error;

use crate::rule::{Recurrence, ReminderRule};

/// Store-level failures. The scheduling loop treats these as cycle-fatal
/// and backs off rather than dropping due occurrences.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schedule db open: {0}")]
    Open(String),

    #[error("schedule db: {0}")]
    Query(String),
}

/// One persisted schedule record: rule snapshot + pending occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub rule: ReminderRule,
    pub next_fire: DateTime<Utc>,
}

/// A delivery that exhausted its retries (or failed permanently).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    pub plan_id: PlanId,
    pub reminder_id: ReminderId,
    pub occurrence: DateTime<Utc>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl TerminalFailure {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey { plan_id: self.plan_id, reminder_id: self.reminder_id }
    }
}

/// Contract the storage layer must satisfy. All operations are atomic with
/// respect to a single reminder id; the engine does not prescribe SQLite,
/// it ships [`SqliteStore`] as the default implementation.
pub trait ScheduleStore: Send + Sync {
    /// Insert or replace the full snapshot for a reminder.
    fn upsert(&self, rule: &ReminderRule, next_fire: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete one reminder's entry. Returns whether it existed.
    fn remove(&self, reminder_id: ReminderId) -> Result<bool, StoreError>;

    /// Cascade-delete every reminder of a plan. Returns the count removed.
    fn remove_plan(&self, plan_id: PlanId) -> Result<usize, StoreError>;

    /// Enabled entries with `next_fire <= as_of`, ordered by instant
    /// ascending then reminder id (deterministic tie-break).
    fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, StoreError>;

    /// Update just the timestamp after a dispatch cycle, but only if the
    /// stored instant still matches what the cycle observed in `list_due`.
    /// Returns false when an interleaved edit already replaced the
    /// snapshot, in which case the edited schedule wins.
    fn advance(
        &self,
        reminder_id: ReminderId,
        observed: DateTime<Utc>,
        next_fire: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Minimum next-fire instant over enabled entries (the loop deadline).
    fn next_wake(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Every stored entry, re-validated. Used for the restart rebuild.
    fn load_all(&self) -> Result<Vec<ScheduleEntry>, StoreError>;

    /// Append to the terminal delivery-failure log.
    fn record_failure(&self, failure: &TerminalFailure) -> Result<(), StoreError>;

    /// Most recent terminal failures, newest first.
    fn recent_failures(&self, limit: usize) -> Result<Vec<TerminalFailure>, StoreError>;
}

/// SQLite implementation. The single connection behind a mutex serializes
/// all per-reminder operations, which is what prevents a race between a
/// user edit and an in-flight advance.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the schedule database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Query("connection mutex poisoned".into()))
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?
            .execute_batch(
                "
            -- One record per reminder: rule snapshot + pending occurrence
            CREATE TABLE IF NOT EXISTS reminder_schedule (
                reminder_id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                hour INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                second INTEGER NOT NULL,
                recurrence TEXT NOT NULL,               -- 'daily', 'weekly', 'custom'
                days_of_week TEXT NOT NULL DEFAULT '[]', -- JSON array of 1-7
                enabled INTEGER NOT NULL DEFAULT 1,
                next_fire TEXT NOT NULL                  -- RFC3339 UTC
            );
            CREATE INDEX IF NOT EXISTS idx_schedule_plan ON reminder_schedule(plan_id);
            CREATE INDEX IF NOT EXISTS idx_schedule_next ON reminder_schedule(next_fire);

            -- Terminal delivery failures (observability)
            CREATE TABLE IF NOT EXISTS delivery_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reminder_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                occurrence TEXT NOT NULL,
                reason TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| StoreError::Query(format!("migration: {e}")))
    }

    /// Rebuild a schedule entry from raw columns, re-validating the rule.
    /// Corrupt rows yield an error and are skipped by the callers below.
    fn parse_row(raw: RawRow) -> Result<ScheduleEntry, String> {
        let reminder_id = ReminderId::parse(&raw.reminder_id)
            .ok_or_else(|| format!("bad reminder id '{}'", raw.reminder_id))?;
        let plan_id =
            PlanId::parse(&raw.plan_id).ok_or_else(|| format!("bad plan id '{}'", raw.plan_id))?;
        let time_of_day = chrono::NaiveTime::from_hms_opt(raw.hour, raw.minute, raw.second)
            .ok_or_else(|| format!("bad time of day {}:{}:{}", raw.hour, raw.minute, raw.second))?;
        let days: BTreeSet<u8> = serde_json::from_str(&raw.days_of_week)
            .map_err(|e| format!("bad weekday set: {e}"))?;
        let recurrence = Recurrence::from_parts(&raw.recurrence, days)
            .ok_or_else(|| format!("unknown recurrence kind '{}'", raw.recurrence))?;
        let next_fire = DateTime::parse_from_rfc3339(&raw.next_fire)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| format!("bad next_fire timestamp: {e}"))?;

        let rule = ReminderRule {
            reminder_id,
            plan_id,
            time_of_day,
            recurrence,
            enabled: raw.enabled,
        };
        rule.validate().map_err(|e| e.to_string())?;

        Ok(ScheduleEntry { rule, next_fire })
    }

    fn query_entries(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ScheduleEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(|e| StoreError::Query(e.to_string()))?;
        let raws = stmt
            .query_map(params, |row| {
                Ok(RawRow {
                    reminder_id: row.get(0)?,
                    plan_id: row.get(1)?,
                    hour: row.get(2)?,
                    minute: row.get(3)?,
                    second: row.get(4)?,
                    recurrence: row.get(5)?,
                    days_of_week: row.get(6)?,
                    enabled: row.get::<_, i32>(7)? != 0,
                    next_fire: row.get(8)?,
                })
            })
            .map_err(|e| StoreError::Query(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        // Quarantine corrupt rows instead of crashing the loop.
        let mut entries = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = raw.reminder_id.clone();
            match Self::parse_row(raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("⚠️ Skipping corrupt schedule entry {id}: {e}"),
            }
        }
        Ok(entries)
    }
}

const ENTRY_COLUMNS: &str =
    "reminder_id, plan_id, hour, minute, second, recurrence, days_of_week, enabled, next_fire";

struct RawRow {
    reminder_id: String,
    plan_id: String,
    hour: u32,
    minute: u32,
    second: u32,
    recurrence: String,
    days_of_week: String,
    enabled: bool,
    next_fire: String,
}

impl ScheduleStore for SqliteStore {
    fn upsert(&self, rule: &ReminderRule, next_fire: DateTime<Utc>) -> Result<(), StoreError> {
        let days = serde_json::to_string(&rule.recurrence.days())
            .map_err(|e| StoreError::Query(e.to_string()))?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO reminder_schedule
                 (reminder_id, plan_id, hour, minute, second, recurrence, days_of_week, enabled, next_fire)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    rule.reminder_id.to_string(),
                    rule.plan_id.to_string(),
                    rule.time_of_day.hour(),
                    rule.time_of_day.minute(),
                    rule.time_of_day.second(),
                    rule.recurrence.kind(),
                    days,
                    rule.enabled as i32,
                    next_fire.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Query(format!("upsert: {e}")))?;
        Ok(())
    }

    fn remove(&self, reminder_id: ReminderId) -> Result<bool, StoreError> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM reminder_schedule WHERE reminder_id = ?1",
                [reminder_id.to_string()],
            )
            .map_err(|e| StoreError::Query(format!("remove: {e}")))?;
        Ok(n > 0)
    }

    fn remove_plan(&self, plan_id: PlanId) -> Result<usize, StoreError> {
        self.conn()?
            .execute("DELETE FROM reminder_schedule WHERE plan_id = ?1", [plan_id.to_string()])
            .map_err(|e| StoreError::Query(format!("remove_plan: {e}")))
    }

    fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, StoreError> {
        let as_of = as_of.to_rfc3339();
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM reminder_schedule
                 WHERE enabled = 1 AND next_fire <= ?1
                 ORDER BY next_fire ASC, reminder_id ASC"
            ),
            &[&as_of as &dyn rusqlite::ToSql],
        )
    }

    fn advance(
        &self,
        reminder_id: ReminderId,
        observed: DateTime<Utc>,
        next_fire: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let n = self
            .conn()?
            .execute(
                "UPDATE reminder_schedule
                 SET next_fire = ?1 WHERE reminder_id = ?2 AND next_fire = ?3",
                rusqlite::params![
                    next_fire.to_rfc3339(),
                    reminder_id.to_string(),
                    observed.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Query(format!("advance: {e}")))?;
        Ok(n > 0)
    }

    fn next_wake(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let min: Option<String> = conn
            .query_row(
                "SELECT MIN(next_fire) FROM reminder_schedule WHERE enabled = 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::Query(format!("next_wake: {e}")))?;
        Ok(min
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)))
    }

    fn load_all(&self) -> Result<Vec<ScheduleEntry>, StoreError> {
        self.query_entries(
            &format!("SELECT {ENTRY_COLUMNS} FROM reminder_schedule ORDER BY reminder_id"),
            &[],
        )
    }

    fn record_failure(&self, failure: &TerminalFailure) -> Result<(), StoreError> {
        self.conn()?
            .execute(
                "INSERT INTO delivery_failures (reminder_id, plan_id, occurrence, reason, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    failure.reminder_id.to_string(),
                    failure.plan_id.to_string(),
                    failure.occurrence.to_rfc3339(),
                    failure.reason,
                    failure.recorded_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Query(format!("record_failure: {e}")))?;
        Ok(())
    }

    fn recent_failures(&self, limit: usize) -> Result<Vec<TerminalFailure>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT reminder_id, plan_id, occurrence, reason, recorded_at
                 FROM delivery_failures ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| StoreError::Query(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut failures = Vec::with_capacity(rows.len());
        for (reminder_id, plan_id, occurrence, reason, recorded_at) in rows {
            let (Some(reminder_id), Some(plan_id)) =
                (ReminderId::parse(&reminder_id), PlanId::parse(&plan_id))
            else {
                tracing::warn!("⚠️ Skipping corrupt failure record for reminder {reminder_id}");
                continue;
            };
            let parse_ts = |s: &str| {
                DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).ok()
            };
            let (Some(occurrence), Some(recorded_at)) =
                (parse_ts(&occurrence), parse_ts(&recorded_at))
            else {
                tracing::warn!("⚠️ Skipping corrupt failure record for reminder {reminder_id}");
                continue;
            };
            failures.push(TerminalFailure { plan_id, reminder_id, occurrence, reason, recorded_at });
        }
        Ok(failures)
    }
}
