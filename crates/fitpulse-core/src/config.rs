//! FitPulse configuration system.

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FitPulseError, Result};
use crate::ids::{PlanId, ReminderId};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitPulseConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Fitness plans (and their reminders) served by this daemon.
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

impl Default for FitPulseConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            notify: NotifyConfig::default(),
            plans: Vec::new(),
        }
    }
}

impl FitPulseConfig {
    /// Load config from the default path (~/.fitpulse/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FitPulseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FitPulseError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FitPulseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the FitPulse home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fitpulse")
    }
}

/// Scheduling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// SQLite schedule database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Deployment time zone as a fixed offset from UTC, in minutes.
    /// All reminder times-of-day are interpreted in this zone.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Max concurrent dispatch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_db_path() -> String {
    "~/.fitpulse/schedule.db".into()
}
fn default_workers() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            utc_offset_minutes: 0,
            workers: default_workers(),
        }
    }
}

impl SchedulerConfig {
    /// The deployment time zone. Falls back to UTC when the configured
    /// offset is out of range.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// A fitness plan declared in the config file.
///
/// Ids are explicit so reminders keep a stable identity across restarts —
/// regenerating them on every boot would orphan the persisted schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub id: PlanId,
    pub name: String,
    #[serde(default)]
    pub exercises: Vec<ExerciseConfig>,
    #[serde(default)]
    pub reminders: Vec<ReminderConfig>,
}

/// One exercise line as shown in notification bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub name: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub repetitions: Option<u32>,
    /// "low", "medium" or "high".
    #[serde(default)]
    pub intensity: Option<String>,
}

/// A reminder rule declared on a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub id: ReminderId,
    /// Local wall-clock time, "HH:MM" or "HH:MM:SS".
    pub time: String,
    /// "daily", "weekly" or "custom".
    #[serde(default = "default_recurrence")]
    pub recurrence: String,
    /// Weekdays 1-7 (Monday = 1); required for weekly/custom.
    #[serde(default)]
    pub days: Vec<u8>,
}

fn default_recurrence() -> String {
    "daily".into()
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Delivery channel: "log" or "webhook".
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Outbound URL for the webhook channel.
    #[serde(default)]
    pub webhook_url: String,
    /// Extra headers for webhook requests.
    #[serde(default)]
    pub webhook_headers: Vec<(String, String)>,
    /// Attempts per occurrence (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Per-attempt timeout. Must stay below `base_backoff_ms`.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_channel() -> String {
    "log".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_attempt_timeout_ms() -> u64 {
    800
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            webhook_url: String::new(),
            webhook_headers: Vec::new(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}
