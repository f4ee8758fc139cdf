//! # FitPulse Core
//!
//! Shared building blocks for the FitPulse reminder engine:
//! - strongly-typed plan/reminder identities,
//! - the error taxonomy,
//! - TOML configuration (`~/.fitpulse/config.toml`).

pub mod config;
pub mod error;
pub mod ids;

pub use config::{ExerciseConfig, FitPulseConfig, PlanConfig, ReminderConfig};
pub use error::{FitPulseError, Result};
pub use ids::{PlanId, ReminderId, ScheduleKey};
