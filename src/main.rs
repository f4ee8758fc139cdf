//! # FitPulse — Reminder Engine Daemon
//!
//! Runs the recurring reminder scheduling & notification dispatch engine.
//!
//! Usage:
//!   fitpulse                         # Start with ~/.fitpulse/config.toml
//!   fitpulse --config ./dev.toml     # Custom config
//!   fitpulse --failures 20           # Print recent terminal failures and exit

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use fitpulse_core::{FitPulseConfig, PlanConfig, ReminderConfig};
use fitpulse_scheduler::{
    DeliveryChannel, Dispatcher, ExerciseSummary, InMemoryPlanDirectory, Intensity, LifecycleSync,
    LogChannel, PlanGate, PlanSummary, Recurrence, ReminderEngine, ReminderRule, RetryPolicy,
    ScheduleStore, SqliteStore, WebhookChannel,
};

#[derive(Parser)]
#[command(name = "fitpulse", version, about = "⏰ FitPulse — fitness plan reminder engine")]
struct Cli {
    /// Config file path (default: ~/.fitpulse/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Schedule database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Print the N most recent terminal delivery failures and exit
    #[arg(long, value_name = "N")]
    failures: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn parse_intensity(s: &str) -> Result<Intensity> {
    match s {
        "low" => Ok(Intensity::Low),
        "medium" => Ok(Intensity::Medium),
        "high" => Ok(Intensity::High),
        other => Err(anyhow!("unknown intensity '{other}' (expected low/medium/high)")),
    }
}

fn plan_summary_from_config(plan: &PlanConfig) -> Result<PlanSummary> {
    let mut exercises = Vec::with_capacity(plan.exercises.len());
    for exercise in &plan.exercises {
        exercises.push(ExerciseSummary {
            name: exercise.name.clone(),
            duration_minutes: exercise.duration_minutes,
            repetitions: exercise.repetitions,
            intensity: exercise.intensity.as_deref().map(parse_intensity).transpose()?,
        });
    }
    Ok(PlanSummary { name: plan.name.clone(), exercises })
}

fn reminder_rule_from_config(plan: &PlanConfig, reminder: &ReminderConfig) -> Result<ReminderRule> {
    let time = NaiveTime::parse_from_str(&reminder.time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&reminder.time, "%H:%M"))
        .with_context(|| {
            format!("bad reminder time '{}' (expected HH:MM or HH:MM:SS)", reminder.time)
        })?;
    let recurrence = Recurrence::from_parts(&reminder.recurrence, reminder.days.iter().copied().collect())
        .ok_or_else(|| {
            anyhow!("unknown recurrence '{}' (expected daily/weekly/custom)", reminder.recurrence)
        })?;
    Ok(ReminderRule::new(reminder.id, plan.id, time, recurrence))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "fitpulse=debug,fitpulse_scheduler=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => FitPulseConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => FitPulseConfig::load()?,
    };

    let db_path = expand_path(cli.db_path.as_deref().unwrap_or(&config.scheduler.db_path));
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(std::path::Path::new(&db_path))?);

    // --failures: observability query, then exit
    if let Some(limit) = cli.failures {
        let failures = store.recent_failures(limit)?;
        if failures.is_empty() {
            println!("No terminal delivery failures recorded.");
        }
        for f in failures {
            println!("{}  {}  {}", f.recorded_at, f.key(), f.reason);
        }
        return Ok(());
    }

    let channel: Arc<dyn DeliveryChannel> = match config.notify.channel.as_str() {
        "webhook" if !config.notify.webhook_url.is_empty() => Arc::new(WebhookChannel::new(
            config.notify.webhook_url.clone(),
            config.notify.webhook_headers.clone(),
        )),
        "webhook" => {
            tracing::warn!("⚠️ Webhook channel selected but no webhook_url set, falling back to log");
            Arc::new(LogChannel)
        }
        _ => Arc::new(LogChannel),
    };

    let policy = RetryPolicy {
        max_attempts: config.notify.max_attempts.max(1),
        base_backoff: std::time::Duration::from_millis(config.notify.base_backoff_ms),
        attempt_timeout: std::time::Duration::from_millis(config.notify.attempt_timeout_ms),
    };

    let tz = config.scheduler.timezone();
    let gate = Arc::new(PlanGate::new());
    let plans = Arc::new(InMemoryPlanDirectory::new());
    let wake = Arc::new(Notify::new());
    let sync = LifecycleSync::new(store.clone(), gate.clone(), wake.clone(), tz);

    // Declared plans feed the directory; their reminders go through the
    // synchronizer so edits to the config reschedule on the next boot.
    let mut reminder_count = 0usize;
    for plan in &config.plans {
        plans.insert(
            plan.id,
            plan_summary_from_config(plan)
                .with_context(|| format!("plan '{}'", plan.name))?,
        );
        for reminder in &plan.reminders {
            let rule = reminder_rule_from_config(plan, reminder)
                .with_context(|| format!("plan '{}'", plan.name))?;
            sync.create_or_update_reminder(rule)?;
            reminder_count += 1;
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        plans.clone(),
        channel.clone(),
        store.clone(),
        policy,
    ));
    let engine = ReminderEngine::new(
        store,
        gate,
        dispatcher,
        wake,
        tz,
        config.scheduler.workers,
    );

    println!("⏰ FitPulse v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Schedule DB:  {db_path}");
    println!("   📣 Channel:      {}", channel.name());
    println!("   🌍 UTC offset:   {} min", config.scheduler.utc_offset_minutes);
    println!("   👷 Workers:      {}", config.scheduler.workers);
    println!("   📅 Plans:        {} ({reminder_count} reminder(s))", config.plans.len());
    println!();

    engine.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitpulse_core::{ExerciseConfig, PlanId, ReminderId};

    fn plan_config() -> PlanConfig {
        PlanConfig {
            id: PlanId::new(),
            name: "Morning routine".into(),
            exercises: vec![ExerciseConfig {
                name: "Jogging".into(),
                duration_minutes: Some(20),
                repetitions: None,
                intensity: Some("medium".into()),
            }],
            reminders: Vec::new(),
        }
    }

    #[test]
    fn test_declared_plan_converts() {
        let summary = plan_summary_from_config(&plan_config()).unwrap();
        assert_eq!(summary.name, "Morning routine");
        assert_eq!(summary.exercises[0].intensity, Some(Intensity::Medium));
    }

    #[test]
    fn test_unknown_intensity_rejected() {
        let mut plan = plan_config();
        plan.exercises[0].intensity = Some("brutal".into());
        assert!(plan_summary_from_config(&plan).is_err());
    }

    #[test]
    fn test_declared_reminder_converts() {
        let plan = plan_config();
        let reminder = ReminderConfig {
            id: ReminderId::new(),
            time: "07:30".into(),
            recurrence: "weekly".into(),
            days: vec![1, 3, 5],
        };
        let rule = reminder_rule_from_config(&plan, &reminder).unwrap();
        assert_eq!(rule.plan_id, plan.id);
        assert_eq!(rule.time_of_day, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_bad_reminder_time_rejected() {
        let plan = plan_config();
        let reminder = ReminderConfig {
            id: ReminderId::new(),
            time: "25:99".into(),
            recurrence: "daily".into(),
            days: Vec::new(),
        };
        assert!(reminder_rule_from_config(&plan, &reminder).is_err());
    }
}
