//! Delivery channels — where a reminder notification actually goes.
//!
//! The channel is injected; the engine only knows the [`DeliveryChannel`]
//! trait. Ships a log channel (development) and a generic HTTP webhook
//! push channel (production).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fitpulse_core::{PlanId, ReminderId, ScheduleKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plans::PlanSummary;

/// Why a delivery attempt failed. Transient failures are retried within
/// the dispatch cycle; permanent ones short-circuit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// A rendered notification for one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderNotification {
    pub plan_id: PlanId,
    pub reminder_id: ReminderId,
    pub occurrence: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl ReminderNotification {
    /// Render the payload from a plan summary: title with the plan name,
    /// body listing the exercises in declared order.
    pub fn render(key: ScheduleKey, occurrence: DateTime<Utc>, plan: &PlanSummary) -> Self {
        Self {
            plan_id: key.plan_id,
            reminder_id: key.reminder_id,
            occurrence,
            title: format!("Workout reminder: {}", plan.name),
            body: render_body(plan),
        }
    }
}

fn render_body(plan: &PlanSummary) -> String {
    if plan.exercises.is_empty() {
        return "No exercises scheduled".into();
    }
    let mut lines = Vec::with_capacity(plan.exercises.len());
    for (idx, exercise) in plan.exercises.iter().enumerate() {
        let mut line = format!("{}. {}", idx + 1, exercise.name);
        if let Some(minutes) = exercise.duration_minutes {
            line.push_str(&format!(" - {minutes} min"));
        } else if let Some(reps) = exercise.repetitions {
            line.push_str(&format!(" - x{reps}"));
        }
        if let Some(intensity) = exercise.intensity {
            line.push_str(&format!(" ({intensity})"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// A pluggable delivery backend.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &ReminderNotification) -> Result<(), DeliveryError>;
}

/// Logs the notification instead of pushing it. Always succeeds.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, notification: &ReminderNotification) -> Result<(), DeliveryError> {
        tracing::info!(
            "📣 [{}] {} — {}",
            notification.plan_id,
            notification.title,
            notification.body.replace('\n', " | ")
        );
        Ok(())
    }
}

/// Generic HTTP webhook — POST with JSON body.
pub struct WebhookChannel {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self { url: url.into(), headers, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &ReminderNotification) -> Result<(), DeliveryError> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "plan_id": notification.plan_id.to_string(),
                "reminder_id": notification.reminder_id.to_string(),
                "occurrence": notification.occurrence.to_rfc3339(),
                "title": notification.title,
                "body": notification.body,
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("webhook send failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            // Bad destination or payload: retrying cannot help.
            Err(DeliveryError::Permanent(format!("webhook rejected: {status}")))
        } else {
            Err(DeliveryError::Transient(format!("webhook error: {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{ExerciseSummary, Intensity};

    fn key() -> ScheduleKey {
        ScheduleKey { plan_id: PlanId::new(), reminder_id: ReminderId::new() }
    }

    #[test]
    fn test_render_lists_exercises_in_order() {
        let plan = PlanSummary {
            name: "Morning routine".into(),
            exercises: vec![
                ExerciseSummary {
                    name: "Jogging".into(),
                    duration_minutes: Some(20),
                    repetitions: None,
                    intensity: Some(Intensity::Medium),
                },
                ExerciseSummary {
                    name: "Pushups".into(),
                    duration_minutes: None,
                    repetitions: Some(15),
                    intensity: Some(Intensity::High),
                },
                ExerciseSummary {
                    name: "Stretching".into(),
                    duration_minutes: None,
                    repetitions: None,
                    intensity: None,
                },
            ],
        };
        let note = ReminderNotification::render(key(), Utc::now(), &plan);
        assert_eq!(note.title, "Workout reminder: Morning routine");
        assert_eq!(
            note.body,
            "1. Jogging - 20 min (medium)\n2. Pushups - x15 (high)\n3. Stretching"
        );
    }

    #[test]
    fn test_render_empty_plan() {
        let plan = PlanSummary { name: "Rest day".into(), exercises: Vec::new() };
        let note = ReminderNotification::render(key(), Utc::now(), &plan);
        assert_eq!(note.body, "No exercises scheduled");
    }

    #[tokio::test]
    async fn test_log_channel_always_succeeds() {
        let plan = PlanSummary { name: "Test".into(), exercises: Vec::new() };
        let note = ReminderNotification::render(key(), Utc::now(), &plan);
        assert!(LogChannel.deliver(&note).await.is_ok());
    }
}
