//! Plan-management collaborator interface.
//!
//! The engine does not own plan or exercise data; it queries the injected
//! [`PlanDirectory`] at dispatch time for the content the notification
//! needs. Lifecycle transitions (pause/resume/delete) arrive separately as
//! synchronous events through the `LifecycleSync` — there is no polling.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use fitpulse_core::PlanId;
use serde::{Deserialize, Serialize};

/// Exercise intensity, as declared on the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intensity::Low => write!(f, "low"),
            Intensity::Medium => write!(f, "medium"),
            Intensity::High => write!(f, "high"),
        }
    }
}

/// One exercise line in a notification body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSummary {
    pub name: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub repetitions: Option<u32>,
    #[serde(default)]
    pub intensity: Option<Intensity>,
}

/// What the dispatcher needs to render a notification for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub name: String,
    /// Ordered as the plan declares them.
    pub exercises: Vec<ExerciseSummary>,
}

/// Read-only view into the plan-management collaborator.
///
/// Returns `None` when the plan no longer exists; the dispatcher then
/// skips the occurrence silently (the cascade delete already dropped its
/// schedule entries).
#[async_trait]
pub trait PlanDirectory: Send + Sync {
    async fn plan_summary(&self, plan_id: PlanId) -> Option<PlanSummary>;
}

/// Map-backed directory for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryPlanDirectory {
    plans: RwLock<HashMap<PlanId, PlanSummary>>,
}

impl InMemoryPlanDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plan_id: PlanId, summary: PlanSummary) {
        let mut plans = self.plans.write().unwrap_or_else(|e| e.into_inner());
        plans.insert(plan_id, summary);
    }

    pub fn remove(&self, plan_id: PlanId) {
        let mut plans = self.plans.write().unwrap_or_else(|e| e.into_inner());
        plans.remove(&plan_id);
    }
}

#[async_trait]
impl PlanDirectory for InMemoryPlanDirectory {
    async fn plan_summary(&self, plan_id: PlanId) -> Option<PlanSummary> {
        let plans = self.plans.read().unwrap_or_else(|e| e.into_inner());
        plans.get(&plan_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_directory() {
        let dir = InMemoryPlanDirectory::new();
        let plan = PlanId::new();
        assert!(dir.plan_summary(plan).await.is_none());

        dir.insert(
            plan,
            PlanSummary { name: "Morning routine".into(), exercises: Vec::new() },
        );
        assert_eq!(dir.plan_summary(plan).await.unwrap().name, "Morning routine");

        dir.remove(plan);
        assert!(dir.plan_summary(plan).await.is_none());
    }
}
