//! Plan-state gate — read-only suppression check at dispatch time.
//!
//! Pausing a plan never touches the schedule store: the gate is consulted
//! at the moment of dispatch, so a pause takes effect on the very next
//! occurrence and a resume restarts reminders without re-creating rules.
//! Suppressed occurrences still advance, keeping the beat silently.

use std::collections::HashMap;
use std::sync::RwLock;

use fitpulse_core::PlanId;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a plan, mirrored from synchronous lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Paused,
    Deleted,
}

/// In-memory mirror of plan lifecycle state. Plans the engine has never
/// been told about default to Active: lifecycle events are the only status
/// source, and a plan with no events has never been paused or deleted.
#[derive(Debug, Default)]
pub struct PlanGate {
    statuses: RwLock<HashMap<PlanId, PlanStatus>>,
}

impl PlanGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status transition from a lifecycle event.
    pub fn set_status(&self, plan_id: PlanId, status: PlanStatus) {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        statuses.insert(plan_id, status);
    }

    /// Current status; unknown plans are Active.
    pub fn status(&self, plan_id: PlanId) -> PlanStatus {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        statuses.get(&plan_id).copied().unwrap_or(PlanStatus::Active)
    }

    /// True iff notifications for this plan should go out right now.
    pub fn is_dispatchable(&self, plan_id: PlanId) -> bool {
        self.status(plan_id) == PlanStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_plan_is_active() {
        let gate = PlanGate::new();
        assert!(gate.is_dispatchable(PlanId::new()));
    }

    #[test]
    fn test_pause_resume_cycle() {
        let gate = PlanGate::new();
        let plan = PlanId::new();

        gate.set_status(plan, PlanStatus::Paused);
        assert!(!gate.is_dispatchable(plan));
        assert_eq!(gate.status(plan), PlanStatus::Paused);

        gate.set_status(plan, PlanStatus::Active);
        assert!(gate.is_dispatchable(plan));
    }

    #[test]
    fn test_deleted_plan_is_not_dispatchable() {
        let gate = PlanGate::new();
        let plan = PlanId::new();
        gate.set_status(plan, PlanStatus::Deleted);
        assert!(!gate.is_dispatchable(plan));
    }
}
