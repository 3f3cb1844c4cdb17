use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::state::hud::{HudFields, HudState};

/// Unique identifier for a tentative HUD mutation.
pub type PlanId = Uuid;

/// A tentative HUD delta waiting for server confirmation.
#[derive(Debug, Clone)]
pub struct OptimisticPlan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Fields shown on top of the confirmed state while the plan is pending.
    pub delta: HudFields,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Errors that can occur when planning a tentative mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Another mutation is already pending and must be committed or reverted first.
    #[error("an optimistic update is already pending")]
    AlreadyPending,
}

/// Errors that can occur when resolving a pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No mutation is currently pending.
    #[error("no optimistic update is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending optimistic update {expected} does not match {got}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Confirmed HUD state plus at most one tentative delta layered on top.
///
/// Push and poll merges keep landing in the confirmed state while a plan is pending, so the
/// visible readout is always `confirmed` overlaid with the tentative delta. Commit and revert
/// swap that view in a single step.
#[derive(Debug, Clone, Default)]
pub struct OptimisticHud {
    confirmed: HudState,
    pending: Option<OptimisticPlan>,
}

impl OptimisticHud {
    /// Start from an already confirmed state.
    pub fn new(confirmed: HudState) -> Self {
        Self {
            confirmed,
            pending: None,
        }
    }

    /// Last server-backed state.
    pub fn confirmed(&self) -> &HudState {
        &self.confirmed
    }

    /// Replace the server-backed state, keeping any pending delta on top.
    pub fn set_confirmed(&mut self, confirmed: HudState) {
        self.confirmed = confirmed;
    }

    /// Pending plan, if any.
    pub fn pending(&self) -> Option<&OptimisticPlan> {
        self.pending.as_ref()
    }

    /// How long the pending plan has been waiting for the server.
    pub fn pending_for(&self) -> Option<Duration> {
        self.pending.as_ref().map(|plan| plan.pending_since.elapsed())
    }

    /// What the UI should display right now.
    pub fn view(&self) -> HudState {
        match &self.pending {
            Some(plan) => plan.delta.overlay(&self.confirmed),
            None => self.confirmed.clone(),
        }
    }

    /// Layer a tentative delta over the confirmed state.
    pub fn plan(&mut self, delta: HudFields) -> Result<OptimisticPlan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let plan = OptimisticPlan {
            id: Uuid::new_v4(),
            delta,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Drop the tentative delta and fold the server-confirmed fields into the confirmed state.
    pub fn commit(&mut self, plan_id: PlanId, confirmed: &HudFields) -> Result<HudState, ResolveError> {
        let plan = self.take_pending(plan_id)?;
        self.confirmed = confirmed.overlay(&self.confirmed);
        debug!(
            %plan_id,
            pending_ms = plan.pending_since.elapsed().as_millis() as u64,
            "optimistic update committed"
        );
        Ok(self.view())
    }

    /// Drop the tentative delta, returning to the confirmed state.
    pub fn revert(&mut self, plan_id: PlanId) -> Result<HudState, ResolveError> {
        let plan = self.take_pending(plan_id)?;
        debug!(
            %plan_id,
            pending_ms = plan.pending_since.elapsed().as_millis() as u64,
            "optimistic update reverted"
        );
        Ok(self.view())
    }

    fn take_pending(&mut self, plan_id: PlanId) -> Result<OptimisticPlan, ResolveError> {
        let plan = self.pending.take().ok_or(ResolveError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ResolveError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        Ok(plan)
    }
}
