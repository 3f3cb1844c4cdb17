use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnError, DisplayFromStr, PickFirst, serde_as};
use tracing::debug;

use crate::clock::EpochMs;

/// Point-in-time cockpit readout shown to the crew.
///
/// Values are passed through exactly as the server sent them; range validation belongs to
/// whoever produces the messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HudState {
    /// Remaining fuel.
    pub fuel: f64,
    /// Hull integrity.
    pub hull: f64,
    /// Crew headcount or morale, depending on the mission ruleset.
    pub crew: f64,
    /// Running success estimate.
    pub success: f64,
    /// Science gained or lost in the current phase.
    pub science_delta: f64,
    /// Name of the current mission phase.
    pub phase: String,
}

/// Partial HUD readout where every field is optional.
///
/// Fields decode independently: numbers sent as strings are parsed, and a value of the wrong
/// shape reads as absent instead of failing the whole message.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HudFields {
    /// Remaining fuel.
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<f64>,
    /// Hull integrity.
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hull: Option<f64>,
    /// Crew headcount or morale.
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew: Option<f64>,
    /// Running success estimate.
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<f64>,
    /// Science gained or lost in the current phase.
    #[serde_as(deserialize_as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub science_delta: Option<f64>,
    /// Name of the current mission phase.
    #[serde_as(deserialize_as = "DefaultOnError")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl HudFields {
    /// Shallow merge: present fields overwrite, absent ones are carried over from `base`.
    pub fn overlay(&self, base: &HudState) -> HudState {
        HudState {
            fuel: self.fuel.unwrap_or(base.fuel),
            hull: self.hull.unwrap_or(base.hull),
            crew: self.crew.unwrap_or(base.crew),
            success: self.success.unwrap_or(base.success),
            science_delta: self.science_delta.unwrap_or(base.science_delta),
            phase: self.phase.clone().unwrap_or_else(|| base.phase.clone()),
        }
    }

    /// Full replacement: absent fields fall back to their type default.
    pub fn to_full_state(&self) -> HudState {
        self.overlay(&HudState::default())
    }

    /// Whether no field is present at all.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<&HudState> for HudFields {
    fn from(state: &HudState) -> Self {
        Self {
            fuel: Some(state.fuel),
            hull: Some(state.hull),
            crew: Some(state.crew),
            success: Some(state.success),
            science_delta: Some(state.science_delta),
            phase: Some(state.phase.clone()),
        }
    }
}

/// HUD update delivered either by the push channel or by a polled snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct HudMessage {
    /// Mission the update belongs to.
    pub mission_id: String,
    /// Server epoch milliseconds; the only ordering key.
    pub server_timestamp: EpochMs,
    /// Fields carried by the update.
    pub fields: HudFields,
    /// Whether `fields` is an authoritative replacement rather than a delta.
    pub is_full_snapshot: bool,
}

/// Applies HUD messages under a monotonic timestamp guard.
///
/// A message whose timestamp is lower than or equal to the last applied one is dropped, so
/// an equal-timestamp tie always favours whichever message was applied first.
#[derive(Debug, Clone, Default)]
pub struct HudReconciler {
    last_applied: Option<EpochMs>,
}

impl HudReconciler {
    /// Create a reconciler that has not applied anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the last message that was applied.
    pub fn last_applied(&self) -> Option<EpochMs> {
        self.last_applied
    }

    /// Whether a message stamped `server_timestamp` would be dropped.
    pub fn is_stale(&self, server_timestamp: EpochMs) -> bool {
        self.last_applied
            .is_some_and(|last| server_timestamp <= last)
    }

    /// Merge `message` into `current`, returning `current` unchanged when the message is stale.
    pub fn merge(&mut self, current: &HudState, message: &HudMessage) -> HudState {
        self.try_merge(current, message)
            .unwrap_or_else(|| current.clone())
    }

    /// Same as [`merge`](Self::merge) but reports a dropped message as `None`.
    pub fn try_merge(&mut self, current: &HudState, message: &HudMessage) -> Option<HudState> {
        if self.is_stale(message.server_timestamp) {
            debug!(
                mission_id = %message.mission_id,
                server_timestamp = message.server_timestamp,
                last_applied = ?self.last_applied,
                "dropping stale HUD message"
            );
            return None;
        }

        let next = if message.is_full_snapshot {
            message.fields.to_full_state()
        } else {
            message.fields.overlay(current)
        };
        self.last_applied = Some(message.server_timestamp);

        Some(next)
    }

    /// Apply a message whose timestamp carries no ordering information.
    ///
    /// The guard is skipped and the watermark stays where it was, so later timed messages are
    /// judged only against each other.
    pub fn apply_unordered(&self, current: &HudState, message: &HudMessage) -> HudState {
        debug!(
            mission_id = %message.mission_id,
            last_applied = ?self.last_applied,
            "applying HUD message without ordering key"
        );
        if message.is_full_snapshot {
            message.fields.to_full_state()
        } else {
            message.fields.overlay(current)
        }
    }
}
