use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    clock::EpochMs,
    dto::{parse_instant, push::timer_update},
    state::{
        hud::{HudFields, HudMessage},
        timer::{TimerKind, TimerMessage, TimerStatus},
    },
};

/// Full mission snapshot returned by `GET /api/mission/snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionSnapshot {
    /// Mission the snapshot describes.
    pub mission_id: String,
    /// Server epoch milliseconds at which the snapshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<EpochMs>,
    /// Server wall clock when the response was produced, shared by every timer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_now: Option<Value>,
    /// Complete HUD readout.
    #[serde(default)]
    pub hud: HudFields,
    /// Timers keyed by kind.
    #[serde(default)]
    pub timers: IndexMap<TimerKind, SnapshotTimer>,
}

/// Timer entry of a [`MissionSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTimer {
    /// Absolute deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<Value>,
    /// Per-timer server clock, overriding the snapshot-wide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_now: Option<Value>,
    /// Declared status.
    pub status: TimerStatus,
}

impl MissionSnapshot {
    /// Ordering key for the snapshot: its own timestamp, else the server clock.
    ///
    /// `None` means the server gave no time at all; such a snapshot must not move the HUD
    /// watermark, since a local clock reading is not comparable with server timestamps.
    pub fn ordering_timestamp(&self) -> Option<EpochMs> {
        self.server_timestamp
            .or_else(|| self.server_now.as_ref().and_then(parse_instant))
    }

    /// HUD part of the snapshot as an authoritative replacement.
    ///
    /// Without an [`ordering_timestamp`](Self::ordering_timestamp) the message is stamped with
    /// `received_at`, which only labels it.
    pub fn hud_message(&self, received_at: EpochMs) -> HudMessage {
        HudMessage {
            mission_id: self.mission_id.clone(),
            server_timestamp: self.ordering_timestamp().unwrap_or(received_at),
            fields: self.hud.clone(),
            is_full_snapshot: true,
        }
    }

    /// Every timer of the snapshot, in the order the server listed them.
    pub fn timer_messages(&self, received_at: EpochMs) -> Vec<TimerMessage> {
        let server_timestamp = self.ordering_timestamp().unwrap_or(received_at);
        let shared_server_now = self.server_now.as_ref().and_then(parse_instant);

        self.timers
            .iter()
            .map(|(kind, timer)| TimerMessage {
                mission_id: self.mission_id.clone(),
                server_timestamp,
                timer: timer_update(
                    *kind,
                    timer.ends_at.as_ref(),
                    timer.server_now.as_ref(),
                    timer.status,
                    shared_server_now,
                ),
            })
            .collect()
    }
}
