use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    clock::EpochMs,
    dto::parse_instant,
    error::PayloadError,
    state::{
        hud::{HudFields, HudMessage},
        timer::{TimerKind, TimerMessage, TimerStatus, TimerUpdate},
    },
};

#[derive(Debug, Deserialize)]
/// Raw envelope received on the push channel, discriminated by its `type` field.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEnvelope {
    /// HUD delta or snapshot.
    Hud(HudPayload),
    /// Timer update.
    Timer(TimerEnvelope),
    /// Toast notification.
    Toast(Toast),
    /// Any other `type`; skipped.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// HUD delta or snapshot as sent over the wire.
pub struct HudPayload {
    /// Mission the update belongs to.
    pub mission_id: String,
    /// Server epoch milliseconds used for ordering.
    pub server_timestamp: EpochMs,
    /// Older servers send the fields under `hud`.
    #[serde(default, alias = "hud")]
    pub fields: HudFields,
    /// Whether `fields` replaces the whole readout.
    #[serde(default)]
    pub is_full_snapshot: bool,
}

impl From<HudPayload> for HudMessage {
    fn from(payload: HudPayload) -> Self {
        Self {
            mission_id: payload.mission_id,
            server_timestamp: payload.server_timestamp,
            fields: payload.fields,
            is_full_snapshot: payload.is_full_snapshot,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Timer update as sent over the push channel.
pub struct TimerEnvelope {
    /// Mission the update belongs to.
    pub mission_id: String,
    /// Server epoch milliseconds at which the update was emitted.
    pub server_timestamp: EpochMs,
    /// Timer state.
    pub timer: PushTimer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Timer sub-object of a push message. Instants stay raw until conversion so a bad deadline
/// only voids the timer event instead of the whole envelope.
pub struct PushTimer {
    /// Countdown the update targets.
    pub kind: TimerKind,
    /// Absolute deadline, RFC 3339 or epoch milliseconds.
    #[serde(default)]
    pub ends_at: Option<Value>,
    /// Server wall clock at emission, used for drift correction.
    #[serde(default)]
    pub server_now: Option<Value>,
    /// Declared status.
    pub status: TimerStatus,
}

impl From<TimerEnvelope> for TimerMessage {
    fn from(envelope: TimerEnvelope) -> Self {
        let PushTimer {
            kind,
            ends_at,
            server_now,
            status,
        } = envelope.timer;

        Self {
            mission_id: envelope.mission_id,
            server_timestamp: envelope.server_timestamp,
            timer: timer_update(kind, ends_at.as_ref(), server_now.as_ref(), status, None),
        }
    }
}

/// Build a [`TimerUpdate`] from raw instants, treating unparseable ones as absent.
pub(crate) fn timer_update(
    kind: TimerKind,
    ends_at: Option<&Value>,
    server_now: Option<&Value>,
    status: TimerStatus,
    fallback_server_now: Option<EpochMs>,
) -> TimerUpdate {
    let parsed_ends_at = ends_at.and_then(parse_instant);
    if let (Some(raw), None) = (ends_at, parsed_ends_at) {
        debug!(%kind, raw = %raw, "unparseable timer deadline");
    }

    TimerUpdate {
        kind,
        ends_at: parsed_ends_at,
        server_now: server_now.and_then(parse_instant).or(fallback_server_now),
        status,
    }
}

/// Severity of a toast notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    /// Informational.
    #[default]
    Info,
    /// Something went well.
    Success,
    /// Needs the crew's attention.
    Warning,
    /// Something failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Short-lived notification pushed to every mission participant.
pub struct Toast {
    /// Mission the notification belongs to.
    pub mission_id: String,
    /// Text shown to the crew.
    pub message: String,
    /// Severity; defaults to [`ToastLevel::Info`].
    #[serde(default)]
    pub level: ToastLevel,
}

/// Decoded push message ready for the reconciliation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// HUD delta or snapshot.
    Hud(HudMessage),
    /// Timer update.
    Timer(TimerMessage),
    /// Toast notification.
    Toast(Toast),
}

impl PushMessage {
    /// Mission the message belongs to.
    pub fn mission_id(&self) -> &str {
        match self {
            PushMessage::Hud(message) => &message.mission_id,
            PushMessage::Timer(message) => &message.mission_id,
            PushMessage::Toast(toast) => &toast.mission_id,
        }
    }

    /// Decode a raw push payload. Envelopes with an unknown `type` decode to `None`.
    pub fn from_json_str(raw: &str) -> Result<Option<Self>, PayloadError> {
        let envelope =
            serde_json::from_str::<PushEnvelope>(raw).map_err(PayloadError::Decode)?;

        Ok(match envelope {
            PushEnvelope::Hud(payload) => Some(PushMessage::Hud(payload.into())),
            PushEnvelope::Timer(envelope) => Some(PushMessage::Timer(envelope.into())),
            PushEnvelope::Toast(toast) => Some(PushMessage::Toast(toast)),
            PushEnvelope::Unknown => None,
        })
    }
}
