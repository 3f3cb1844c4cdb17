//! Session configuration loading: intervals, fallback deadline and tracked timer kinds.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    clock::EpochMs,
    dto::{format_instant, parse_instant},
    error::ConfigError,
    state::TimerKind,
};

/// Default location on disk where the session looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MISSION_SYNC_CONFIG_PATH";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
/// Runtime knobs of a mission session.
pub struct SyncConfig {
    /// Period of the fallback poller while the push channel is down.
    pub poll_interval: Duration,
    /// Period of local timer ticks while a countdown is running.
    pub tick_interval: Duration,
    /// Deadline used to seed timers when realtime is unavailable and no server message arrived.
    pub fallback_deadline: Option<EpochMs>,
    /// Timer kinds the session tracks, in display order.
    pub timer_kinds: Vec<TimerKind>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            fallback_deadline: None,
            timer_kinds: TimerKind::ALL.to_vec(),
        }
    }
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration from `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        poll_interval_ms = config.poll_interval.as_millis() as u64,
                        tick_interval_ms = config.tick_interval.as_millis() as u64,
                        fallback_deadline = ?config.fallback_deadline.map(format_instant),
                        "loaded sync config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document. Missing fields keep their defaults.
    pub fn from_json_str(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_interval_ms: Option<u64>,
    tick_interval_ms: Option<u64>,
    fallback_deadline: Option<Value>,
    timer_kinds: Option<Vec<TimerKind>>,
}

impl From<RawConfig> for SyncConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();

        let fallback_deadline = value.fallback_deadline.and_then(|raw| {
            if raw.is_null() {
                return None;
            }
            let parsed = parse_instant(&raw);
            if parsed.is_none() {
                let err = ConfigError::InvalidInstant {
                    field: "fallbackDeadline",
                    value: raw.to_string(),
                };
                warn!(error = %err, "ignoring fallback deadline");
            }
            parsed
        });

        let mut timer_kinds = value.timer_kinds.unwrap_or(defaults.timer_kinds);
        let mut seen = Vec::with_capacity(timer_kinds.len());
        timer_kinds.retain(|kind| {
            if seen.contains(kind) {
                return false;
            }
            seen.push(*kind);
            true
        });

        Self {
            poll_interval: interval_or(value.poll_interval_ms, "pollIntervalMs", defaults.poll_interval),
            tick_interval: interval_or(value.tick_interval_ms, "tickIntervalMs", defaults.tick_interval),
            fallback_deadline,
            timer_kinds,
        }
    }
}

/// Zero periods would spin; treat them as unset.
fn interval_or(raw: Option<u64>, field: &'static str, default: Duration) -> Duration {
    match raw {
        Some(0) => {
            warn!(field, "interval must be positive; using default");
            default
        }
        Some(ms) => Duration::from_millis(ms),
        None => default,
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();

        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(5_000));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.timer_kinds, TimerKind::ALL.to_vec());
    }

    #[test]
    fn fields_override_defaults() {
        let config = SyncConfig::from_json_str(
            r#"{
                "pollIntervalMs": 2500,
                "tickIntervalMs": 250,
                "fallbackDeadline": "2024-03-01T12:00:00Z",
                "timerKinds": ["ballot", "LAUNCH", "BALLOT"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(2_500));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.fallback_deadline, Some(1_709_294_400_000));
        assert_eq!(config.timer_kinds, vec![TimerKind::Ballot, TimerKind::Launch]);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = SyncConfig::from_json_str(
            r#"{"pollIntervalMs": 0, "fallbackDeadline": "whenever"}"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.fallback_deadline, None);
    }

    #[test]
    fn load_from_missing_or_broken_file_uses_defaults() {
        let dir = env::temp_dir();
        let missing = dir.join(format!("mission-sync-{}.json", Uuid::new_v4()));
        assert_eq!(SyncConfig::load_from(&missing), SyncConfig::default());

        let broken = dir.join(format!("mission-sync-{}.json", Uuid::new_v4()));
        fs::write(&broken, "{not json").unwrap();
        assert_eq!(SyncConfig::load_from(&broken), SyncConfig::default());
        fs::remove_file(&broken).unwrap();
    }

    #[test]
    fn load_from_reads_file() {
        let path = env::temp_dir().join(format!("mission-sync-{}.json", Uuid::new_v4()));
        fs::write(&path, r#"{"fallbackDeadline": 1700000060000}"#).unwrap();

        let config = SyncConfig::load_from(&path);
        fs::remove_file(&path).unwrap();

        assert_eq!(config.fallback_deadline, Some(1_700_000_060_000));
    }
}
