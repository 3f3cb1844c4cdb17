//! mission-watch: mounts a mission session against a live server and logs every state change.

use std::{env, sync::Arc};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mission_sync::{
    MissionSession, MissionSink, SyncConfig, TimersView,
    channel::{ChannelAdapter, PushCapability, SseCapability},
    dao::snapshot::HttpSnapshotSource,
    dto::{format_instant, push::Toast},
    error::ConfigError,
    state::HudState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let api_url = required_env("MISSION_API_URL")?;
    let mission_id = required_env("MISSION_ID")?;
    let push_url = env::var("MISSION_PUSH_URL")
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| api_url.clone());

    let config = SyncConfig::load();
    let source = HttpSnapshotSource::connect(&api_url).context("building snapshot client")?;
    let push = SseCapability::connect(&push_url).context("building push client")?;
    let capability: Arc<dyn PushCapability> = Arc::new(push);

    info!(%mission_id, %api_url, %push_url, "mounting mission session");
    let handle = MissionSession::new(mission_id, Arc::new(source), ChannelAdapter::new(Some(capability)))
        .with_config(config)
        .mount(Arc::new(LogSink));

    shutdown_signal().await;
    handle.unmount().await;

    Ok(())
}

/// Sink that renders state changes as log lines.
struct LogSink;

impl MissionSink for LogSink {
    fn on_hud_update(&self, hud: &HudState) {
        info!(
            fuel = hud.fuel,
            hull = hud.hull,
            crew = hud.crew,
            success = hud.success,
            science_delta = hud.science_delta,
            phase = %hud.phase,
            "hud"
        );
    }

    fn on_timers_update(&self, timers: &TimersView) {
        for (kind, readout) in timers {
            info!(
                %kind,
                status = ?readout.status,
                remaining_ms = readout.remaining_ms,
                ends_at = ?readout.ends_at.map(format_instant),
                "timer"
            );
        }
    }

    fn on_toast(&self, toast: &Toast) {
        info!(level = ?toast.level, message = %toast.message, "toast");
    }

    fn on_connection_change(&self, connected: bool) {
        info!(connected, "push channel");
    }
}

fn required_env(var: &'static str) -> Result<String, ConfigError> {
    env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnvVar { var })
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mission_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
