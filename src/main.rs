//! voicebox-daemon: orchestration core for a hands-free voice appliance
//!
//! The daemon owns the shared audio hardware and serializes everything that
//! wants it: wake-word listening, voice-command capture, notification beeps
//! and music playback. Around that core it runs a connection health monitor
//! with exponential-backoff reconnection and a three-slot countdown timer
//! engine.
//!
//! Without real codec drivers the binary wires the simulation collaborators
//! from [`sim`], which keep the full control flow observable on a host.

mod audio;
mod config;
mod connection;
mod control;
mod error;
mod events;
mod lifecycle;
mod orchestrator;
mod sim;
mod timers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{CapturePipeline, MediaPlayer, PipelineEvent, WakeEvent, WakeWordEngine};
use crate::config::{shared_tuning, Config};
use crate::connection::{ConnectionKind, ConnectionManager, ReconnectHook};
use crate::control::Controller;
use crate::events::StateEvent;
use crate::orchestrator::{Command, CommandSender, Orchestrator};
use crate::sim::{SimCapturePipeline, SimMediaPlayer, SimToneGenerator, SimWakeEngine};
use crate::timers::{format_duration, TimerEngine};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voicebox-daemon starting"
    );

    let config = Config::load()?;
    info!(
        queue_depth = config.command_queue_depth,
        wake_threshold = config.tuning.wake_threshold,
        "configuration loaded"
    );

    // Shared event bus; every subsystem publishes its transitions here
    let (event_tx, mut event_rx) = broadcast::channel::<StateEvent>(64);

    // Host-side collaborators standing in for the codec-backed drivers
    let wake = Arc::new(SimWakeEngine::new());
    let capture = Arc::new(SimCapturePipeline::new());
    let player = Arc::new(SimMediaPlayer::new());
    let tones = Arc::new(SimToneGenerator::new());

    let tuning = shared_tuning(config.tuning);
    let (orchestrator, cmd_tx) = Orchestrator::new(
        &config,
        wake.clone(),
        capture.clone(),
        player.clone(),
        tones.clone(),
        Arc::clone(&tuning),
        event_tx.clone(),
    );

    let manager = Arc::new(ConnectionManager::new(config.connection, event_tx.clone()));
    register_connections(&manager)?;

    let timer_engine = Arc::new(TimerEngine::new(
        cmd_tx.clone(),
        tones.clone(),
        event_tx.clone(),
    ));

    let controller = Controller::new(tuning, cmd_tx.clone());
    spawn_tuning_reload(controller)?;

    spawn_wake_watcher(wake.subscribe(), cmd_tx.clone());
    spawn_pipeline_watcher(capture.subscribe(), cmd_tx.clone());
    spawn_media_watcher(player.subscribe(), cmd_tx.clone());
    spawn_status_reporter(Arc::clone(&timer_engine), Arc::clone(&manager));

    // Bring up listening and kick off the first connection attempts
    cmd_tx.post(Command::ResumeWake);
    manager.request_reconnect(ConnectionKind::ControlPlane)?;
    manager.request_reconnect(ConnectionKind::MessageBroker)?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = orchestrator.run() => {
            info!("orchestrator exited");
        }

        _ = manager.run() => {
            info!("connection monitor exited");
        }

        _ = timer_engine.run() => {
            info!("timer engine exited");
        }

        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => info!(%event, "state event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event logger exited");
        }

        signal = lifecycle::wait_for_shutdown() => {
            info!(signal = signal?, "shutting down");
        }
    }

    info!("voicebox-daemon stopped");
    Ok(())
}

/// Register the two managed backends with simulated reconnect hooks. A
/// real build points these at the control-plane socket dial and the broker
/// session setup.
fn register_connections(manager: &Arc<ConnectionManager>) -> Result<()> {
    for (kind, name) in [
        (ConnectionKind::ControlPlane, "control plane"),
        (ConnectionKind::MessageBroker, "message broker"),
    ] {
        let hook: ReconnectHook = Arc::new(move || {
            Box::pin(async move {
                // Simulated dial latency; always succeeds on the host
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
        });
        manager.register(kind, name, hook)?;
    }
    Ok(())
}

/// Reapply environment tuning overrides on SIGHUP. A wake-threshold change
/// goes through the controller so the detector restart is scheduled.
fn spawn_tuning_reload(controller: Controller) -> Result<()> {
    let mut hangups = lifecycle::hangup_stream()?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading tuning from environment");
            let fresh = match Config::load() {
                Ok(config) => config.tuning,
                Err(err) => {
                    warn!(error = %err, "tuning reload failed");
                    continue;
                }
            };
            if fresh.wake_threshold != controller.tuning().wake_threshold {
                if let Err(err) = controller.set_wake_threshold(fresh.wake_threshold) {
                    warn!(error = %err, "rejected wake threshold");
                }
            }
        }
    });
    Ok(())
}

fn spawn_wake_watcher(mut rx: broadcast::Receiver<WakeEvent>, cmd_tx: CommandSender) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(WakeEvent::Detected) => cmd_tx.notify_wake_detected(),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "wake event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_pipeline_watcher(mut rx: broadcast::Receiver<PipelineEvent>, cmd_tx: CommandSender) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::Completed) => cmd_tx.post(Command::ResumeWake),
                Ok(PipelineEvent::Error) => cmd_tx.post(Command::PipelineErrorRecover),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "pipeline event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Keep the audio mode coherent with the player: active playback evicts
/// wake listening, a stop hands the codec back.
fn spawn_media_watcher(mut rx: broadcast::Receiver<audio::MusicState>, cmd_tx: CommandSender) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(state) if state.occupies_codec() => cmd_tx.post(Command::StopWake),
                Ok(audio::MusicState::Stopped) => cmd_tx.post(Command::ResumeWake),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "media event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_status_reporter(timer_engine: Arc<TimerEngine>, manager: Arc<ConnectionManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let timers = timer_engine.active_count();
            match timer_engine.next_expiring() {
                Some(next) => info!(
                    timers,
                    next_id = next.id,
                    next_label = %next.label,
                    next_in = %format_duration(next.remaining),
                    connections_healthy = manager.all_connected(),
                    "status"
                ),
                None => info!(
                    timers,
                    connections_healthy = manager.all_connected(),
                    "status"
                ),
            }
        }
    });
}
