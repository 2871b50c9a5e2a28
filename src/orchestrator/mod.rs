//! Single-consumer audio command orchestrator
//!
//! All audio requests funnel through one bounded queue and are processed
//! one at a time, in arrival order. Each command stops whatever currently
//! owns the codec, performs its action, and decides what to resume. This
//! loop is the only place [`AudioMode`] is mutated.

pub mod command;
pub mod mode;

pub use command::Command;
pub use mode::AudioMode;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::audio::{CapturePipeline, MediaPlayer, MusicState, Tone, ToneGenerator, WakeWordEngine};
use crate::config::{Config, SharedTuning};
use crate::events::StateEvent;

const TIMER_BEEP_COUNT: usize = 3;
const ALARM_BEEP_COUNT: usize = 10;
const TIMER_BEEP_SPACING: Duration = Duration::from_millis(300);
const ALARM_BEEP_SPACING: Duration = Duration::from_millis(250);
const CONFIRM_BEEP_GAP: Duration = Duration::from_millis(120);
const POST_NOTIFY_SETTLE: Duration = Duration::from_millis(200);
const WAKE_START_SETTLE: Duration = Duration::from_millis(100);

/// Handle used by producers to enqueue commands
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    wake_pending: Arc<AtomicBool>,
}

impl CommandSender {
    /// Enqueue a command without blocking. When the queue is full the
    /// command is dropped; producers tolerate at-most-once delivery.
    pub fn post(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                debug!(%command, "command queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                warn!(%command, "command queue closed, dropping");
            }
        }
    }

    /// Post `WakeDetected` unless one is already in flight. Detections
    /// that fire close together collapse into a single command.
    pub fn notify_wake_detected(&self) {
        if self
            .wake_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.post(Command::WakeDetected);
        } else {
            warn!("wake detection already pending, ignoring");
        }
    }
}

#[cfg(test)]
pub(crate) fn command_channel(depth: usize) -> (CommandSender, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(depth);
    let sender = CommandSender {
        tx,
        wake_pending: Arc::new(AtomicBool::new(false)),
    };
    (sender, rx)
}

/// Serializes audio requests into ordered hardware-mode transitions
pub struct Orchestrator {
    mode: AudioMode,
    wake: Arc<dyn WakeWordEngine>,
    capture: Arc<dyn CapturePipeline>,
    player: Arc<dyn MediaPlayer>,
    tones: Arc<dyn ToneGenerator>,
    tuning: SharedTuning,
    /// False when the detector failed to (re)initialize; wake resume is
    /// skipped until a successful restart
    wake_ready: bool,
    wake_pending: Arc<AtomicBool>,
    settle_delay: Duration,
    recovery_delay: Duration,
    cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: CommandSender,
    event_tx: broadcast::Sender<StateEvent>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        wake: Arc<dyn WakeWordEngine>,
        capture: Arc<dyn CapturePipeline>,
        player: Arc<dyn MediaPlayer>,
        tones: Arc<dyn ToneGenerator>,
        tuning: SharedTuning,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> (Self, CommandSender) {
        let (tx, cmd_rx) = mpsc::channel(config.command_queue_depth);
        let wake_pending = Arc::new(AtomicBool::new(false));
        let sender = CommandSender {
            tx,
            wake_pending: Arc::clone(&wake_pending),
        };

        let orchestrator = Self {
            mode: AudioMode::Idle,
            wake,
            capture,
            player,
            tones,
            tuning,
            wake_ready: true,
            wake_pending,
            settle_delay: config.settle_delay,
            recovery_delay: config.pipeline_recovery_delay,
            cmd_rx,
            cmd_tx: sender.clone(),
            event_tx,
        };

        (orchestrator, sender)
    }

    /// Current owner of the audio hardware
    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    /// Drain and process commands until every sender is gone
    pub async fn run(mut self) {
        info!("audio command orchestrator started");

        while let Some(command) = self.cmd_rx.recv().await {
            debug!(%command, "processing command");
            self.handle_command(command).await;
        }

        info!("audio command orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::WakeDetected => self.handle_wake_detected().await,
            Command::ResumeWake => self.handle_resume_wake().await,
            Command::StopWake => self.handle_stop_wake(),
            Command::RestartWake => self.handle_restart_wake(),
            Command::PipelineErrorRecover => self.handle_pipeline_error_recover().await,
            Command::TimerBeep | Command::AlarmBeep => {
                self.handle_notification_beeps(command).await;
            }
            Command::TimerConfirmBeep | Command::TimerErrorBeep => {
                self.handle_feedback_beep(command).await;
            }
            Command::MusicPlay
            | Command::MusicStop
            | Command::MusicPause
            | Command::MusicResume
            | Command::MusicNext
            | Command::MusicPrevious => self.handle_music(command),
        }
    }

    async fn handle_wake_detected(&mut self) {
        // Vacate the codec before reconfiguring it for command capture
        self.wake.stop();
        self.stop_capture();
        sleep(self.settle_delay).await;

        if let Err(err) = self.tones.play(Tone::WAKE_CONFIRM) {
            warn!(error = %err, "failed to play wake confirmation tone");
        }
        sleep(self.settle_delay).await;

        match self.capture.start() {
            Ok(()) => {
                info!("command capture started");
                self.set_mode(AudioMode::CapturingCommand);
            }
            Err(err) => {
                warn!(error = %err, "failed to start command capture");
                self.set_mode(AudioMode::Idle);
            }
        }

        self.wake_pending.store(false, Ordering::SeqCst);
    }

    async fn handle_resume_wake(&mut self) {
        // Listening and music playback cannot share the codec
        if self.player.is_available() && self.player.state().occupies_codec() {
            info!("skipping wake resume, music owns the codec");
            self.wake_pending.store(false, Ordering::SeqCst);
            return;
        }
        if !self.wake_ready {
            warn!("skipping wake resume, detector unavailable");
            self.wake_pending.store(false, Ordering::SeqCst);
            return;
        }

        self.stop_capture();
        // Restart from a clean stop so the codec is reconfigured exactly once
        self.wake.stop();
        sleep(self.settle_delay).await;

        match self.wake.start() {
            Ok(()) => {
                sleep(WAKE_START_SETTLE).await;
                self.set_mode(AudioMode::ListeningForWakeWord);
                info!("wake word detection resumed");
            }
            Err(err) => {
                warn!(error = %err, "failed to resume wake word detection");
                self.set_mode(AudioMode::Idle);
            }
        }
    }

    async fn handle_pipeline_error_recover(&mut self) {
        self.set_mode(AudioMode::ErrorRecovery);
        sleep(self.recovery_delay).await;
        self.cmd_tx.post(Command::ResumeWake);
    }

    fn handle_stop_wake(&mut self) {
        self.wake.stop();
        self.stop_capture();

        if self.player.is_available() && self.player.state().occupies_codec() {
            self.set_mode(AudioMode::PlayingMusic);
        } else {
            self.set_mode(AudioMode::Idle);
        }
    }

    fn handle_restart_wake(&mut self) {
        let was_running = self.wake.is_running();
        self.set_mode(AudioMode::Restarting);

        self.wake.stop();
        self.stop_capture();

        let threshold = self.tuning.read().expect("tuning poisoned").wake_threshold;
        match self.wake.reinit(threshold) {
            Ok(()) => {
                self.wake_ready = true;
                info!(threshold, "wake word engine restarted");
                self.set_mode(AudioMode::Idle);
                if was_running {
                    self.cmd_tx.post(Command::ResumeWake);
                }
            }
            Err(err) => {
                self.wake_ready = false;
                error!(error = %err, "failed to restart wake word engine");
                self.set_mode(AudioMode::Idle);
            }
        }
    }

    async fn handle_notification_beeps(&mut self, command: Command) {
        self.set_mode(AudioMode::Notifying);
        self.wake.stop();
        self.stop_capture();

        let paused = self.pause_music_for_notification().await;

        let (tone, count, spacing) = if command == Command::TimerBeep {
            (Tone::TIMER_NOTIFY, TIMER_BEEP_COUNT, TIMER_BEEP_SPACING)
        } else {
            (Tone::ALARM_NOTIFY, ALARM_BEEP_COUNT, ALARM_BEEP_SPACING)
        };
        info!(repetitions = count, "playing notification beeps");
        for _ in 0..count {
            if let Err(err) = self.tones.play(tone) {
                warn!(error = %err, "notification tone failed");
            }
            sleep(spacing).await;
        }
        sleep(POST_NOTIFY_SETTLE).await;

        if paused && self.player.is_available() {
            info!("resuming music after notification");
            if let Err(err) = self.player.resume() {
                warn!(error = %err, "failed to resume music");
            }
            if self.player.state() == MusicState::Playing {
                // Wake listening stays off while playback owns the codec
                self.set_mode(AudioMode::PlayingMusic);
                return;
            }
        }

        self.set_mode(AudioMode::Idle);
        self.cmd_tx.post(Command::ResumeWake);
    }

    async fn handle_feedback_beep(&mut self, command: Command) {
        let prior = self.mode;
        self.set_mode(AudioMode::Notifying);
        self.stop_capture();

        let paused = self.pause_music_for_notification().await;

        if command == Command::TimerConfirmBeep {
            for gap in [Some(CONFIRM_BEEP_GAP), None] {
                if let Err(err) = self.tones.play(Tone::CONFIRM) {
                    warn!(error = %err, "confirmation tone failed");
                }
                if let Some(gap) = gap {
                    sleep(gap).await;
                }
            }
        } else if let Err(err) = self.tones.play(Tone::ERROR) {
            warn!(error = %err, "error tone failed");
        }

        if paused && self.player.is_available() {
            if let Err(err) = self.player.resume() {
                warn!(error = %err, "failed to resume music");
            }
        }

        // Feedback beeps never re-enable wake listening on their own
        if self.player.is_available() && self.player.state().occupies_codec() {
            self.set_mode(AudioMode::PlayingMusic);
        } else {
            self.set_mode(prior);
        }
    }

    fn handle_music(&mut self, command: Command) {
        if !self.player.is_available() {
            warn!(%command, "music player unavailable (no storage mounted?)");
            return;
        }

        if command == Command::MusicPlay {
            // The codec must be released before playback reconfigures it
            self.wake.stop();
            self.stop_capture();
        }

        let result = match command {
            Command::MusicPlay => self.player.play(),
            Command::MusicStop => self.player.stop(),
            Command::MusicPause => self.player.pause(),
            Command::MusicResume => self.player.resume(),
            Command::MusicNext => self.player.next(),
            Command::MusicPrevious => self.player.previous(),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(%command, error = %err, "music command failed");
        }
    }

    /// Pause playback so a notification can use the codec; returns whether
    /// playback was actually paused and should be resumed afterwards.
    async fn pause_music_for_notification(&self) -> bool {
        if self.player.is_available() && self.player.state() == MusicState::Playing {
            info!("pausing music for notification");
            if self.player.pause().is_ok() {
                sleep(self.settle_delay).await;
                return true;
            }
        }
        false
    }

    /// Best-effort capture stop; a bounded-wait timeout inside the
    /// collaborator is logged and ignored.
    fn stop_capture(&self) {
        if let Err(err) = self.capture.stop() {
            debug!(error = %err, "capture stop incomplete");
        }
    }

    fn set_mode(&mut self, new_mode: AudioMode) {
        if new_mode == self.mode {
            return;
        }
        info!(from = %self.mode, to = %new_mode, "mode transition");
        let event = StateEvent::ModeChanged {
            from: self.mode,
            to: new_mode,
        };
        self.mode = new_mode;
        let _ = self.event_tx.send(event);
    }
}
