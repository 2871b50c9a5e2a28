//! In-process collaborator implementations
//!
//! Host-side stand-ins for the codec-backed collaborators: they keep the
//! same observable contract (state queries, notifications, failure modes)
//! without touching hardware. The daemon binary wires these when no real
//! drivers are present, and the orchestrator tests use them as doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use crate::audio::{
    CapturePipeline, MediaPlayer, MusicState, PipelineEvent, Tone, ToneGenerator, WakeEvent,
    WakeWordEngine,
};
use crate::error::Error;

/// Tone generator that records every tone it is asked to play
pub struct SimToneGenerator {
    played: Mutex<Vec<Tone>>,
    fail: AtomicBool,
}

impl SimToneGenerator {
    pub fn new() -> Self {
        Self {
            played: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<Tone> {
        self.played.lock().expect("tone log poisoned").clone()
    }
}

impl Default for SimToneGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneGenerator for SimToneGenerator {
    fn play(&self, tone: Tone) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transient("tone output unavailable".into()));
        }
        debug!(
            frequency_hz = tone.frequency_hz,
            duration_ms = tone.duration_ms,
            "sim tone"
        );
        self.played.lock().expect("tone log poisoned").push(tone);
        Ok(())
    }
}

/// Wake-word engine double with a manual detection trigger
pub struct SimWakeEngine {
    running: AtomicBool,
    fail_start: AtomicBool,
    fail_reinit: AtomicBool,
    last_threshold: Mutex<Option<f32>>,
    event_tx: broadcast::Sender<WakeEvent>,
}

impl SimWakeEngine {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_reinit: AtomicBool::new(false),
            last_threshold: Mutex::new(None),
            event_tx,
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reinit(&self, fail: bool) {
        self.fail_reinit.store(fail, Ordering::SeqCst);
    }

    pub fn last_threshold(&self) -> Option<f32> {
        *self.last_threshold.lock().expect("threshold poisoned")
    }

    /// Simulate the detector hearing the wake phrase
    pub fn trigger_detection(&self) {
        let _ = self.event_tx.send(WakeEvent::Detected);
    }
}

impl Default for SimWakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeWordEngine for SimWakeEngine {
    fn start(&self) -> Result<(), Error> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Transient("detector start failed".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn reinit(&self, threshold: f32) -> Result<(), Error> {
        self.running.store(false, Ordering::SeqCst);
        if self.fail_reinit.load(Ordering::SeqCst) {
            return Err(Error::Fatal("detector model load failed".into()));
        }
        *self.last_threshold.lock().expect("threshold poisoned") = Some(threshold);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WakeEvent> {
        self.event_tx.subscribe()
    }
}

/// Capture pipeline double with manual completion/error triggers
pub struct SimCapturePipeline {
    active: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl SimCapturePipeline {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            active: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            event_tx,
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Simulate end-of-speech with the command handed off downstream
    pub fn complete(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(PipelineEvent::Completed);
    }

    /// Simulate a mid-capture streaming failure
    pub fn fail(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(PipelineEvent::Error);
    }
}

impl Default for SimCapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePipeline for SimCapturePipeline {
    fn start(&self) -> Result<(), Error> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Transient("capture start failed".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }
}

/// Media player double tracking transport state
pub struct SimMediaPlayer {
    available: AtomicBool,
    state: Mutex<MusicState>,
    state_tx: broadcast::Sender<MusicState>,
}

impl SimMediaPlayer {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(16);
        Self {
            available: AtomicBool::new(true),
            state: Mutex::new(MusicState::Idle),
            state_tx,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn transition(&self, state: MusicState) {
        *self.state.lock().expect("player state poisoned") = state;
        let _ = self.state_tx.send(state);
    }

    fn ensure_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::InvalidState("no playback backend".into()))
        }
    }
}

impl Default for SimMediaPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPlayer for SimMediaPlayer {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn state(&self) -> MusicState {
        *self.state.lock().expect("player state poisoned")
    }

    fn play(&self) -> Result<(), Error> {
        self.ensure_available()?;
        self.transition(MusicState::Playing);
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        self.ensure_available()?;
        self.transition(MusicState::Stopped);
        Ok(())
    }

    fn pause(&self) -> Result<(), Error> {
        self.ensure_available()?;
        if self.state() == MusicState::Playing {
            self.transition(MusicState::Paused);
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), Error> {
        self.ensure_available()?;
        if self.state() == MusicState::Paused {
            self.transition(MusicState::Playing);
        }
        Ok(())
    }

    fn next(&self) -> Result<(), Error> {
        self.ensure_available()
    }

    fn previous(&self) -> Result<(), Error> {
        self.ensure_available()
    }

    fn subscribe(&self) -> broadcast::Receiver<MusicState> {
        self.state_tx.subscribe()
    }
}
