//! Collaborator contracts for the shared audio hardware
//!
//! The daemon core never touches the codec directly; it drives these traits.
//! Real firmware builds wire them to the codec/I2S drivers, the host build
//! wires them to the simulation doubles in [`crate::sim`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Error;

/// A single feedback tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    /// Frequency in Hz
    pub frequency_hz: u16,
    /// Duration in milliseconds
    pub duration_ms: u16,
    /// Volume 0-100
    pub volume: u8,
}

impl Tone {
    pub const fn new(frequency_hz: u16, duration_ms: u16, volume: u8) -> Self {
        Self {
            frequency_hz,
            duration_ms,
            volume,
        }
    }

    /// Short beep confirming wake-word detection
    pub const WAKE_CONFIRM: Tone = Tone::new(800, 120, 40);
    /// One repetition of the timer-expiry notification
    pub const TIMER_NOTIFY: Tone = Tone::new(1000, 200, 90);
    /// One repetition of the alarm notification
    pub const ALARM_NOTIFY: Tone = Tone::new(1500, 250, 90);
    /// Half of the double confirmation beep
    pub const CONFIRM: Tone = Tone::new(1200, 100, 90);
    /// Low error buzz
    pub const ERROR: Tone = Tone::new(400, 300, 60);
    /// Countdown warning beep
    pub const TIMER_WARNING: Tone = Tone::new(800, 100, 40);
}

/// Synthesized tone playback
///
/// Invoked synchronously by the orchestrator and the timer tick, always
/// while no shared lock is held.
pub trait ToneGenerator: Send + Sync {
    fn play(&self, tone: Tone) -> Result<(), Error>;
}

/// Notification from the wake-word engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// The wake phrase was detected in the microphone stream
    Detected,
}

/// Continuous low-power wake-word listening
pub trait WakeWordEngine: Send + Sync {
    /// Start listening and feeding microphone audio to the detector
    fn start(&self) -> Result<(), Error>;

    /// Stop listening; safe to call when already stopped
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Tear down and recreate the detector with a new detection threshold
    fn reinit(&self, threshold: f32) -> Result<(), Error>;

    /// Subscribe to detection notifications
    fn subscribe(&self) -> broadcast::Receiver<WakeEvent>;
}

/// Notification from the voice-command capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Speech ended and the captured command was handed off downstream
    Completed,
    /// Streaming or capture failed mid-command
    Error,
}

/// VAD-terminated voice-command capture and streaming
pub trait CapturePipeline: Send + Sync {
    /// Start capturing a voice command
    fn start(&self) -> Result<(), Error>;

    /// Stop capture, waiting a bounded time for the hardware to let go.
    /// A timeout is reported as `Transient` and treated as best-effort by
    /// callers.
    fn stop(&self) -> Result<(), Error>;

    fn is_active(&self) -> bool;

    /// Subscribe to end-of-speech / stream-error notifications
    fn subscribe(&self) -> broadcast::Receiver<PipelineEvent>;
}

/// Media player transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl MusicState {
    /// The codec is reconfigured for playback in these states, which is
    /// incompatible with wake-word listening.
    pub fn occupies_codec(&self) -> bool {
        matches!(self, MusicState::Playing | MusicState::Paused)
    }
}

/// Local music playback
pub trait MediaPlayer: Send + Sync {
    /// Whether a playback backend exists at all (e.g. storage mounted)
    fn is_available(&self) -> bool;

    fn state(&self) -> MusicState;

    fn play(&self) -> Result<(), Error>;
    fn stop(&self) -> Result<(), Error>;
    fn pause(&self) -> Result<(), Error>;
    fn resume(&self) -> Result<(), Error>;
    fn next(&self) -> Result<(), Error>;
    fn previous(&self) -> Result<(), Error>;

    /// Subscribe to transport state-change notifications
    fn subscribe(&self) -> broadcast::Receiver<MusicState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_occupancy() {
        assert!(MusicState::Playing.occupies_codec());
        assert!(MusicState::Paused.occupies_codec());
        assert!(!MusicState::Stopped.occupies_codec());
        assert!(!MusicState::Idle.occupies_codec());
    }

    #[test]
    fn test_tone_constants() {
        assert_eq!(Tone::WAKE_CONFIRM.frequency_hz, 800);
        assert_eq!(Tone::ALARM_NOTIFY.volume, 90);
    }
}
