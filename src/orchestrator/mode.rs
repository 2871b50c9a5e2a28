//! Exclusive audio-hardware modes
//!
//! Exactly one mode is active at any instant. Transitions happen only in
//! the orchestrator's consumer loop.

use serde::{Deserialize, Serialize};

/// The mutually exclusive uses of the shared audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// Nothing owns the hardware
    Idle,
    /// Wake-word detector is fed from the microphone
    ListeningForWakeWord,
    /// Voice command is being captured and streamed
    CapturingCommand,
    /// Synthesized speech is playing
    Speaking,
    /// A notification tone sequence is playing
    Notifying,
    /// Local music playback owns the codec
    PlayingMusic,
    /// Recovering from a pipeline failure before resuming
    ErrorRecovery,
    /// Wake-word engine is being torn down and recreated
    Restarting,
}

impl Default for AudioMode {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for AudioMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AudioMode::Idle => "Idle",
            AudioMode::ListeningForWakeWord => "ListeningForWakeWord",
            AudioMode::CapturingCommand => "CapturingCommand",
            AudioMode::Speaking => "Speaking",
            AudioMode::Notifying => "Notifying",
            AudioMode::PlayingMusic => "PlayingMusic",
            AudioMode::ErrorRecovery => "ErrorRecovery",
            AudioMode::Restarting => "Restarting",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(AudioMode::default(), AudioMode::Idle);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&AudioMode::ListeningForWakeWord).unwrap();
        assert_eq!(json, "\"listening_for_wake_word\"");
    }
}
