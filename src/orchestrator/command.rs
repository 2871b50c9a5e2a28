//! Audio command vocabulary
//!
//! Every producer (wake-word detector, pipeline notifications, timer
//! expiry, connection recovery, remote controls) reduces its intent to one
//! of these values and posts it on the single bounded queue.

use serde::{Deserialize, Serialize};

/// A discrete, self-contained audio request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Wake phrase heard; switch to command capture
    WakeDetected,
    /// Re-enter wake-word listening if nothing incompatible is running
    ResumeWake,
    /// Vacate wake-word listening and capture
    StopWake,
    /// Tear down and recreate the wake-word engine with the current threshold
    RestartWake,
    /// Pipeline failed; resume wake listening after a recovery delay
    PipelineErrorRecover,
    /// Timer expired: three notification beeps
    TimerBeep,
    /// Alarm triggered: ten notification beeps
    AlarmBeep,
    /// Double confirmation beep (timer accepted)
    TimerConfirmBeep,
    /// Low error beep (timer rejected)
    TimerErrorBeep,
    MusicPlay,
    MusicStop,
    MusicPause,
    MusicResume,
    MusicNext,
    MusicPrevious,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Command::TimerConfirmBeep).unwrap();
        assert_eq!(json, "\"timer_confirm_beep\"");
    }

    #[test]
    fn test_deserialization() {
        let cmd: Command = serde_json::from_str("\"music_previous\"").unwrap();
        assert_eq!(cmd, Command::MusicPrevious);
    }
}
