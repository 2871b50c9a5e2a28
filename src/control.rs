//! Runtime tuning control surface
//!
//! Adjusts the pipeline parameters shared with the orchestrator. Most
//! parameters take effect on the next capture; the wake threshold is baked
//! into the detector, so changing it schedules an engine restart.

use tracing::info;

use crate::config::{PipelineTuning, SharedTuning};
use crate::error::Error;
use crate::orchestrator::{Command, CommandSender};

const MAX_RECORDING_CAP_MS: u32 = 30_000;

pub struct Controller {
    tuning: SharedTuning,
    cmd_tx: CommandSender,
}

impl Controller {
    pub fn new(tuning: SharedTuning, cmd_tx: CommandSender) -> Self {
        Self { tuning, cmd_tx }
    }

    pub fn tuning(&self) -> PipelineTuning {
        *self.tuning.read().expect("tuning poisoned")
    }

    /// Set the wake-word detection threshold and restart the detector so
    /// the new value takes effect.
    pub fn set_wake_threshold(&self, threshold: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidArgument(format!(
                "wake threshold {threshold} outside 0.0-1.0"
            )));
        }
        self.tuning.write().expect("tuning poisoned").wake_threshold = threshold;
        info!(threshold, "wake threshold updated, restarting detector");
        self.cmd_tx.post(Command::RestartWake);
        Ok(())
    }

    pub fn set_vad_speech_threshold(&self, threshold: u32) -> Result<(), Error> {
        if threshold == 0 {
            return Err(Error::InvalidArgument(
                "speech threshold must be nonzero".into(),
            ));
        }
        self.tuning.write().expect("tuning poisoned").vad_speech_threshold = threshold;
        info!(threshold, "VAD speech threshold updated");
        Ok(())
    }

    pub fn set_vad_silence_ms(&self, silence_ms: u32) -> Result<(), Error> {
        if silence_ms == 0 {
            return Err(Error::InvalidArgument(
                "silence duration must be nonzero".into(),
            ));
        }
        self.tuning.write().expect("tuning poisoned").vad_silence_ms = silence_ms;
        info!(silence_ms, "VAD silence window updated");
        Ok(())
    }

    pub fn set_vad_min_speech_ms(&self, min_speech_ms: u32) -> Result<(), Error> {
        self.tuning.write().expect("tuning poisoned").vad_min_speech_ms = min_speech_ms;
        info!(min_speech_ms, "VAD minimum speech updated");
        Ok(())
    }

    pub fn set_vad_max_recording_ms(&self, max_recording_ms: u32) -> Result<(), Error> {
        if max_recording_ms == 0 || max_recording_ms > MAX_RECORDING_CAP_MS {
            return Err(Error::InvalidArgument(format!(
                "max recording {max_recording_ms}ms outside 1-{MAX_RECORDING_CAP_MS}ms"
            )));
        }
        self.tuning.write().expect("tuning poisoned").vad_max_recording_ms = max_recording_ms;
        info!(max_recording_ms, "VAD recording cap updated");
        Ok(())
    }

    pub fn set_agc_enabled(&self, enabled: bool) {
        self.tuning.write().expect("tuning poisoned").agc_enabled = enabled;
        info!(enabled, "AGC toggled");
    }

    pub fn set_agc_target_level(&self, target_level: u16) -> Result<(), Error> {
        if target_level == 0 {
            return Err(Error::InvalidArgument("AGC target must be nonzero".into()));
        }
        self.tuning.write().expect("tuning poisoned").agc_target_level = target_level;
        info!(target_level, "AGC target level updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::shared_tuning;
    use crate::orchestrator::command_channel;

    fn controller() -> (Controller, tokio::sync::mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = command_channel(8);
        let tuning = shared_tuning(PipelineTuning::default());
        (Controller::new(tuning, cmd_tx), cmd_rx)
    }

    #[test]
    fn test_wake_threshold_change_restarts_detector() {
        let (ctrl, mut cmd_rx) = controller();

        ctrl.set_wake_threshold(0.8).unwrap();
        assert_eq!(ctrl.tuning().wake_threshold, 0.8);
        assert_eq!(cmd_rx.try_recv().unwrap(), Command::RestartWake);
    }

    #[test]
    fn test_wake_threshold_range_enforced() {
        let (ctrl, mut cmd_rx) = controller();

        assert!(ctrl.set_wake_threshold(1.5).is_err());
        assert!(ctrl.set_wake_threshold(-0.1).is_err());
        assert_eq!(ctrl.tuning().wake_threshold, 0.5);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_vad_updates_do_not_restart() {
        let (ctrl, mut cmd_rx) = controller();

        ctrl.set_vad_silence_ms(2000).unwrap();
        ctrl.set_vad_speech_threshold(300).unwrap();
        ctrl.set_vad_max_recording_ms(10_000).unwrap();
        ctrl.set_agc_enabled(false);

        let tuning = ctrl.tuning();
        assert_eq!(tuning.vad_silence_ms, 2000);
        assert_eq!(tuning.vad_speech_threshold, 300);
        assert_eq!(tuning.vad_max_recording_ms, 10_000);
        assert!(!tuning.agc_enabled);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_recording_cap_enforced() {
        let (ctrl, _cmd_rx) = controller();
        assert!(ctrl.set_vad_max_recording_ms(60_000).is_err());
        assert!(ctrl.set_vad_max_recording_ms(0).is_err());
    }
}
