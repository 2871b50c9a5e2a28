//! Configuration loading and runtime tuning state

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;

use crate::connection::ConnectionManagerConfig;

/// Daemon configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Config {
    /// Depth of the bounded audio command queue
    pub command_queue_depth: usize,
    /// Delay letting the codec settle between stop and reconfigure
    pub settle_delay: Duration,
    /// Delay before resuming wake listening after a pipeline error
    pub pipeline_recovery_delay: Duration,
    /// Connection monitor tuning
    pub connection: ConnectionManagerConfig,
    /// Initial values for the runtime-tunable pipeline parameters
    pub tuning: PipelineTuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_queue_depth: 8,
            settle_delay: Duration::from_millis(50),
            pipeline_recovery_delay: Duration::from_secs(2),
            connection: ConnectionManagerConfig::default(),
            tuning: PipelineTuning::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(threshold) = env_parse::<f32>("VOICEBOX_WAKE_THRESHOLD") {
            config.tuning.wake_threshold = threshold;
        }
        if let Some(interval) = env_parse::<u64>("VOICEBOX_HEALTH_CHECK_SECS") {
            config.connection.health_check_interval = Duration::from_secs(interval);
        }
        if let Some(max_retries) = env_parse::<u32>("VOICEBOX_MAX_RETRIES") {
            config.connection.max_retry_count = max_retries;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Runtime-tunable parameters forwarded to the audio collaborators.
/// Mutated only through the control surface.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTuning {
    /// Wake-word detection threshold (0.0 - 1.0)
    pub wake_threshold: f32,
    /// VAD speech energy threshold
    pub vad_speech_threshold: u32,
    /// Silence duration that ends a capture, in milliseconds
    pub vad_silence_ms: u32,
    /// Minimum speech duration to count as a command, in milliseconds
    pub vad_min_speech_ms: u32,
    /// Hard cap on a single capture, in milliseconds
    pub vad_max_recording_ms: u32,
    /// Whether automatic gain control runs on captured audio
    pub agc_enabled: bool,
    /// AGC target amplitude
    pub agc_target_level: u16,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            wake_threshold: 0.5,
            vad_speech_threshold: 150,
            vad_silence_ms: 1500,
            vad_min_speech_ms: 200,
            vad_max_recording_ms: 8000,
            agc_enabled: true,
            agc_target_level: 4000,
        }
    }
}

/// Tuning shared between the control surface and the orchestrator
pub type SharedTuning = Arc<RwLock<PipelineTuning>>;

pub fn shared_tuning(tuning: PipelineTuning) -> SharedTuning {
    Arc::new(RwLock::new(tuning))
}
