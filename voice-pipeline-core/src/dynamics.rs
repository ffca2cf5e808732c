//! Feed-forward dynamic range compressor
//!
//! One envelope follower tracks the peak of each sample frame across all
//! channels at the sample rate. Above the threshold the compressor scales
//! every channel of that frame by
//!
//! ```text
//! gain = ((env - thr) / ratio + thr) / env
//! ```
//!
//! which maps the envelope onto the compressed curve. The gain is
//! recomputed for every sample frame; there is no lookahead.

use tracing::debug;

use crate::error::ConfigError;
use crate::utils::{calculate_peak, db_to_linear, linear_to_db, EnvelopeFollower};

/// Default values for compressor parameters
pub mod defaults {
    pub const THRESHOLD_DB: f32 = -18.0;
    pub const RATIO: f32 = 3.0;
    pub const ATTACK_MS: f32 = 5.0;
    pub const RELEASE_MS: f32 = 120.0;
}

/// Largest ratio accepted
pub const MAX_RATIO: f32 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressorConfig {
    pub threshold_db: f32,
    /// Input dB above threshold per output dB, at least 1
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold_db: defaults::THRESHOLD_DB,
            ratio: defaults::RATIO,
            attack_ms: defaults::ATTACK_MS,
            release_ms: defaults::RELEASE_MS,
        }
    }
}

impl CompressorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::check_range("compression_threshold_db", self.threshold_db, -90.0, 0.0)?;
        ConfigError::check_range("compression_ratio", self.ratio, 1.0, MAX_RATIO)?;
        ConfigError::check_range("compression_attack_ms", self.attack_ms, 0.0, 1000.0)?;
        ConfigError::check_range("compression_release_ms", self.release_ms, 0.0, 5000.0)?;
        Ok(())
    }
}

/// Gain for an envelope value, `1.0` at or below the threshold
#[inline]
pub fn compressor_gain(envelope: f32, threshold: f32, ratio: f32) -> f32 {
    if envelope > threshold && envelope > 0.0 {
        ((envelope - threshold) / ratio + threshold) / envelope
    } else {
        1.0
    }
}

#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f32,
    ratio: f32,
    sample_rate: f32,
    envelope: EnvelopeFollower,
    min_gain: f32,
}

impl Compressor {
    pub fn new(config: &CompressorConfig, sample_rate: f32) -> Self {
        debug!("Creating Compressor with config: {:?}", config);

        Self {
            threshold: db_to_linear(config.threshold_db),
            ratio: config.ratio.max(1.0),
            sample_rate,
            envelope: EnvelopeFollower::new(config.attack_ms, config.release_ms, sample_rate),
            min_gain: 1.0,
        }
    }

    pub fn update_config(&mut self, config: &CompressorConfig) {
        self.threshold = db_to_linear(config.threshold_db);
        self.ratio = config.ratio.max(1.0);
        self.envelope
            .set_times(config.attack_ms, config.release_ms, self.sample_rate);
    }

    /// Compress an interleaved block in place
    pub fn process(&mut self, samples: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        self.min_gain = 1.0;

        for frame in samples.chunks_exact_mut(channels) {
            let env = self.envelope.process(calculate_peak(frame));
            let gain = compressor_gain(env, self.threshold, self.ratio);

            if gain < 1.0 {
                for sample in frame.iter_mut() {
                    *sample *= gain;
                }
                self.min_gain = self.min_gain.min(gain);
            }
        }
    }

    /// Deepest gain reduction of the last block in dB (0 or negative)
    pub fn last_gain_reduction_db(&self) -> f32 {
        linear_to_db(self.min_gain)
    }

    #[inline]
    pub fn envelope(&self) -> f32 {
        self.envelope.current()
    }

    pub fn reset(&mut self) {
        self.envelope.reset();
        self.min_gain = 1.0;
    }
}
