//! Pipeline configuration
//!
//! [`PipelineConfig`] is the flat option set handed over by the host's
//! configuration layer. Missing keys fall back to their defaults when
//! deserializing. Before use a config is validated against the stream
//! format and its dual-mode flags are resolved into [`NoiseMode`] and
//! [`LoopMode`], so operators never branch on raw booleans.

use serde::{Deserialize, Serialize};

use crate::dynamics::{self, CompressorConfig};
use crate::error::ConfigError;
use crate::frame_engine::{validate_fft_size, DEFAULT_FFT_SIZE};
use crate::noise_gate::{self, NoiseGateConfig};
use crate::spectral_subtraction::{self, AGGRESSIVE_STRENGTH};
use crate::vad::{self, VadConfig};

/// Default values for loop detection
pub mod defaults {
    pub const LOOP_WINDOW_MS: f32 = 500.0;
    pub const LOOP_THRESHOLD: f32 = 0.5;
    pub const LOOP_STRENGTH: f32 = 0.5;
    pub const LOOP_MIN_LAG_MS: f32 = 20.0;
    pub const ECHO_STRENGTH: f32 = 0.5;

    /// Threshold used by the time-domain detector in aggressive mode
    pub const AGGRESSIVE_LOOP_THRESHOLD: f32 = 0.3;
}

/// Longest loop-detection history accepted
pub const MAX_LOOP_WINDOW_MS: f32 = 1000.0;

/// Shortest loop-detection history accepted
pub const MIN_LOOP_WINDOW_MS: f32 = 10.0;

// ============================================================================
// Stream Format
// ============================================================================

/// Host stream parameters, fixed between reinitializations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: f32,
    pub channels: usize,
}

impl StreamFormat {
    pub fn new(sample_rate: f32, channels: usize) -> Self {
        Self { sample_rate, channels }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && (8000.0..=384_000.0).contains(&self.sample_rate)) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 || self.channels > 32 {
            return Err(ConfigError::InvalidChannelCount(self.channels));
        }
        Ok(())
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::new(48000.0, 1)
    }
}

// ============================================================================
// Resolved Modes
// ============================================================================

/// Noise reduction settings after resolving the aggressive flag
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseMode {
    Standard { strength: f32, gate: NoiseGateConfig },
    Aggressive,
}

impl NoiseMode {
    /// Subtraction factor β
    pub fn subtraction_strength(&self) -> f32 {
        match self {
            NoiseMode::Standard { strength, .. } => *strength,
            NoiseMode::Aggressive => AGGRESSIVE_STRENGTH,
        }
    }

    pub fn gate_config(&self) -> NoiseGateConfig {
        match self {
            NoiseMode::Standard { gate, .. } => gate.clone(),
            NoiseMode::Aggressive => NoiseGateConfig::aggressive(),
        }
    }
}

/// Loop detection settings after resolving the aggressive flag
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopMode {
    Standard { threshold: f32 },
    Aggressive,
}

impl LoopMode {
    pub fn threshold(&self) -> f32 {
        match self {
            LoopMode::Standard { threshold } => *threshold,
            LoopMode::Aggressive => defaults::AGGRESSIVE_LOOP_THRESHOLD,
        }
    }
}

// ============================================================================
// Pipeline Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enable_compression: bool,
    pub enable_noise_reduction: bool,
    pub enable_echo_suppression: bool,
    pub enable_adaptive_eq: bool,
    pub enable_spatial_enhancement: bool,
    pub enable_vad: bool,
    pub enable_loop_detection: bool,
    pub enable_spectral_loop_detection: bool,
    pub aggressive_noise_reduction: bool,
    pub aggressive_loop_detection: bool,

    pub compression_threshold_db: f32,
    pub compression_ratio: f32,
    pub compression_attack_ms: f32,
    pub compression_release_ms: f32,

    /// Spectral subtraction factor β in standard mode
    pub noise_reduction_strength: f32,
    pub noise_gate_threshold_db: f32,
    pub noise_gate_attack_ms: f32,
    pub noise_gate_release_ms: f32,

    pub echo_suppression_strength: f32,

    pub vad_threshold_db: f32,
    pub vad_attack_ms: f32,
    pub vad_release_ms: f32,
    pub voice_band_low_hz: f32,
    pub voice_band_high_hz: f32,

    /// Analysis frame length, a power of two
    pub fft_size: usize,

    pub loop_detection_window_ms: f32,
    pub loop_detection_threshold: f32,
    pub loop_detection_strength: f32,
    /// Shortest delay the time-domain detector reports
    pub loop_min_lag_ms: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_compression: true,
            enable_noise_reduction: true,
            enable_echo_suppression: false,
            enable_adaptive_eq: false,
            enable_spatial_enhancement: false,
            enable_vad: true,
            enable_loop_detection: false,
            enable_spectral_loop_detection: false,
            aggressive_noise_reduction: false,
            aggressive_loop_detection: false,

            compression_threshold_db: dynamics::defaults::THRESHOLD_DB,
            compression_ratio: dynamics::defaults::RATIO,
            compression_attack_ms: dynamics::defaults::ATTACK_MS,
            compression_release_ms: dynamics::defaults::RELEASE_MS,

            noise_reduction_strength: spectral_subtraction::DEFAULT_STRENGTH,
            noise_gate_threshold_db: noise_gate::defaults::THRESHOLD_DB,
            noise_gate_attack_ms: noise_gate::defaults::ATTACK_MS,
            noise_gate_release_ms: noise_gate::defaults::RELEASE_MS,

            echo_suppression_strength: defaults::ECHO_STRENGTH,

            vad_threshold_db: vad::defaults::THRESHOLD_DB,
            vad_attack_ms: vad::defaults::ATTACK_MS,
            vad_release_ms: vad::defaults::RELEASE_MS,
            voice_band_low_hz: vad::DEFAULT_BAND_LOW_HZ,
            voice_band_high_hz: vad::DEFAULT_BAND_HIGH_HZ,

            fft_size: DEFAULT_FFT_SIZE,

            loop_detection_window_ms: defaults::LOOP_WINDOW_MS,
            loop_detection_threshold: defaults::LOOP_THRESHOLD,
            loop_detection_strength: defaults::LOOP_STRENGTH,
            loop_min_lag_ms: defaults::LOOP_MIN_LAG_MS,
        }
    }
}

impl PipelineConfig {
    /// Check every option against its range for a given stream format
    pub fn validate(&self, format: &StreamFormat) -> Result<(), ConfigError> {
        format.validate()?;
        validate_fft_size(self.fft_size)?;

        self.compressor_config().validate()?;

        ConfigError::check_range(
            "noise_reduction_strength",
            self.noise_reduction_strength,
            0.0,
            2.0,
        )?;
        ConfigError::check_range("noise_gate_threshold_db", self.noise_gate_threshold_db, -100.0, 0.0)?;
        ConfigError::check_range("noise_gate_attack_ms", self.noise_gate_attack_ms, 0.0, 1000.0)?;
        ConfigError::check_range("noise_gate_release_ms", self.noise_gate_release_ms, 0.0, 5000.0)?;
        ConfigError::check_range(
            "echo_suppression_strength",
            self.echo_suppression_strength,
            0.0,
            1.0,
        )?;
        ConfigError::check_range("vad_threshold_db", self.vad_threshold_db, -60.0, 0.0)?;
        ConfigError::check_range("vad_attack_ms", self.vad_attack_ms, 0.0, 1000.0)?;
        ConfigError::check_range("vad_release_ms", self.vad_release_ms, 0.0, 5000.0)?;

        let nyquist = format.sample_rate / 2.0;
        if !(self.voice_band_low_hz.is_finite()
            && self.voice_band_high_hz.is_finite()
            && self.voice_band_low_hz >= 0.0
            && self.voice_band_low_hz < self.voice_band_high_hz
            && self.voice_band_high_hz <= nyquist)
        {
            return Err(ConfigError::InvalidVoiceBand {
                low_hz: self.voice_band_low_hz,
                high_hz: self.voice_band_high_hz,
                sample_rate: format.sample_rate,
            });
        }

        ConfigError::check_range(
            "loop_detection_window_ms",
            self.loop_detection_window_ms,
            MIN_LOOP_WINDOW_MS,
            MAX_LOOP_WINDOW_MS,
        )?;
        ConfigError::check_range("loop_detection_threshold", self.loop_detection_threshold, 0.0, 1.0)?;
        ConfigError::check_range("loop_detection_strength", self.loop_detection_strength, 0.0, 1.0)?;
        ConfigError::check_range(
            "loop_min_lag_ms",
            self.loop_min_lag_ms,
            0.0,
            self.loop_detection_window_ms / 2.0,
        )?;

        Ok(())
    }

    /// True when switching from `self` to `next` needs buffers rebuilt
    pub fn requires_reinit(&self, next: &PipelineConfig) -> bool {
        self.fft_size != next.fft_size
            || self.loop_detection_window_ms != next.loop_detection_window_ms
    }

    /// True when any operator needs the spectral frame engine
    pub fn spectral_processing_enabled(&self) -> bool {
        self.enable_noise_reduction
            || self.enable_vad
            || self.enable_echo_suppression
            || self.enable_adaptive_eq
            || self.enable_spatial_enhancement
    }

    pub fn noise_mode(&self) -> NoiseMode {
        if self.aggressive_noise_reduction {
            NoiseMode::Aggressive
        } else {
            NoiseMode::Standard {
                strength: self.noise_reduction_strength,
                gate: NoiseGateConfig::default()
                    .with_threshold_db(self.noise_gate_threshold_db)
                    .with_times(self.noise_gate_attack_ms, self.noise_gate_release_ms),
            }
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        if self.aggressive_loop_detection {
            LoopMode::Aggressive
        } else {
            LoopMode::Standard {
                threshold: self.loop_detection_threshold,
            }
        }
    }

    pub fn compressor_config(&self) -> CompressorConfig {
        CompressorConfig {
            threshold_db: self.compression_threshold_db,
            ratio: self.compression_ratio,
            attack_ms: self.compression_attack_ms,
            release_ms: self.compression_release_ms,
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            threshold_db: self.vad_threshold_db,
            attack_ms: self.vad_attack_ms,
            release_ms: self.vad_release_ms,
            band_low_hz: self.voice_band_low_hz,
            band_high_hz: self.voice_band_high_hz,
        }
    }

    /// Builder method for the analysis frame
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Enable every processing stage and both loop detectors
    pub fn with_all_features(mut self) -> Self {
        self.enable_compression = true;
        self.enable_noise_reduction = true;
        self.enable_echo_suppression = true;
        self.enable_adaptive_eq = true;
        self.enable_spatial_enhancement = true;
        self.enable_vad = true;
        self.enable_loop_detection = true;
        self.enable_spectral_loop_detection = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate(&StreamFormat::default()).is_ok());
        assert!(config.validate(&StreamFormat::new(16000.0, 2)).is_ok());
        assert!(config.spectral_processing_enabled());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let format = StreamFormat::default();

        let config = PipelineConfig::default().with_fft_size(1000);
        assert!(matches!(config.validate(&format), Err(ConfigError::InvalidFftSize { .. })));

        let config = PipelineConfig { noise_reduction_strength: 3.0, ..Default::default() };
        assert!(matches!(
            config.validate(&format),
            Err(ConfigError::OutOfRange { name: "noise_reduction_strength", .. })
        ));

        let config = PipelineConfig {
            voice_band_low_hz: 300.0,
            voice_band_high_hz: 200.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(&format), Err(ConfigError::InvalidVoiceBand { .. })));

        let config = PipelineConfig { loop_detection_window_ms: 2000.0, ..Default::default() };
        assert!(config.validate(&format).is_err());

        let config = PipelineConfig { compression_ratio: f32::NAN, ..Default::default() };
        assert!(config.validate(&format).is_err());
    }

    #[test]
    fn test_format_validation() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.validate(&StreamFormat::new(0.0, 1)),
            Err(ConfigError::InvalidSampleRate(0.0))
        );
        assert_eq!(
            config.validate(&StreamFormat::new(48000.0, 0)),
            Err(ConfigError::InvalidChannelCount(0))
        );
    }

    #[test]
    fn test_requires_reinit() {
        let base = PipelineConfig::default();
        assert!(base.requires_reinit(&base.clone().with_fft_size(1024)));

        let window = PipelineConfig { loop_detection_window_ms: 250.0, ..base.clone() };
        assert!(base.requires_reinit(&window));

        let strength = PipelineConfig { noise_reduction_strength: 1.0, ..base.clone() };
        assert!(!base.requires_reinit(&strength));
    }

    #[test]
    fn test_mode_resolution() {
        let config = PipelineConfig::default();
        match config.noise_mode() {
            NoiseMode::Standard { strength, gate } => {
                assert_eq!(strength, config.noise_reduction_strength);
                assert_eq!(gate.threshold_db, config.noise_gate_threshold_db);
                assert!(gate.track_noise_floor);
            }
            NoiseMode::Aggressive => panic!("expected standard mode"),
        }

        let aggressive = PipelineConfig {
            aggressive_noise_reduction: true,
            aggressive_loop_detection: true,
            ..config
        };
        assert_eq!(aggressive.noise_mode(), NoiseMode::Aggressive);
        assert_eq!(aggressive.noise_mode().subtraction_strength(), 2.0);
        assert_eq!(aggressive.noise_mode().gate_config().threshold_db, -35.0);
        assert_eq!(aggressive.loop_mode().threshold(), 0.3);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "fft_size": 1024, "enable_adaptive_eq": true }"#).unwrap();
        assert_eq!(config.fft_size, 1024);
        assert!(config.enable_adaptive_eq);
        assert_eq!(config.compression_ratio, PipelineConfig::default().compression_ratio);

        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
