//! Per-frame operator chain
//!
//! Runs the spectral operators in a fixed order on every frame the
//! [`FrameEngine`] hands over:
//!
//! 1. noise profile update and spectral subtraction
//! 2. wideband noise floor update
//! 3. voice activity decision, then noise gate (silence) or voice-band
//!    emphasis (speech)
//! 4. echo suppression
//! 5. adaptive EQ
//! 6. spatial variant for the secondary channels
//!
//! Estimators adapt only on complete frames. Frames that reach past the
//! block end reuse the last voice decision.

use tracing::debug;

use crate::config::{NoiseMode, PipelineConfig};
use crate::echo_suppressor::EchoSuppressor;
use crate::error::{ConfigError, ProcessingError};
use crate::frame_engine::{FrameEngine, SpectralFrame, SpectralProcessor};
use crate::noise_floor::AdaptiveNoiseFloor;
use crate::noise_gate::SpectralNoiseGate;
use crate::noise_profile::NoiseProfileEstimator;
use crate::spectral_shaping::{AdaptiveEq, SpatialEnhancer};
use crate::spectral_subtraction::SpectralSubtractor;
use crate::vad::VoiceActivityDetector;

/// Stage switches resolved from the pipeline config
#[derive(Debug, Clone, PartialEq)]
struct Stages {
    noise_reduction: bool,
    vad: bool,
    echo: bool,
    eq: bool,
    spatial: bool,
}

impl From<&PipelineConfig> for Stages {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            noise_reduction: config.enable_noise_reduction,
            vad: config.enable_vad,
            echo: config.enable_echo_suppression,
            eq: config.enable_adaptive_eq,
            spatial: config.enable_spatial_enhancement,
        }
    }
}

/// Frame counters since construction or reset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainStats {
    pub frames: u64,
    pub voice_frames: u64,
    pub gated_frames: u64,
    pub echo_frames: u64,
}

#[derive(Debug)]
pub struct SpectralChain {
    stages: Stages,
    noise_mode: NoiseMode,
    fft_size: usize,
    sample_rate: f32,
    amplitude_scale: f32,

    profile: NoiseProfileEstimator,
    subtractor: SpectralSubtractor,
    noise_floor: AdaptiveNoiseFloor,
    vad: VoiceActivityDetector,
    gate: SpectralNoiseGate,
    echo: EchoSuppressor,
    eq: AdaptiveEq,
    spatial: SpatialEnhancer,

    stats: ChainStats,
}

impl SpectralChain {
    /// Build the operators for frames produced by `engine`
    pub fn new(
        config: &PipelineConfig,
        sample_rate: f32,
        engine: &FrameEngine,
    ) -> Result<Self, ConfigError> {
        let fft_size = engine.fft_size();
        let num_bins = engine.num_bins();
        let frame_rate = engine.frame_rate(sample_rate);
        let noise_mode = config.noise_mode();

        debug!(
            "Creating SpectralChain: fft_size={}, frame_rate={:.2}, noise_mode={:?}",
            fft_size, frame_rate, noise_mode
        );

        Ok(Self {
            stages: Stages::from(config),
            fft_size,
            sample_rate,
            amplitude_scale: engine.amplitude_scale(),
            profile: NoiseProfileEstimator::new(num_bins),
            subtractor: SpectralSubtractor::new(noise_mode.subtraction_strength()),
            noise_floor: AdaptiveNoiseFloor::new()?,
            vad: VoiceActivityDetector::new(&config.vad_config(), fft_size, sample_rate, frame_rate),
            gate: SpectralNoiseGate::new(noise_mode.gate_config(), frame_rate, num_bins),
            echo: EchoSuppressor::new(fft_size, config.echo_suppression_strength)?,
            eq: AdaptiveEq::new(fft_size, sample_rate),
            spatial: SpatialEnhancer::new(fft_size, sample_rate),
            noise_mode,
            stats: ChainStats::default(),
        })
    }

    /// Apply options that do not change any buffer size
    ///
    /// Estimator and envelope state carries over.
    pub fn apply_config(&mut self, config: &PipelineConfig) {
        let noise_mode = config.noise_mode();
        self.subtractor.set_strength(noise_mode.subtraction_strength());
        self.gate.update_config(noise_mode.gate_config());
        self.vad
            .update_config(&config.vad_config(), self.fft_size, self.sample_rate);
        self.echo.set_strength(config.echo_suppression_strength);
        self.stages = Stages::from(config);

        if noise_mode != self.noise_mode {
            debug!("Noise mode changed to {:?}", noise_mode);
        }
        self.noise_mode = noise_mode;
    }

    #[inline]
    pub fn noise_mode(&self) -> &NoiseMode {
        &self.noise_mode
    }

    /// Smoothed voice decision from the last complete frame
    #[inline]
    pub fn voice_active(&self) -> bool {
        self.vad.is_active()
    }

    #[inline]
    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor.floor_db()
    }

    #[inline]
    pub fn noise_profile(&self) -> &NoiseProfileEstimator {
        &self.profile
    }

    #[inline]
    pub fn stats(&self) -> ChainStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.profile.reset();
        self.noise_floor.reset();
        self.vad.reset();
        self.gate.reset();
        self.echo.reset();
        self.eq.reset();
        self.stats = ChainStats::default();
    }
}

impl SpectralProcessor for SpectralChain {
    fn process_frame(&mut self, frame: &mut SpectralFrame<'_>) -> Result<bool, ProcessingError> {
        let num_bins = frame.magnitudes.len();
        self.stats.frames += 1;

        if self.stages.noise_reduction {
            if frame.complete {
                self.profile.update(frame.magnitudes)?;
            }
            if self.profile.frame_count() > 0 {
                self.subtractor
                    .apply(&mut frame.spectrum[..num_bins], self.profile.spectrum());
            }
        }

        if frame.complete {
            self.noise_floor.update(frame.rms);
        }

        if self.stages.vad {
            let active = if frame.complete {
                self.vad.analyze(frame.magnitudes)
            } else {
                self.vad.is_active()
            };

            if active {
                self.vad.emphasize_voice_band(frame.spectrum);
                self.stats.voice_frames += 1;
            } else {
                self.gate.process(
                    frame.spectrum,
                    self.amplitude_scale,
                    self.noise_floor.floor_db(),
                );
                self.stats.gated_frames += 1;
            }
        }

        if self.stages.echo {
            self.echo.process(frame.spectrum, frame.current, frame.previous)?;
            if self.echo.last_gain() < 1.0 {
                self.stats.echo_frames += 1;
            }
        }

        if self.stages.eq {
            self.eq.process(frame.spectrum, self.amplitude_scale);
        }

        if self.stages.spatial && frame.channels > 1 {
            self.spatial.apply(frame.spectrum, frame.spatial);
            return Ok(true);
        }

        Ok(false)
    }
}
