//! Spectral noise gate for non-speech frames
//!
//! The gate sweeps one envelope follower across the bins of a frame: each
//! bin whose amplitude clears the threshold pushes the follower toward 1,
//! each bin below it lets the follower release toward 0. The level left at
//! the end of the sweep is a single gain applied to every bin, so a frame
//! made of mostly sub-threshold bins is pulled down as a whole.
//!
//! Two resolved settings exist: the configured standard gate, whose
//! threshold also tracks the adaptive noise floor, and the fixed
//! aggressive gate.

use num_complex::Complex32;
use tracing::debug;

use crate::utils::{db_to_linear, EnvelopeFollower};

/// Default values for noise gate parameters
pub mod defaults {
    pub const THRESHOLD_DB: f32 = -45.0;
    pub const ATTACK_MS: f32 = 5.0;
    pub const RELEASE_MS: f32 = 80.0;

    pub const AGGRESSIVE_THRESHOLD_DB: f32 = -35.0;
    pub const AGGRESSIVE_ATTACK_MS: f32 = 2.0;
    pub const AGGRESSIVE_RELEASE_MS: f32 = 10.0;

    /// Margin kept between the adaptive noise floor and the standard threshold
    pub const NOISE_FLOOR_MARGIN_DB: f32 = 6.0;
}

/// Gate level below which a frame counts as closed in the statistics
const CLOSED_LEVEL: f32 = 0.5;

/// Resolved gate settings
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseGateConfig {
    /// Amplitude threshold in dB
    pub threshold_db: f32,

    /// Attack time in milliseconds
    pub attack_ms: f32,

    /// Release time in milliseconds
    pub release_ms: f32,

    /// Raise the threshold to `noise_floor + margin` when that is higher
    pub track_noise_floor: bool,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            threshold_db: defaults::THRESHOLD_DB,
            attack_ms: defaults::ATTACK_MS,
            release_ms: defaults::RELEASE_MS,
            track_noise_floor: true,
        }
    }
}

impl NoiseGateConfig {
    /// Fixed settings used in aggressive noise mode
    pub fn aggressive() -> Self {
        Self {
            threshold_db: defaults::AGGRESSIVE_THRESHOLD_DB,
            attack_ms: defaults::AGGRESSIVE_ATTACK_MS,
            release_ms: defaults::AGGRESSIVE_RELEASE_MS,
            track_noise_floor: false,
        }
    }

    /// Builder method for threshold
    pub fn with_threshold_db(mut self, threshold_db: f32) -> Self {
        self.threshold_db = threshold_db;
        self
    }

    /// Builder method for timing
    pub fn with_times(mut self, attack_ms: f32, release_ms: f32) -> Self {
        self.attack_ms = attack_ms;
        self.release_ms = release_ms;
        self
    }

    pub fn with_noise_floor_tracking(mut self, enabled: bool) -> Self {
        self.track_noise_floor = enabled;
        self
    }
}

/// Per-bin envelope gate applied to whole spectral frames
#[derive(Debug, Clone)]
pub struct SpectralNoiseGate {
    config: NoiseGateConfig,
    envelope: EnvelopeFollower,
    /// Bin updates per second: frame rate times bins per frame
    sweep_rate: f32,
    last_level: f32,
    last_threshold_db: f32,

    // Statistics
    pub frames_processed: u64,
    pub frames_closed: u64,
}

impl SpectralNoiseGate {
    pub fn new(config: NoiseGateConfig, frame_rate: f32, num_bins: usize) -> Self {
        debug!("Creating SpectralNoiseGate with config: {:?}", config);

        let sweep_rate = frame_rate * num_bins as f32;
        Self {
            envelope: EnvelopeFollower::new(config.attack_ms, config.release_ms, sweep_rate),
            last_threshold_db: config.threshold_db,
            config,
            sweep_rate,
            last_level: 1.0,
            frames_processed: 0,
            frames_closed: 0,
        }
    }

    /// Swap settings, keeping the envelope state
    pub fn update_config(&mut self, config: NoiseGateConfig) {
        self.envelope.set_times(config.attack_ms, config.release_ms, self.sweep_rate);
        self.config = config;
    }

    #[inline]
    pub fn config(&self) -> &NoiseGateConfig {
        &self.config
    }

    /// Threshold in effect for a given noise floor estimate
    pub fn effective_threshold_db(&self, noise_floor_db: f32) -> f32 {
        if self.config.track_noise_floor && noise_floor_db.is_finite() {
            self.config
                .threshold_db
                .max(noise_floor_db + defaults::NOISE_FLOOR_MARGIN_DB)
        } else {
            self.config.threshold_db
        }
    }

    /// Gate bins `0..=N/2` of a frame and return the applied level
    ///
    /// `amplitude_scale` converts raw FFT magnitudes to sine amplitude
    /// (`2 / Σ window`) so the threshold reads as a signal level.
    pub fn process(
        &mut self,
        spectrum: &mut [Complex32],
        amplitude_scale: f32,
        noise_floor_db: f32,
    ) -> f32 {
        let num_bins = spectrum.len() / 2 + 1;
        self.last_threshold_db = self.effective_threshold_db(noise_floor_db);
        let threshold = db_to_linear(self.last_threshold_db);

        for bin in spectrum.iter().take(num_bins) {
            let target = if bin.norm() * amplitude_scale > threshold { 1.0 } else { 0.0 };
            self.envelope.process(target);
        }

        let level = self.envelope.current().clamp(0.0, 1.0);
        for bin in spectrum.iter_mut().take(num_bins) {
            *bin *= level;
        }

        self.last_level = level;
        self.frames_processed += 1;
        if level < CLOSED_LEVEL {
            self.frames_closed += 1;
        }
        level
    }

    /// Gain applied to the last gated frame
    #[inline]
    pub fn current_level(&self) -> f32 {
        self.last_level
    }

    #[inline]
    pub fn last_threshold_db(&self) -> f32 {
        self.last_threshold_db
    }

    pub fn reset(&mut self) {
        self.envelope.reset();
        self.last_level = 1.0;
        self.frames_processed = 0;
        self.frames_closed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DB_NOISE_FLOOR;
    use proptest::prelude::*;

    const FRAME_RATE: f32 = 93.75;
    const FFT_SIZE: usize = 64;

    fn flat_spectrum(amplitude: f32) -> Vec<Complex32> {
        vec![Complex32::new(amplitude, 0.0); FFT_SIZE]
    }

    fn gate(config: NoiseGateConfig) -> SpectralNoiseGate {
        SpectralNoiseGate::new(config, FRAME_RATE, FFT_SIZE / 2 + 1)
    }

    #[test]
    fn test_loud_frames_open_gate() {
        let mut gate = gate(NoiseGateConfig::default());
        let loud = db_to_linear(-10.0);
        let mut level = 0.0;
        for _ in 0..20 {
            let mut spectrum = flat_spectrum(loud);
            level = gate.process(&mut spectrum, 1.0, DB_NOISE_FLOOR);
        }
        assert!(level > 0.99, "level {}", level);
    }

    #[test]
    fn test_quiet_frames_close_gate() {
        let mut gate = gate(NoiseGateConfig::aggressive());
        let quiet = db_to_linear(-60.0);
        for _ in 0..20 {
            gate.process(&mut flat_spectrum(quiet), 1.0, DB_NOISE_FLOOR);
        }
        let mut spectrum = flat_spectrum(quiet);
        gate.process(&mut spectrum, 1.0, DB_NOISE_FLOOR);
        assert!(gate.current_level() < 0.01);
        assert!(spectrum[3].norm() < quiet * 0.01);
        // Mirror half left for the symmetry pass
        assert_eq!(spectrum[FFT_SIZE - 1].re, quiet);
        assert!(gate.frames_closed > 0);
    }

    #[test]
    fn test_noise_floor_raises_threshold() {
        let gate = gate(NoiseGateConfig::default().with_threshold_db(-50.0));
        assert_eq!(gate.effective_threshold_db(-80.0), -50.0);
        assert_eq!(gate.effective_threshold_db(-30.0), -24.0);

        let fixed = SpectralNoiseGate::new(NoiseGateConfig::aggressive(), FRAME_RATE, 33);
        assert_eq!(fixed.effective_threshold_db(-10.0), -35.0);
    }

    #[test]
    fn test_config_update() {
        let mut gate = gate(NoiseGateConfig::default());
        let signal = db_to_linear(-20.0);

        for _ in 0..20 {
            gate.process(&mut flat_spectrum(signal), 1.0, DB_NOISE_FLOOR);
        }
        let level_before = gate.current_level();

        gate.update_config(NoiseGateConfig::default().with_threshold_db(-5.0));
        for _ in 0..20 {
            gate.process(&mut flat_spectrum(signal), 1.0, DB_NOISE_FLOOR);
        }
        assert!(gate.current_level() < level_before);
    }

    #[test]
    fn test_reset() {
        let mut gate = gate(NoiseGateConfig::default());
        gate.process(&mut flat_spectrum(1.0), 1.0, DB_NOISE_FLOOR);
        assert!(gate.frames_processed > 0);

        gate.reset();
        assert_eq!(gate.frames_processed, 0);
        assert_eq!(gate.current_level(), 1.0);
    }

    proptest! {
        #[test]
        fn prop_higher_threshold_never_passes_more(
            mags in prop::collection::vec(0.0f32..1.0, FFT_SIZE),
            low_db in -80.0f32..-10.0,
            delta_db in 0.0f32..30.0,
            frames in 1usize..6,
        ) {
            let spectrum: Vec<Complex32> = mags.iter().map(|&m| Complex32::new(m, 0.0)).collect();
            let config = NoiseGateConfig::default().with_noise_floor_tracking(false);
            let mut lenient = gate(config.clone().with_threshold_db(low_db));
            let mut strict = gate(config.with_threshold_db(low_db + delta_db));

            let mut lenient_out = spectrum.clone();
            let mut strict_out = spectrum.clone();
            for _ in 0..frames {
                lenient_out.copy_from_slice(&spectrum);
                strict_out.copy_from_slice(&spectrum);
                lenient.process(&mut lenient_out, 1.0, DB_NOISE_FLOOR);
                strict.process(&mut strict_out, 1.0, DB_NOISE_FLOOR);
            }

            prop_assert!(strict.current_level() <= lenient.current_level() + 1e-6);
            for (s, l) in strict_out.iter().zip(&lenient_out).take(FFT_SIZE / 2 + 1) {
                prop_assert!(s.norm() <= l.norm() + 1e-6);
            }
        }
    }
}
