//! Voice activity detection by band-energy ratio
//!
//! A frame counts as speech when the mean magnitude inside the voice band
//! is more than [`VOICE_BAND_RATIO`] times the mean over the whole
//! spectrum. The 0/1 decision is smoothed by an envelope follower running
//! at the frame rate and compared against a dB threshold, so a single
//! stray frame does not flip the detector.
//!
//! When speech is active, [`VoiceActivityDetector::emphasize_voice_band`]
//! lifts the voice band and ducks everything else.

use num_complex::Complex32;
use tracing::debug;

use crate::utils::{db_to_linear, frequency_to_bin, EnvelopeFollower};

/// Default voice band, Hz
pub const DEFAULT_BAND_LOW_HZ: f32 = 85.0;
pub const DEFAULT_BAND_HIGH_HZ: f32 = 255.0;

/// Voice band mean must exceed the overall mean by this factor
pub const VOICE_BAND_RATIO: f32 = 1.5;

/// Gain applied inside the voice band while speech is active
pub const IN_BAND_GAIN: f32 = 1.2;

/// Gain applied outside the voice band while speech is active
pub const OUT_OF_BAND_GAIN: f32 = 0.1;

/// Default values for the detector
pub mod defaults {
    pub const THRESHOLD_DB: f32 = -6.0;
    pub const ATTACK_MS: f32 = 20.0;
    pub const RELEASE_MS: f32 = 150.0;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Smoothed decision level above which speech is active
    pub threshold_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub band_low_hz: f32,
    pub band_high_hz: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: defaults::THRESHOLD_DB,
            attack_ms: defaults::ATTACK_MS,
            release_ms: defaults::RELEASE_MS,
            band_low_hz: DEFAULT_BAND_LOW_HZ,
            band_high_hz: DEFAULT_BAND_HIGH_HZ,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    /// Inclusive voice band bin range
    band_low: usize,
    band_high: usize,
    envelope: EnvelopeFollower,
    threshold: f32,
    frame_rate: f32,
    active: bool,
    last_ratio: f32,
}

impl VoiceActivityDetector {
    /// `frame_rate` is the number of `analyze` calls per second
    pub fn new(config: &VadConfig, fft_size: usize, sample_rate: f32, frame_rate: f32) -> Self {
        debug!("Creating VoiceActivityDetector with config: {:?}", config);

        let (band_low, band_high) = band_bins(config, fft_size, sample_rate);
        Self {
            band_low,
            band_high,
            envelope: EnvelopeFollower::new(config.attack_ms, config.release_ms, frame_rate),
            threshold: db_to_linear(config.threshold_db),
            frame_rate,
            active: false,
            last_ratio: 0.0,
        }
    }

    /// Apply new thresholds and times without losing the envelope state
    pub fn update_config(&mut self, config: &VadConfig, fft_size: usize, sample_rate: f32) {
        let (band_low, band_high) = band_bins(config, fft_size, sample_rate);
        self.band_low = band_low;
        self.band_high = band_high;
        self.envelope.set_times(config.attack_ms, config.release_ms, self.frame_rate);
        self.threshold = db_to_linear(config.threshold_db);
    }

    /// Raw per-frame decision without touching any state
    pub fn classify(&self, magnitudes: &[f32]) -> bool {
        self.band_ratio(magnitudes) > VOICE_BAND_RATIO
    }

    /// Classify a magnitude frame (bins `0..=N/2`) and update the smoothed state
    pub fn analyze(&mut self, magnitudes: &[f32]) -> bool {
        self.last_ratio = self.band_ratio(magnitudes);
        let target = if self.last_ratio > VOICE_BAND_RATIO { 1.0 } else { 0.0 };
        let level = self.envelope.process(target);
        self.active = level > self.threshold;
        self.active
    }

    /// Smoothed decision from the last analyzed frame
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Voice band mean over total mean of the last analyzed frame
    #[inline]
    pub fn last_ratio(&self) -> f32 {
        self.last_ratio
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.envelope.current()
    }

    /// Scale the voice band by [`IN_BAND_GAIN`] and the rest by [`OUT_OF_BAND_GAIN`]
    ///
    /// Only bins `0..=N/2` are touched.
    pub fn emphasize_voice_band(&self, spectrum: &mut [Complex32]) {
        let num_bins = spectrum.len() / 2 + 1;
        for (k, bin) in spectrum.iter_mut().take(num_bins).enumerate() {
            let gain = if (self.band_low..=self.band_high).contains(&k) {
                IN_BAND_GAIN
            } else {
                OUT_OF_BAND_GAIN
            };
            *bin *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.envelope.reset();
        self.active = false;
        self.last_ratio = 0.0;
    }

    fn band_ratio(&self, magnitudes: &[f32]) -> f32 {
        if magnitudes.is_empty() || self.band_low >= magnitudes.len() {
            return 0.0;
        }

        let total_mean = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
        if !(total_mean > 0.0 && total_mean.is_finite()) {
            return 0.0;
        }

        let high = self.band_high.min(magnitudes.len() - 1);
        let band = &magnitudes[self.band_low..=high];
        let band_mean = band.iter().sum::<f32>() / band.len() as f32;
        band_mean / total_mean
    }
}

fn band_bins(config: &VadConfig, fft_size: usize, sample_rate: f32) -> (usize, usize) {
    let low = frequency_to_bin(config.band_low_hz, fft_size, sample_rate);
    let high = frequency_to_bin(config.band_high_hz, fft_size, sample_rate).max(low);
    (low, high)
}
