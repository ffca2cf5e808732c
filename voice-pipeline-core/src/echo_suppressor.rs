//! Frame-to-frame echo suppression
//!
//! Correlates the current analysis frame with the previous one over every
//! lag of the frame. A strong match means the frame largely repeats what
//! was just heard, so the whole frame is attenuated in proportion to the
//! match. Phase is untouched.

use num_complex::Complex32;

use crate::correlation::{CorrelationPeak, CrossCorrelator};
use crate::fft_processor::TransformError;
use crate::utils::correlation_attenuation;

/// Correlation above which a frame is treated as echo
pub const ECHO_CORRELATION_THRESHOLD: f32 = 0.1;

/// Default suppression strength
pub const DEFAULT_STRENGTH: f32 = 0.5;

#[derive(Debug)]
pub struct EchoSuppressor {
    strength: f32,
    correlator: CrossCorrelator,
    last_peak: CorrelationPeak,
    last_gain: f32,
}

impl EchoSuppressor {
    pub fn new(frame_len: usize, strength: f32) -> Result<Self, TransformError> {
        Ok(Self {
            strength: strength.clamp(0.0, 1.0),
            correlator: CrossCorrelator::new(frame_len)?,
            last_peak: CorrelationPeak::default(),
            last_gain: 1.0,
        })
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.strength = strength.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn strength(&self) -> f32 {
        self.strength
    }

    /// Attenuate bins `0..=N/2` of `spectrum` when `current` repeats `previous`
    ///
    /// Returns the correlation peak, `corr[lag] = Σ current[n]·previous[n+lag]`
    /// normalized by both frame norms.
    pub fn process(
        &mut self,
        spectrum: &mut [Complex32],
        current: &[f32],
        previous: &[f32],
    ) -> Result<CorrelationPeak, TransformError> {
        let peak = self.correlator.peak_normalized(current, previous)?;

        self.last_gain = if peak.correlation > ECHO_CORRELATION_THRESHOLD {
            correlation_attenuation(self.strength, peak.correlation)
        } else {
            1.0
        };

        if self.last_gain < 1.0 {
            let num_bins = spectrum.len() / 2 + 1;
            for bin in spectrum.iter_mut().take(num_bins) {
                *bin *= self.last_gain;
            }
        }

        self.last_peak = peak;
        Ok(peak)
    }

    #[inline]
    pub fn last_peak(&self) -> CorrelationPeak {
        self.last_peak
    }

    #[inline]
    pub fn last_gain(&self) -> f32 {
        self.last_gain
    }

    pub fn reset(&mut self) {
        self.last_peak = CorrelationPeak::default();
        self.last_gain = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft_processor::SpectralTransform;
    use crate::utils::hann_window;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::PI;

    const FRAME: usize = 2048;

    fn sine_frame() -> Vec<f32> {
        let window = hann_window(FRAME);
        (0..FRAME)
            .map(|i| 0.5 * (2.0 * PI * 1000.0 * i as f32 / 48000.0).sin() * window[i])
            .collect()
    }

    fn spectrum_of(frame: &[f32]) -> Vec<Complex32> {
        let mut transform = SpectralTransform::new(FRAME).unwrap();
        let mut spectrum = vec![Complex32::new(0.0, 0.0); FRAME];
        transform.forward_real(frame, &mut spectrum).unwrap();
        spectrum
    }

    #[test]
    fn test_identical_frames_attenuated_by_strength() {
        let strength = 0.6;
        let mut suppressor = EchoSuppressor::new(FRAME, strength).unwrap();
        let frame = sine_frame();
        let original = spectrum_of(&frame);
        let mut spectrum = original.clone();

        let peak = suppressor.process(&mut spectrum, &frame, &frame).unwrap();
        assert_eq!(peak.lag, 0);
        assert!((peak.correlation - 1.0).abs() < 1e-3);

        let bin = (1000.0 * FRAME as f32 / 48000.0).round() as usize;
        let ratio = spectrum[bin].norm() / original[bin].norm();
        assert!((ratio - (1.0 - strength)).abs() < 1e-3, "ratio {}", ratio);
        assert!((spectrum[bin].arg() - original[bin].arg()).abs() < 1e-4);
    }

    #[test]
    fn test_uncorrelated_frames_pass() {
        let mut rng = SmallRng::seed_from_u64(11);
        let window = hann_window(FRAME);
        let a: Vec<f32> = window.iter().map(|w| w * rng.gen_range(-1.0f32..1.0)).collect();
        let b: Vec<f32> = window.iter().map(|w| w * rng.gen_range(-1.0f32..1.0)).collect();

        let mut suppressor = EchoSuppressor::new(FRAME, 1.0).unwrap();
        let original = spectrum_of(&a);
        let mut spectrum = original.clone();
        let peak = suppressor.process(&mut spectrum, &a, &b).unwrap();

        assert!(peak.correlation < 0.3, "corr {}", peak.correlation);

        let expected_gain = if peak.correlation > ECHO_CORRELATION_THRESHOLD {
            1.0 - peak.correlation
        } else {
            1.0
        };
        assert!((suppressor.last_gain() - expected_gain).abs() < 1e-6);
        assert!(suppressor.last_gain() > 0.7);
        for (out, inp) in spectrum.iter().zip(&original).take(FRAME / 2 + 1) {
            assert!((out.norm() - inp.norm() * expected_gain).abs() < 1e-3);
        }
    }

    #[test]
    fn test_silent_previous_frame() {
        let mut suppressor = EchoSuppressor::new(FRAME, 1.0).unwrap();
        let frame = sine_frame();
        let mut spectrum = spectrum_of(&frame);
        let peak = suppressor.process(&mut spectrum, &frame, &vec![0.0; FRAME]).unwrap();
        assert_eq!(peak.correlation, 0.0);
        assert_eq!(suppressor.last_gain(), 1.0);
    }
}
