//! Spectral subtraction for noise reduction
//!
//! Removes the estimated noise magnitude from each bin of a frame while
//! keeping its phase:
//!
//! ```text
//! |Y[k]| = max(0, |X[k]| - β · N[k])
//! ```
//!
//! β is the configured strength in standard mode and a fixed over-subtraction
//! factor in aggressive mode. The noise estimate `N` comes from
//! [`crate::noise_profile::NoiseProfileEstimator`].

use num_complex::Complex32;

// ============================================================================
// Constants
// ============================================================================

/// Default subtraction strength in standard mode
pub const DEFAULT_STRENGTH: f32 = 0.7;

/// Over-subtraction factor used in aggressive mode
pub const AGGRESSIVE_STRENGTH: f32 = 2.0;

/// Largest strength accepted by configuration
pub const MAX_STRENGTH: f32 = 4.0;

// ============================================================================
// Spectral Subtractor
// ============================================================================

/// Magnitude-domain noise subtraction operator
#[derive(Debug, Clone)]
pub struct SpectralSubtractor {
    strength: f32,
    /// Mean per-bin gain of the last frame, for diagnostics
    last_mean_gain: f32,
}

impl SpectralSubtractor {
    pub fn new(strength: f32) -> Self {
        Self {
            strength: strength.clamp(0.0, MAX_STRENGTH),
            last_mean_gain: 1.0,
        }
    }

    #[inline]
    pub fn strength(&self) -> f32 {
        self.strength
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.strength = strength.clamp(0.0, MAX_STRENGTH);
    }

    #[inline]
    pub fn last_mean_gain(&self) -> f32 {
        self.last_mean_gain
    }

    /// Subtract `strength · noise[k]` from bins `0..noise.len()`
    ///
    /// Each bin is multiplied by the non-negative real ratio
    /// `new_mag / mag`, so its phase is unchanged. Bins with zero
    /// magnitude stay zero.
    pub fn apply(&mut self, spectrum: &mut [Complex32], noise: &[f32]) {
        let mut gain_sum = 0.0;
        let mut count = 0usize;

        for (bin, &noise_mag) in spectrum.iter_mut().zip(noise) {
            let mag = bin.norm();
            let gain = if mag > 0.0 && mag.is_finite() {
                (mag - self.strength * noise_mag).max(0.0) / mag
            } else {
                0.0
            };
            *bin *= gain;

            gain_sum += gain;
            count += 1;
        }

        if count > 0 {
            self.last_mean_gain = gain_sum / count as f32;
        }
    }
}

impl Default for SpectralSubtractor {
    fn default() -> Self {
        Self::new(DEFAULT_STRENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_subtracts_scaled_noise() {
        let mut subtractor = SpectralSubtractor::new(0.5);
        let mut spectrum = vec![Complex32::new(3.0, 4.0), Complex32::new(0.0, 1.0)];
        subtractor.apply(&mut spectrum, &[2.0, 4.0]);

        // |3+4i| = 5, minus 0.5·2 = 4
        assert!((spectrum[0].norm() - 4.0).abs() < EPSILON);
        // 1 - 0.5·4 < 0 is floored
        assert_eq!(spectrum[1], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_aggressive_removes_more() {
        let noise = [1.0; 4];
        let mut standard = vec![Complex32::new(3.0, 0.0); 4];
        let mut aggressive = standard.clone();

        SpectralSubtractor::new(DEFAULT_STRENGTH).apply(&mut standard, &noise);
        SpectralSubtractor::new(AGGRESSIVE_STRENGTH).apply(&mut aggressive, &noise);

        assert!(aggressive[0].norm() < standard[0].norm());
        assert!((aggressive[0].norm() - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_only_touches_profiled_bins() {
        let mut subtractor = SpectralSubtractor::new(1.0);
        let mut spectrum = vec![Complex32::new(1.0, 0.0); 4];
        subtractor.apply(&mut spectrum, &[1.0, 1.0]);
        assert_eq!(spectrum[2], Complex32::new(1.0, 0.0));
        assert!((subtractor.last_mean_gain() - 0.0).abs() < EPSILON);
    }

    #[test]
    fn test_strength_clamped() {
        let mut subtractor = SpectralSubtractor::new(-1.0);
        assert_eq!(subtractor.strength(), 0.0);
        subtractor.set_strength(100.0);
        assert_eq!(subtractor.strength(), MAX_STRENGTH);
    }

    proptest! {
        #[test]
        fn prop_magnitude_never_negative_phase_kept(
            re in -10.0f32..10.0,
            im in -10.0f32..10.0,
            noise in 0.0f32..20.0,
            strength in 0.0f32..MAX_STRENGTH,
        ) {
            let input = Complex32::new(re, im);
            let mut spectrum = [input];
            SpectralSubtractor::new(strength).apply(&mut spectrum, &[noise]);

            let out = spectrum[0];
            prop_assert!(out.norm() >= 0.0);
            prop_assert!(out.norm() <= input.norm() + EPSILON);

            if out.norm() > 1e-3 {
                let phase_error = (out.arg() - input.arg()).abs();
                prop_assert!(phase_error < 1e-3, "phase moved by {}", phase_error);
            }
        }
    }
}
