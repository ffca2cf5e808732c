//! Per-bin noise profile estimation for spectral subtraction
//!
//! The estimate follows the quietest magnitude seen in each bin and drifts
//! back up slowly when the noise rises:
//!
//! ```text
//! profile = min(profile, magnitude)
//! profile = α · profile + (1 - α) · magnitude      (α = 0.95)
//! ```
//!
//! The first frame after construction or [`NoiseProfileEstimator::reset`]
//! seeds the profile directly.
//!
//! # Thread Safety
//! The structures in this module are not thread-safe. They are owned by the
//! spectral chain of a single pipeline.

use thiserror::Error;

use crate::utils::linear_to_db;

// ============================================================================
// Constants
// ============================================================================

/// Default smoothing factor α for the upward exponential filter
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.95;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NoiseProfileError {
    #[error("spectrum size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

// ============================================================================
// Noise Profile
// ============================================================================

/// Running noise-floor magnitude per frequency bin
#[derive(Debug, Clone)]
pub struct NoiseProfileEstimator {
    spectrum: Vec<f32>,
    smoothing_factor: f32,
    frame_count: u64,
}

impl NoiseProfileEstimator {
    pub fn new(num_bins: usize) -> Self {
        Self::with_smoothing(num_bins, DEFAULT_SMOOTHING_FACTOR)
    }

    /// Smoothing factor is clamped to `[0, 1)`
    pub fn with_smoothing(num_bins: usize, smoothing_factor: f32) -> Self {
        Self {
            spectrum: vec![0.0; num_bins],
            smoothing_factor: smoothing_factor.clamp(0.0, 0.999),
            frame_count: 0,
        }
    }

    /// Current noise magnitude per bin
    #[inline]
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.spectrum.len()
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Fold one magnitude frame into the profile
    ///
    /// Non-finite magnitudes leave their bin untouched.
    pub fn update(&mut self, magnitudes: &[f32]) -> Result<(), NoiseProfileError> {
        if magnitudes.len() != self.spectrum.len() {
            return Err(NoiseProfileError::BufferSizeMismatch {
                expected: self.spectrum.len(),
                actual: magnitudes.len(),
            });
        }

        if self.frame_count == 0 {
            for (noise, &mag) in self.spectrum.iter_mut().zip(magnitudes) {
                *noise = if mag.is_finite() { mag.max(0.0) } else { 0.0 };
            }
        } else {
            let alpha = self.smoothing_factor;
            let one_minus_alpha = 1.0 - alpha;

            for (noise, &mag) in self.spectrum.iter_mut().zip(magnitudes) {
                if mag.is_finite() {
                    let floor = noise.min(mag);
                    *noise = alpha * floor + one_minus_alpha * mag;
                }
            }
        }

        self.frame_count += 1;
        Ok(())
    }

    /// Mean profile level in dB, for diagnostics
    pub fn mean_db(&self) -> f32 {
        if self.spectrum.is_empty() {
            return f32::NEG_INFINITY;
        }
        let mean = self.spectrum.iter().sum::<f32>() / self.spectrum.len() as f32;
        linear_to_db(mean)
    }

    pub fn reset(&mut self) {
        self.spectrum.fill(0.0);
        self.frame_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_first_frame_seeds_profile() {
        let mut profile = NoiseProfileEstimator::new(4);
        profile.update(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(profile.spectrum(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(profile.frame_count(), 1);
    }

    #[test]
    fn test_drops_immediately_rises_slowly() {
        let mut profile = NoiseProfileEstimator::new(1);
        profile.update(&[1.0]).unwrap();

        // Quieter frame: min pulls the floor down, the blend lands on it
        profile.update(&[0.2]).unwrap();
        assert!((profile.spectrum()[0] - 0.2).abs() < EPSILON);

        // Louder frame: only (1 - α) of the step is taken
        profile.update(&[1.2]).unwrap();
        let expected = 0.95 * 0.2 + 0.05 * 1.2;
        assert!((profile.spectrum()[0] - expected).abs() < EPSILON);
    }

    #[test]
    fn test_converges_to_stationary_level() {
        let mut profile = NoiseProfileEstimator::new(2);
        for _ in 0..500 {
            profile.update(&[0.5, 0.01]).unwrap();
        }
        assert!((profile.spectrum()[0] - 0.5).abs() < 1e-4);
        assert!((profile.spectrum()[1] - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut profile = NoiseProfileEstimator::new(2);
        profile.update(&[0.5, 0.5]).unwrap();
        profile.update(&[f32::NAN, f32::INFINITY]).unwrap();
        assert_eq!(profile.spectrum(), &[0.5, 0.5]);
    }

    #[test]
    fn test_size_mismatch_and_reset() {
        let mut profile = NoiseProfileEstimator::new(3);
        assert_eq!(
            profile.update(&[0.0; 2]).unwrap_err(),
            NoiseProfileError::BufferSizeMismatch { expected: 3, actual: 2 }
        );

        profile.update(&[1.0; 3]).unwrap();
        assert!((profile.mean_db() - 0.0).abs() < EPSILON);
        profile.reset();
        assert_eq!(profile.frame_count(), 0);
        assert_eq!(profile.spectrum(), &[0.0; 3]);
    }
}
