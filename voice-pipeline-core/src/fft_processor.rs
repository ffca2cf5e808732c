//! Forward/inverse FFT over complex buffers for real-time spectral processing
//!
//! [`SpectralTransform`] plans both directions once with `rustfft` and runs
//! them in place with a pre-allocated scratch buffer, so calling it from the
//! audio thread never allocates. The inverse is normalized by `1/N`, making
//! `inverse(forward(x)) == x` up to rounding.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Smallest transform length accepted
pub const MIN_TRANSFORM_SIZE: usize = 2;

/// Largest transform length accepted (correlation over a one second window
/// at 96 kHz needs 2^18)
pub const MAX_TRANSFORM_SIZE: usize = 1 << 20;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("invalid FFT size {size}: must be a power of two between {} and {}", MIN_TRANSFORM_SIZE, MAX_TRANSFORM_SIZE)]
    InvalidSize { size: usize },

    #[error("buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },
}

// ============================================================================
// Spectral Transform
// ============================================================================

/// Planned power-of-two FFT pair with its own scratch space
pub struct SpectralTransform {
    fft_size: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("fft_size", &self.fft_size)
            .finish()
    }
}

impl SpectralTransform {
    pub fn new(fft_size: usize) -> Result<Self, TransformError> {
        if !(MIN_TRANSFORM_SIZE..=MAX_TRANSFORM_SIZE).contains(&fft_size)
            || !fft_size.is_power_of_two()
        {
            return Err(TransformError::InvalidSize { size: fft_size });
        }

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Ok(Self {
            fft_size,
            fft_forward,
            fft_inverse,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        })
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of non-redundant bins of a real signal's spectrum (`N/2 + 1`)
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Unnormalized forward transform in place
    pub fn forward(&mut self, buffer: &mut [Complex32]) -> Result<(), TransformError> {
        self.check_len(buffer.len())?;
        self.fft_forward.process_with_scratch(buffer, &mut self.scratch);
        Ok(())
    }

    /// Inverse transform in place, scaled by `1/N`
    pub fn inverse(&mut self, buffer: &mut [Complex32]) -> Result<(), TransformError> {
        self.check_len(buffer.len())?;
        self.fft_inverse.process_with_scratch(buffer, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
        Ok(())
    }

    /// Load a real signal into `buffer` (zero-padded) and transform it
    pub fn forward_real(
        &mut self,
        input: &[f32],
        buffer: &mut [Complex32],
    ) -> Result<(), TransformError> {
        self.check_len(buffer.len())?;
        if input.len() > self.fft_size {
            return Err(TransformError::BufferSizeMismatch {
                expected: self.fft_size,
                got: input.len(),
            });
        }

        for (slot, &sample) in buffer.iter_mut().zip(input) {
            *slot = Complex32::new(sample, 0.0);
        }
        buffer[input.len()..].fill(Complex32::new(0.0, 0.0));

        self.forward(buffer)
    }

    #[inline]
    fn check_len(&self, len: usize) -> Result<(), TransformError> {
        if len == self.fft_size {
            Ok(())
        } else {
            Err(TransformError::BufferSizeMismatch {
                expected: self.fft_size,
                got: len,
            })
        }
    }
}

// ============================================================================
// Spectrum Helpers
// ============================================================================

/// Rebuild bins `N/2+1..N` as conjugates of `1..N/2` so the inverse is real
///
/// DC and Nyquist are forced real.
pub fn restore_conjugate_symmetry(spectrum: &mut [Complex32]) {
    let n = spectrum.len();
    if n < 2 {
        return;
    }

    spectrum[0].im = 0.0;
    spectrum[n / 2].im = 0.0;
    for k in 1..n / 2 {
        spectrum[n - k] = spectrum[k].conj();
    }
}

/// Write `|X[k]|` for the first `magnitudes.len()` bins
#[inline]
pub fn magnitudes_into(spectrum: &[Complex32], magnitudes: &mut [f32]) {
    for (mag, bin) in magnitudes.iter_mut().zip(spectrum) {
        *mag = bin.norm();
    }
}
