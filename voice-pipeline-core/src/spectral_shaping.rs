//! Adaptive equalization and spatial phase shaping
//!
//! [`AdaptiveEq`] flattens spectral tilt over nine octave-ish bands: quiet
//! bands are lifted and loud bands pulled down, each by the inverse of the
//! band's mean amplitude within fixed limits.
//!
//! [`SpatialEnhancer`] produces a phase-shifted copy of a spectrum for the
//! secondary channels, giving a small frequency-dependent inter-aural phase
//! difference without changing any magnitude.

use num_complex::Complex32;

use crate::utils::{bin_frequency, frequency_to_bin};

// ============================================================================
// Adaptive EQ
// ============================================================================

/// Lower band edges in Hz; the last band runs to Nyquist
pub const EQ_BAND_EDGES_HZ: [f32; 9] = [
    60.0, 120.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

pub const EQ_MIN_GAIN: f32 = 0.5;
pub const EQ_MAX_GAIN: f32 = 2.0;

/// Added to the band mean before inversion
const EQ_REGULARIZATION: f32 = 0.001;

#[derive(Debug, Clone)]
pub struct AdaptiveEq {
    /// Half-open bin range per band, empty when above Nyquist
    bands: [(usize, usize); 9],
    gains: [f32; 9],
}

impl AdaptiveEq {
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        let nyquist_bin = fft_size / 2;
        let mut bands = [(0, 0); 9];

        for (i, band) in bands.iter_mut().enumerate() {
            let start = frequency_to_bin(EQ_BAND_EDGES_HZ[i], fft_size, sample_rate);
            let end = match EQ_BAND_EDGES_HZ.get(i + 1) {
                Some(&edge) => frequency_to_bin(edge, fft_size, sample_rate),
                None => nyquist_bin + 1,
            };
            // Edges past Nyquist all clamp to the Nyquist bin, leaving empty bands
            *band = if EQ_BAND_EDGES_HZ[i] * 2.0 >= sample_rate {
                (0, 0)
            } else {
                (start, end.max(start))
            };
        }

        Self { bands, gains: [1.0; 9] }
    }

    /// Gain for a band's mean amplitude
    #[inline]
    pub fn band_gain(mean_amplitude: f32) -> f32 {
        (1.0 / (mean_amplitude + EQ_REGULARIZATION)).clamp(EQ_MIN_GAIN, EQ_MAX_GAIN)
    }

    /// Equalize bins `0..=N/2` in place
    ///
    /// `amplitude_scale` converts FFT magnitudes to sine amplitude.
    pub fn process(&mut self, spectrum: &mut [Complex32], amplitude_scale: f32) {
        for (band, gain) in self.bands.iter().zip(self.gains.iter_mut()) {
            let (start, end) = *band;
            let end = end.min(spectrum.len() / 2 + 1);
            if start >= end {
                *gain = 1.0;
                continue;
            }

            let bins = &mut spectrum[start..end];
            let mean = bins.iter().map(|b| b.norm()).sum::<f32>() * amplitude_scale
                / bins.len() as f32;
            *gain = Self::band_gain(mean);

            for bin in bins.iter_mut() {
                *bin *= *gain;
            }
        }
    }

    /// Gains applied to the last frame, one per band
    #[inline]
    pub fn gains(&self) -> &[f32; 9] {
        &self.gains
    }

    pub fn reset(&mut self) {
        self.gains = [1.0; 9];
    }
}

// ============================================================================
// Spatial Enhancement
// ============================================================================

/// Phase slope of the spatial offset, radians per Hz
pub const SPATIAL_PHASE_RATE: f32 = 0.01;

/// Peak phase offset in radians
pub const SPATIAL_PHASE_DEPTH: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct SpatialEnhancer {
    /// Unit rotation per bin `0..=N/2`
    rotations: Vec<Complex32>,
}

impl SpatialEnhancer {
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        let rotations = (0..=fft_size / 2)
            .map(|k| {
                let freq = bin_frequency(k, fft_size, sample_rate);
                let phase = (freq * SPATIAL_PHASE_RATE).sin() * SPATIAL_PHASE_DEPTH;
                Complex32::from_polar(1.0, phase)
            })
            .collect();
        Self { rotations }
    }

    /// Write the phase-offset copy of `source` bins `0..=N/2` into `dest`
    pub fn apply(&self, source: &[Complex32], dest: &mut [Complex32]) {
        for ((out, &bin), rotation) in dest.iter_mut().zip(source).zip(&self.rotations) {
            *out = bin * rotation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFT_SIZE: usize = 2048;
    const SAMPLE_RATE: f32 = 48000.0;

    #[test]
    fn test_band_gain_limits() {
        assert_eq!(AdaptiveEq::band_gain(0.0), EQ_MAX_GAIN);
        assert_eq!(AdaptiveEq::band_gain(10.0), EQ_MIN_GAIN);
        assert!((AdaptiveEq::band_gain(0.999) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut eq = AdaptiveEq::new(FFT_SIZE, SAMPLE_RATE);
        let mut spectrum = vec![Complex32::new(0.0, 0.0); FFT_SIZE];
        eq.process(&mut spectrum, 1.0);
        assert!(spectrum.iter().all(|b| b.norm() == 0.0));
        assert!(eq.gains().iter().all(|&g| g == EQ_MAX_GAIN));
    }

    #[test]
    fn test_loud_band_cut_quiet_band_lifted() {
        let mut eq = AdaptiveEq::new(FFT_SIZE, SAMPLE_RATE);
        let mut spectrum = vec![Complex32::new(0.01, 0.0); FFT_SIZE];
        let loud = frequency_to_bin(1500.0, FFT_SIZE, SAMPLE_RATE);
        let quiet = frequency_to_bin(6000.0, FFT_SIZE, SAMPLE_RATE);
        let below = frequency_to_bin(30.0, FFT_SIZE, SAMPLE_RATE);
        for bin in &mut spectrum[frequency_to_bin(1000.0, FFT_SIZE, SAMPLE_RATE)..frequency_to_bin(2000.0, FFT_SIZE, SAMPLE_RATE)] {
            *bin = Complex32::new(4.0, 0.0);
        }

        eq.process(&mut spectrum, 1.0);
        assert!((spectrum[loud].re - 4.0 * EQ_MIN_GAIN).abs() < 1e-5);
        assert!(spectrum[quiet].re > 0.01);
        // Below the first band edge nothing changes
        assert_eq!(spectrum[below].re, 0.01);
        assert_eq!(eq.gains()[4], EQ_MIN_GAIN);
    }

    #[test]
    fn test_low_sample_rate_skips_upper_band() {
        let mut eq = AdaptiveEq::new(512, 16000.0);
        let mut spectrum = vec![Complex32::new(0.01, 0.0); 512];
        eq.process(&mut spectrum, 1.0);
        assert_eq!(eq.gains()[8], 1.0);
        assert_eq!(eq.gains()[7], 1.0);
    }

    #[test]
    fn test_spatial_keeps_magnitude() {
        let spatial = SpatialEnhancer::new(FFT_SIZE, SAMPLE_RATE);
        let source: Vec<Complex32> = (0..FFT_SIZE)
            .map(|k| Complex32::new(1.0 + k as f32 * 0.001, 0.5))
            .collect();
        let mut dest = vec![Complex32::new(0.0, 0.0); FFT_SIZE];
        spatial.apply(&source, &mut dest);

        for k in 0..=FFT_SIZE / 2 {
            assert!((dest[k].norm() - source[k].norm()).abs() < 1e-4);
            let freq = k as f32 * SAMPLE_RATE / FFT_SIZE as f32;
            let expected = (freq * SPATIAL_PHASE_RATE).sin() * SPATIAL_PHASE_DEPTH;
            let mut shift = dest[k].arg() - source[k].arg();
            if shift > std::f32::consts::PI {
                shift -= 2.0 * std::f32::consts::PI;
            }
            assert!((shift - expected).abs() < 1e-3, "bin {}", k);
        }
        assert_eq!(dest[0], source[0]);
    }
}
