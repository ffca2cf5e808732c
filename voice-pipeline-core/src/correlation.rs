//! FFT-based linear cross-correlation
//!
//! Computes `r[lag] = Σ reference[n] · signal[n + lag]` for every
//! non-negative lag in `O(N log N)` by zero-padding both inputs to at least
//! twice their length, so the circular correlation of the FFT never wraps.
//! Two normalizations are offered: by the full-signal norms (frame
//! similarity) and by the norms of the overlapping region at each lag
//! (delay search over a history window).

use num_complex::Complex32;
use std::ops::RangeInclusive;

use crate::fft_processor::{SpectralTransform, TransformError};

/// Energies below this are treated as silence
const MIN_ENERGY: f64 = 1e-12;

/// Share of each signal's energy an overlap must hold to be scored
const MIN_OVERLAP_FRACTION: f64 = 0.25;

/// Best lag found by a correlation search
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CorrelationPeak {
    pub lag: usize,
    pub correlation: f32,
}

/// Reusable cross-correlation workspace for inputs up to `max_len` samples
pub struct CrossCorrelator {
    max_len: usize,
    transform: SpectralTransform,
    reference_spectrum: Vec<Complex32>,
    signal_spectrum: Vec<Complex32>,
    raw: Vec<f32>,
    reference_energy: Vec<f64>,
    signal_energy: Vec<f64>,
}

impl std::fmt::Debug for CrossCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossCorrelator")
            .field("max_len", &self.max_len)
            .field("fft_size", &self.transform.fft_size())
            .finish()
    }
}

impl CrossCorrelator {
    pub fn new(max_len: usize) -> Result<Self, TransformError> {
        let fft_size = (2 * max_len.max(1)).next_power_of_two();
        let transform = SpectralTransform::new(fft_size)?;

        Ok(Self {
            max_len,
            transform,
            reference_spectrum: vec![Complex32::new(0.0, 0.0); fft_size],
            signal_spectrum: vec![Complex32::new(0.0, 0.0); fft_size],
            raw: vec![0.0; max_len],
            reference_energy: vec![0.0; max_len + 1],
            signal_energy: vec![0.0; max_len + 1],
        })
    }

    #[inline]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Unnormalized correlation for lags `0..len`
    pub fn correlate(
        &mut self,
        reference: &[f32],
        signal: &[f32],
    ) -> Result<&[f32], TransformError> {
        let len = self.check_inputs(reference, signal)?;

        self.transform.forward_real(reference, &mut self.reference_spectrum)?;
        self.transform.forward_real(signal, &mut self.signal_spectrum)?;

        for (s, r) in self.signal_spectrum.iter_mut().zip(&self.reference_spectrum) {
            *s *= r.conj();
        }
        self.transform.inverse(&mut self.signal_spectrum)?;

        for (out, value) in self.raw[..len].iter_mut().zip(&self.signal_spectrum) {
            *out = value.re;
        }
        Ok(&self.raw[..len])
    }

    /// Peak of the correlation normalized by both signals' total norms
    ///
    /// Returns a zero peak when either input is silent.
    pub fn peak_normalized(
        &mut self,
        reference: &[f32],
        signal: &[f32],
    ) -> Result<CorrelationPeak, TransformError> {
        let reference_energy: f64 = reference.iter().map(|&x| (x as f64) * (x as f64)).sum();
        let signal_energy: f64 = signal.iter().map(|&x| (x as f64) * (x as f64)).sum();
        let len = self.check_inputs(reference, signal)?;

        if reference_energy < MIN_ENERGY || signal_energy < MIN_ENERGY {
            return Ok(CorrelationPeak::default());
        }

        let norm = (reference_energy * signal_energy).sqrt() as f32;
        let raw = self.correlate(reference, signal)?;

        Ok(best_lag(0..=len.saturating_sub(1), |lag| raw[lag] / norm))
    }

    /// Peak of the correlation normalized over the overlapping region
    ///
    /// At lag `l` the overlap is `reference[..len - l]` against
    /// `signal[l..]`. Lags whose overlap is silent, or holds less than a
    /// quarter of either input's energy, score zero.
    pub fn peak_overlap_normalized(
        &mut self,
        reference: &[f32],
        signal: &[f32],
        lags: RangeInclusive<usize>,
    ) -> Result<CorrelationPeak, TransformError> {
        let len = self.check_inputs(reference, signal)?;
        if len == 0 {
            return Ok(CorrelationPeak::default());
        }
        let lags = *lags.start()..=(*lags.end()).min(len - 1);

        prefix_energy(reference, &mut self.reference_energy[..=len]);
        prefix_energy(signal, &mut self.signal_energy[..=len]);

        self.correlate(reference, signal)?;

        let raw = &self.raw;
        let reference_energy = &self.reference_energy;
        let signal_energy = &self.signal_energy;
        let min_ref = (reference_energy[len] * MIN_OVERLAP_FRACTION).max(MIN_ENERGY);
        let min_sig = (signal_energy[len] * MIN_OVERLAP_FRACTION).max(MIN_ENERGY);
        Ok(best_lag(lags, |lag| {
            let e_ref = reference_energy[len - lag];
            let e_sig = signal_energy[len] - signal_energy[lag];
            if e_ref < min_ref || e_sig < min_sig {
                0.0
            } else {
                raw[lag] / (e_ref * e_sig).sqrt() as f32
            }
        }))
    }

    fn check_inputs(&self, reference: &[f32], signal: &[f32]) -> Result<usize, TransformError> {
        if reference.len() != signal.len() {
            return Err(TransformError::BufferSizeMismatch {
                expected: reference.len(),
                got: signal.len(),
            });
        }
        if reference.len() > self.max_len {
            return Err(TransformError::BufferSizeMismatch {
                expected: self.max_len,
                got: reference.len(),
            });
        }
        Ok(reference.len())
    }
}

/// `energy[i] = Σ_{n < i} x[n]²`
fn prefix_energy(samples: &[f32], energy: &mut [f64]) {
    let mut acc = 0.0_f64;
    energy[0] = 0.0;
    for (slot, &x) in energy[1..].iter_mut().zip(samples) {
        acc += (x as f64) * (x as f64);
        *slot = acc;
    }
}

fn best_lag(lags: RangeInclusive<usize>, score: impl Fn(usize) -> f32) -> CorrelationPeak {
    let mut peak = CorrelationPeak::default();
    let mut first = true;
    for lag in lags {
        let correlation = score(lag);
        if first || correlation > peak.correlation {
            peak = CorrelationPeak { lag, correlation };
            first = false;
        }
    }
    peak
}
