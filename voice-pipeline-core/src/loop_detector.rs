//! Time-domain feedback loop detection
//!
//! Keeps the last `window` samples of captured input and of processed
//! output. After every block the two histories are cross-correlated over
//! lags `min_lag..=window/2` in both directions:
//!
//! ```text
//! r_in[lag]  = Σ input[n + lag] · output[n] / sqrt(E_in(lag) · E_out(lag))
//! r_out[lag] = Σ output[n + lag] · input[n] / sqrt(E_out(lag) · E_in(lag))
//! ```
//!
//! where the energies cover only the overlapping region. `r_in` peaks when
//! played audio is recaptured after `lag` samples; `r_out` peaks when the
//! output repeats the input. The larger peak wins, and above the threshold
//! the current output block is attenuated by `1 - strength · r`.

use tracing::debug;

use crate::config::LoopMode;
use crate::correlation::CrossCorrelator;
use crate::error::ConfigError;
use crate::fft_processor::TransformError;
use crate::ring_buffer::RingHistory;
use crate::utils::correlation_attenuation;

/// Result of one detection pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopDetection {
    pub detected: bool,
    /// Delay of the best match in samples
    pub lag: usize,
    /// The output repeats the input rather than the input repeating the output
    pub output_delayed: bool,
    pub correlation: f32,
    /// Gain to apply to the current output block
    pub gain: f32,
}

impl Default for LoopDetection {
    fn default() -> Self {
        Self {
            detected: false,
            lag: 0,
            output_delayed: false,
            correlation: 0.0,
            gain: 1.0,
        }
    }
}

/// Convert milliseconds to a whole number of samples
#[inline]
pub(crate) fn ms_to_samples(ms: f32, sample_rate: f32) -> usize {
    (ms * 0.001 * sample_rate).round().max(0.0) as usize
}

#[derive(Debug)]
pub struct LoopDetector {
    mode: LoopMode,
    strength: f32,
    sample_rate: f32,
    window: usize,
    min_lag: usize,
    max_lag: usize,

    input: RingHistory,
    output: RingHistory,
    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
    correlator: CrossCorrelator,

    last: LoopDetection,
    detections: u64,
}

impl LoopDetector {
    pub fn new(
        window_ms: f32,
        min_lag_ms: f32,
        strength: f32,
        mode: LoopMode,
        sample_rate: f32,
    ) -> Result<Self, ConfigError> {
        let window = ms_to_samples(window_ms, sample_rate).max(2);
        let max_lag = window / 2;

        debug!(
            "Creating LoopDetector: window={} samples, max_lag={}, mode={:?}",
            window, max_lag, mode
        );

        Ok(Self {
            mode,
            strength: strength.clamp(0.0, 1.0),
            sample_rate,
            window,
            min_lag: ms_to_samples(min_lag_ms, sample_rate).min(max_lag),
            max_lag,
            input: RingHistory::new(window)?,
            output: RingHistory::new(window)?,
            input_scratch: vec![0.0; window],
            output_scratch: vec![0.0; window],
            correlator: CrossCorrelator::new(window)?,
            last: LoopDetection::default(),
            detections: 0,
        })
    }

    /// Change threshold mode, strength and minimum lag in place
    pub fn set_params(&mut self, min_lag_ms: f32, strength: f32, mode: LoopMode) {
        self.min_lag = ms_to_samples(min_lag_ms, self.sample_rate).min(self.max_lag);
        self.strength = strength.clamp(0.0, 1.0);
        self.mode = mode;
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn lag_range(&self) -> (usize, usize) {
        (self.min_lag, self.max_lag)
    }

    #[inline]
    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    /// Append one block of mono input and output, then search for a loop
    ///
    /// The caller applies the returned gain to the output block.
    pub fn process(&mut self, input: &[f32], output: &[f32]) -> Result<LoopDetection, TransformError> {
        self.input.extend_from_slice(input);
        self.output.extend_from_slice(output);

        if self.input.len() < self.max_lag || self.min_lag > self.max_lag {
            self.last = LoopDetection::default();
            return Ok(self.last);
        }

        self.input.copy_latest(&mut self.input_scratch);
        self.output.copy_latest(&mut self.output_scratch);

        let lags = self.min_lag..=self.max_lag;
        let input_trails = self.correlator.peak_overlap_normalized(
            &self.output_scratch,
            &self.input_scratch,
            lags.clone(),
        )?;
        let output_trails = self.correlator.peak_overlap_normalized(
            &self.input_scratch,
            &self.output_scratch,
            lags,
        )?;
        let output_delayed = output_trails.correlation > input_trails.correlation;
        let peak = if output_delayed { output_trails } else { input_trails };

        let detected = peak.correlation > self.mode.threshold();
        let gain = if detected {
            correlation_attenuation(self.strength, peak.correlation)
        } else {
            1.0
        };

        if detected && !self.last.detected {
            debug!(
                "Feedback loop detected: lag={} samples, output_delayed={}, correlation={:.3}",
                peak.lag, output_delayed, peak.correlation
            );
        }
        if detected {
            self.detections += 1;
        }

        self.last = LoopDetection {
            detected,
            lag: peak.lag,
            output_delayed,
            correlation: peak.correlation,
            gain,
        };
        Ok(self.last)
    }

    #[inline]
    pub fn last_detection(&self) -> LoopDetection {
        self.last
    }

    /// Blocks in which a loop was detected
    #[inline]
    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.last = LoopDetection::default();
        self.detections = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    const SAMPLE_RATE: f32 = 48000.0;
    const BLOCK: usize = 480;

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-0.5f32..0.5)).collect()
    }

    fn detector(mode: LoopMode) -> LoopDetector {
        LoopDetector::new(100.0, 5.0, 0.8, mode, SAMPLE_RATE).unwrap()
    }

    #[test]
    fn test_window_and_lags() {
        let det = detector(LoopMode::Aggressive);
        assert_eq!(det.window(), 4800);
        assert_eq!(det.lag_range(), (240, 2400));
    }

    #[test]
    fn test_delayed_copy_detected() {
        let delay = 1000;
        let played = noise(BLOCK * 40, 7);
        let captured: Vec<f32> = (0..played.len())
            .map(|n| if n >= delay { 0.9 * played[n - delay] } else { 0.0 })
            .collect();

        let mut det = detector(LoopMode::Standard { threshold: 0.5 });
        let mut result = LoopDetection::default();
        for (input, output) in captured.chunks(BLOCK).zip(played.chunks(BLOCK)) {
            result = det.process(input, output).unwrap();
        }

        assert!(result.detected);
        assert!(!result.output_delayed);
        assert!((result.lag as i64 - delay as i64).abs() <= 1, "lag {}", result.lag);
        assert!(result.correlation > 0.8, "correlation {}", result.correlation);
        assert!((result.gain - (1.0 - 0.8 * result.correlation)).abs() < 1e-5);
        assert!(det.detections() > 0);
    }

    #[test]
    fn test_output_delayed_copy_of_input_detected() {
        let delay = 1000;
        let captured = noise(BLOCK * 40, 11);
        let played: Vec<f32> = (0..captured.len())
            .map(|n| if n >= delay { 0.9 * captured[n - delay] } else { 0.0 })
            .collect();

        let mut det = detector(LoopMode::Standard { threshold: 0.5 });
        let mut result = LoopDetection::default();
        for (input, output) in captured.chunks(BLOCK).zip(played.chunks(BLOCK)) {
            result = det.process(input, output).unwrap();
        }

        assert!(result.detected);
        assert!(result.output_delayed);
        assert!((result.lag as i64 - delay as i64).abs() <= 1, "lag {}", result.lag);
        assert!(result.correlation > 0.8, "correlation {}", result.correlation);
    }

    #[test]
    fn test_uncorrelated_noise_not_detected() {
        let played = noise(BLOCK * 40, 1);
        let captured = noise(BLOCK * 40, 2);

        let mut det = detector(LoopMode::Aggressive);
        for (input, output) in captured.chunks(BLOCK).zip(played.chunks(BLOCK)) {
            let result = det.process(input, output).unwrap();
            assert!(!result.detected, "correlation {}", result.correlation);
            assert_eq!(result.gain, 1.0);
        }
    }

    #[test]
    fn test_needs_history_before_detecting() {
        let mut det = detector(LoopMode::Aggressive);
        let block = noise(BLOCK, 5);
        let result = det.process(&block, &block).unwrap();
        assert_eq!(result, LoopDetection::default());
    }

    #[test]
    fn test_silence() {
        let mut det = detector(LoopMode::Aggressive);
        let silence = vec![0.0; BLOCK];
        for _ in 0..20 {
            let result = det.process(&silence, &silence).unwrap();
            assert!(!result.detected);
        }
    }

    #[test]
    fn test_set_params() {
        let mut det = detector(LoopMode::Aggressive);
        det.set_params(10.0, 0.3, LoopMode::Standard { threshold: 0.6 });
        assert_eq!(det.lag_range(), (480, 2400));
        assert_eq!(det.mode().threshold(), 0.6);
    }
}
