//! Frequency-domain feedback loop detection
//!
//! A more selective companion to [`crate::loop_detector::LoopDetector`].
//! Input and output are cut into non-overlapping frames of
//! `2 · fft_size` samples; each frame is Hann-windowed and reduced to its
//! magnitude spectrum, and the last five of each are kept.
//!
//! Every input frame is compared with every output frame that ended no
//! later than it started (Pearson correlation of the voice-band
//! magnitudes, 300 to 3400 Hz). A peak above the adaptive threshold only
//! counts as a loop when at least two of eight coarse bands agree. A run
//! of peaks just under the threshold counts as well.
//!
//! The threshold drifts toward 0.25 while recent peaks stay low and
//! toward 0.4 while they stay high.

use num_complex::Complex32;
use tracing::debug;

use crate::error::ConfigError;
use crate::fft_processor::{magnitudes_into, SpectralTransform, TransformError};
use crate::ring_buffer::{FrameHistory, RingHistory};
use crate::utils::{correlation_attenuation, frequency_to_bin, hann_window};

// ============================================================================
// Constants
// ============================================================================

/// Frames kept per direction
pub const FRAME_HISTORY: usize = 5;

/// Peak correlations kept for threshold adaptation
pub const CORRELATION_HISTORY: usize = 10;

pub const VOICE_BAND_HZ: (f32, f32) = (300.0, 3400.0);

/// Edges of the validation bands
pub const VALIDATION_BAND_EDGES_HZ: [f32; 9] = [
    0.0, 250.0, 500.0, 1000.0, 2000.0, 3000.0, 4000.0, 6000.0, 8000.0,
];

/// Per-band correlation a validation band must exceed
pub const BAND_CORRELATION_THRESHOLD: f32 = 0.4;

/// Agreeing bands needed to confirm a loop
pub const MIN_AGREEING_BANDS: usize = 2;

/// Bands narrower than this are skipped
const MIN_BAND_BINS: usize = 4;

pub const INITIAL_THRESHOLD: f32 = 0.3;
const SENSITIVE_THRESHOLD: f32 = 0.25;
const CONSERVATIVE_THRESHOLD: f32 = 0.4;
const ADAPTATION_RATE: f32 = 0.05;

/// Recent peaks checked for sustained correlation, and how many must pass
const SUSTAINED_WINDOW: usize = 5;
const SUSTAINED_COUNT: usize = 3;
const SUSTAINED_FRACTION: f32 = 0.8;

// ============================================================================
// Detection Result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralLoopDetection {
    pub detected: bool,
    /// Best voice-band correlation over all frame pairs
    pub peak: f32,
    pub threshold: f32,
    /// Validation bands above the band threshold for the best pair
    pub agreeing_bands: usize,
    /// Detection came from the sustained-correlation check
    pub sustained: bool,
    /// Gain to apply to the current output block
    pub gain: f32,
}

impl Default for SpectralLoopDetection {
    fn default() -> Self {
        Self {
            detected: false,
            peak: 0.0,
            threshold: INITIAL_THRESHOLD,
            agreeing_bands: 0,
            sustained: false,
            gain: 1.0,
        }
    }
}

/// Pearson correlation of two equal-length slices, zero when either is flat
fn pearson(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f32>() / n as f32;
    let mean_b = b.iter().sum::<f32>() / n as f32;

    let mut cross = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cross += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > f32::EPSILON && denom.is_finite() {
        cross / denom
    } else {
        0.0
    }
}

// ============================================================================
// Detector
// ============================================================================

pub struct SpectralLoopDetector {
    frame_len: usize,
    strength: f32,

    input: RingHistory,
    output: RingHistory,
    pending: usize,

    window: Vec<f32>,
    transform: SpectralTransform,
    frame: Vec<f32>,
    spectrum: Vec<Complex32>,
    magnitudes: Vec<f32>,

    input_frames: FrameHistory,
    output_frames: FrameHistory,

    /// Inclusive voice band bin range
    voice_band: (usize, usize),
    /// Half-open validation band bin ranges with enough bins
    bands: Vec<(usize, usize)>,

    correlations: RingHistory,
    threshold: f32,
    last: SpectralLoopDetection,
    detections: u64,
}

impl std::fmt::Debug for SpectralLoopDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralLoopDetector")
            .field("frame_len", &self.frame_len)
            .field("threshold", &self.threshold)
            .field("bands", &self.bands.len())
            .finish()
    }
}

impl SpectralLoopDetector {
    pub fn new(fft_size: usize, strength: f32, sample_rate: f32) -> Result<Self, ConfigError> {
        let frame_len = 2 * fft_size;
        let num_bins = frame_len / 2 + 1;

        let voice_band = (
            frequency_to_bin(VOICE_BAND_HZ.0, frame_len, sample_rate),
            frequency_to_bin(VOICE_BAND_HZ.1, frame_len, sample_rate),
        );
        let bands: Vec<(usize, usize)> = VALIDATION_BAND_EDGES_HZ
            .windows(2)
            .map(|edges| {
                (
                    frequency_to_bin(edges[0], frame_len, sample_rate),
                    frequency_to_bin(edges[1], frame_len, sample_rate),
                )
            })
            .filter(|(start, end)| end.saturating_sub(*start) >= MIN_BAND_BINS)
            .collect();

        debug!(
            "Creating SpectralLoopDetector: frame_len={}, voice_band={:?}, bands={}",
            frame_len,
            voice_band,
            bands.len()
        );

        Ok(Self {
            frame_len,
            strength: strength.clamp(0.0, 1.0),
            input: RingHistory::new(frame_len)?,
            output: RingHistory::new(frame_len)?,
            pending: 0,
            window: hann_window(frame_len),
            transform: SpectralTransform::new(frame_len)?,
            frame: vec![0.0; frame_len],
            spectrum: vec![Complex32::new(0.0, 0.0); frame_len],
            magnitudes: vec![0.0; num_bins],
            input_frames: FrameHistory::new(FRAME_HISTORY, num_bins)?,
            output_frames: FrameHistory::new(FRAME_HISTORY, num_bins)?,
            voice_band,
            bands,
            correlations: RingHistory::new(CORRELATION_HISTORY)?,
            threshold: INITIAL_THRESHOLD,
            last: SpectralLoopDetection::default(),
            detections: 0,
        })
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.strength = strength.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Number of validation bands in use at this sample rate
    #[inline]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Append one block of mono input and output
    ///
    /// A new analysis runs each time a full frame has accumulated; in
    /// between, the last decision and its gain are returned again.
    pub fn process(
        &mut self,
        input: &[f32],
        output: &[f32],
    ) -> Result<SpectralLoopDetection, TransformError> {
        self.input.extend_from_slice(input);
        self.output.extend_from_slice(output);
        self.pending += input.len();

        if self.pending < self.frame_len || !self.input.is_full() {
            return Ok(self.last);
        }
        self.pending %= self.frame_len;

        self.analyze_latest(true)?;
        self.analyze_latest(false)?;
        self.last = self.evaluate();
        Ok(self.last)
    }

    /// Window and transform the newest frame of one direction into its history
    fn analyze_latest(&mut self, input: bool) -> Result<(), TransformError> {
        let source = if input { &self.input } else { &self.output };
        source.copy_latest(&mut self.frame);
        for (sample, &w) in self.frame.iter_mut().zip(&self.window) {
            *sample *= w;
        }

        self.transform.forward_real(&self.frame, &mut self.spectrum)?;
        magnitudes_into(&self.spectrum, &mut self.magnitudes);

        if input {
            self.input_frames.push(&self.magnitudes);
        } else {
            self.output_frames.push(&self.magnitudes);
        }
        Ok(())
    }

    fn evaluate(&mut self) -> SpectralLoopDetection {
        let (low, high) = self.voice_band;

        // Causal pairs: the output frame is strictly older than the input frame
        let mut peak = 0.0_f32;
        let mut best = None;
        for i in 0..self.input_frames.len() {
            for j in 0..i.min(self.output_frames.len()) {
                let (Some(input), Some(output)) = (self.input_frames.get(i), self.output_frames.get(j))
                else {
                    continue;
                };
                let correlation = pearson(&input[low..=high], &output[low..=high]);
                if best.is_none() || correlation > peak {
                    peak = correlation;
                    best = Some((i, j));
                }
            }
        }

        self.correlations.push(peak);
        self.adapt_threshold();

        let mut agreeing_bands = 0;
        let mut detected = false;
        if let Some((i, j)) = best {
            if peak > self.threshold {
                agreeing_bands = self.agreeing_bands(i, j);
                detected = agreeing_bands >= MIN_AGREEING_BANDS;
            }
        }

        let sustained = !detected && self.sustained();
        let detected = detected || sustained;

        if detected && !self.last.detected {
            debug!(
                "Spectral feedback loop detected: peak={:.3}, threshold={:.3}, bands={}, sustained={}",
                peak, self.threshold, agreeing_bands, sustained
            );
        }
        if detected {
            self.detections += 1;
        }

        SpectralLoopDetection {
            detected,
            peak,
            threshold: self.threshold,
            agreeing_bands,
            sustained,
            gain: if detected {
                correlation_attenuation(self.strength, peak)
            } else {
                1.0
            },
        }
    }

    fn adapt_threshold(&mut self) {
        let count = self.correlations.len();
        if count == 0 {
            return;
        }
        let mean = self.correlations.iter().sum::<f32>() / count as f32;

        if mean < 0.5 * self.threshold {
            self.threshold += ADAPTATION_RATE * (SENSITIVE_THRESHOLD - self.threshold);
        } else if mean > self.threshold {
            self.threshold += ADAPTATION_RATE * (CONSERVATIVE_THRESHOLD - self.threshold);
        }
    }

    fn agreeing_bands(&self, i: usize, j: usize) -> usize {
        let (Some(input), Some(output)) = (self.input_frames.get(i), self.output_frames.get(j)) else {
            return 0;
        };
        self.bands
            .iter()
            .filter(|&&(start, end)| {
                pearson(&input[start..end], &output[start..end]) > BAND_CORRELATION_THRESHOLD
            })
            .count()
    }

    /// At least three of the last five peaks above 80% of the threshold
    fn sustained(&self) -> bool {
        let count = self.correlations.len();
        let floor = SUSTAINED_FRACTION * self.threshold;
        self.correlations
            .iter()
            .skip(count.saturating_sub(SUSTAINED_WINDOW))
            .filter(|&c| c > floor)
            .count()
            >= SUSTAINED_COUNT
    }

    #[inline]
    pub fn last_detection(&self) -> SpectralLoopDetection {
        self.last
    }

    /// Analyses in which a loop was detected
    #[inline]
    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.pending = 0;
        self.input_frames.clear();
        self.output_frames.clear();
        self.correlations.clear();
        self.threshold = INITIAL_THRESHOLD;
        self.last = SpectralLoopDetection::default();
        self.detections = 0;
    }
}
