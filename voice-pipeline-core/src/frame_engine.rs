//! Overlap-add frame scheduling over in-place audio blocks
//!
//! Each block is down-mixed to mono and cut into Hann-windowed frames at a
//! hop of `fft_size / 4`. The hop grid is anchored so one frame ends exactly
//! at the block end, and frames that start before the block read from a
//! history of earlier input, so every output sample is covered by four
//! frames. Frames running past the block end are zero-padded.
//!
//! Every frame goes through a [`SpectralProcessor`] between the forward and
//! inverse transform. The reconstructions are overlap-added, divided by the
//! summed window weight, and written back into the block in place: channel
//! 0 gets the main reconstruction, the other channels the spatial variant
//! when the processor produced one, or the same mono signal otherwise.
//!
//! The engine adds no latency. Frames past the block end are flagged as
//! incomplete so estimators can skip them.

use num_complex::Complex32;
use tracing::debug;

use crate::error::{ConfigError, ProcessingError};
use crate::fft_processor::{magnitudes_into, restore_conjugate_symmetry, SpectralTransform};
use crate::ring_buffer::RingHistory;
use crate::utils::{calculate_rms, downmix_into, hann_window};

// ============================================================================
// Constants
// ============================================================================

/// Smallest analysis frame accepted by configuration
pub const MIN_FFT_SIZE: usize = 128;

/// Largest analysis frame accepted by configuration
pub const MAX_FFT_SIZE: usize = 8192;

/// Default analysis frame
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Frames per FFT length (75% overlap)
pub const OVERLAP_FACTOR: usize = 4;

/// Window weight below which a sample is treated as uncovered
const MIN_WINDOW_WEIGHT: f32 = 1e-6;

// ============================================================================
// Frame Interface
// ============================================================================

/// One analysis frame handed to a [`SpectralProcessor`]
pub struct SpectralFrame<'a> {
    /// Full complex spectrum; edit bins `0..=N/2`, the mirror half is rebuilt
    pub spectrum: &'a mut [Complex32],
    /// Scratch spectrum for the secondary channels
    pub spatial: &'a mut [Complex32],
    /// Magnitudes of bins `0..=N/2` before any processing
    pub magnitudes: &'a [f32],
    /// Windowed time-domain frame
    pub current: &'a [f32],
    /// Windowed frame one hop earlier
    pub previous: &'a [f32],
    /// RMS of the unwindowed frame
    pub rms: f32,
    /// True when the frame holds no zero padding
    pub complete: bool,
    pub channels: usize,
}

/// Per-frame spectral processing stage
pub trait SpectralProcessor {
    /// Process one frame in place
    ///
    /// Returns `true` when `frame.spatial` was filled with a variant for
    /// channels other than the first.
    fn process_frame(&mut self, frame: &mut SpectralFrame<'_>) -> Result<bool, ProcessingError>;
}

/// Counters for one processed block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frames: usize,
    pub complete_frames: usize,
}

/// Check an analysis frame size against the configurable range
pub fn validate_fft_size(fft_size: usize) -> Result<(), ConfigError> {
    if fft_size.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
        Ok(())
    } else {
        Err(ConfigError::InvalidFftSize {
            size: fft_size,
            min: MIN_FFT_SIZE,
            max: MAX_FFT_SIZE,
        })
    }
}

// ============================================================================
// Frame Engine
// ============================================================================

pub struct FrameEngine {
    fft_size: usize,
    hop_size: usize,
    transform: SpectralTransform,
    window: Vec<f32>,
    window_sum: f32,

    /// Last `fft_size` mono input samples from earlier blocks
    history: RingHistory,

    // Working buffers (pre-allocated, block-sized ones grow at rest)
    extended: Vec<f32>,
    frame: Vec<f32>,
    previous: Vec<f32>,
    spectrum: Vec<Complex32>,
    spatial: Vec<Complex32>,
    magnitudes: Vec<f32>,
    main_acc: Vec<f32>,
    spatial_acc: Vec<f32>,
    weight_acc: Vec<f32>,

    frames_processed: u64,
}

impl std::fmt::Debug for FrameEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEngine")
            .field("fft_size", &self.fft_size)
            .field("hop_size", &self.hop_size)
            .field("frames_processed", &self.frames_processed)
            .finish()
    }
}

impl FrameEngine {
    pub fn new(fft_size: usize) -> Result<Self, ConfigError> {
        validate_fft_size(fft_size)?;

        let transform = SpectralTransform::new(fft_size)?;
        let window = hann_window(fft_size);
        let window_sum = window.iter().sum();
        let hop_size = fft_size / OVERLAP_FACTOR;

        debug!("Creating FrameEngine: fft_size={}, hop_size={}", fft_size, hop_size);

        Ok(Self {
            fft_size,
            hop_size,
            transform,
            window,
            window_sum,
            history: RingHistory::new(fft_size)?,
            extended: vec![0.0; fft_size],
            frame: vec![0.0; fft_size],
            previous: vec![0.0; fft_size],
            spectrum: vec![Complex32::new(0.0, 0.0); fft_size],
            spatial: vec![Complex32::new(0.0, 0.0); fft_size],
            magnitudes: vec![0.0; fft_size / 2 + 1],
            main_acc: Vec::new(),
            spatial_acc: Vec::new(),
            weight_acc: Vec::new(),
            frames_processed: 0,
        })
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Frames per second at a given sample rate
    #[inline]
    pub fn frame_rate(&self, sample_rate: f32) -> f32 {
        sample_rate / self.hop_size as f32
    }

    /// Converts raw FFT magnitudes of a windowed frame to sine amplitude
    #[inline]
    pub fn amplitude_scale(&self) -> f32 {
        2.0 / self.window_sum
    }

    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Size block-length buffers for `frames` samples per channel
    pub fn reserve(&mut self, frames: usize) {
        let extended = self.fft_size + frames;
        if self.extended.len() < extended {
            self.extended.resize(extended, 0.0);
        }
        if self.main_acc.len() < frames {
            self.main_acc.resize(frames, 0.0);
            self.spatial_acc.resize(frames, 0.0);
            self.weight_acc.resize(frames, 0.0);
        }
    }

    /// Run every frame of an interleaved block through `processor`, in place
    pub fn process<P>(
        &mut self,
        samples: &mut [f32],
        channels: usize,
        processor: &mut P,
    ) -> Result<FrameStats, ProcessingError>
    where
        P: SpectralProcessor + ?Sized,
    {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(ProcessingError::InvalidBlock {
                len: samples.len(),
                channels,
            });
        }

        let len = samples.len() / channels;
        if len == 0 {
            return Ok(FrameStats::default());
        }
        self.reserve(len);

        let n = self.fft_size;
        let hop = self.hop_size;

        // extended = [history | mono block]
        self.history.copy_latest(&mut self.extended[..n]);
        downmix_into(samples, channels, &mut self.extended[n..n + len]);

        self.main_acc[..len].fill(0.0);
        self.spatial_acc[..len].fill(0.0);
        self.weight_acc[..len].fill(0.0);

        // First start s > -n with s ≡ len - n (mod hop); `pos` is s + n
        let remainder = len % hop;
        let mut pos = if remainder == 0 { hop } else { remainder };
        let mut stats = FrameStats::default();

        while pos < n + len {
            let available = (n + len - pos).min(n);
            let complete = available == n;

            self.frame[..available].copy_from_slice(&self.extended[pos..pos + available]);
            self.frame[available..].fill(0.0);
            let rms = calculate_rms(&self.frame);
            for (sample, &w) in self.frame.iter_mut().zip(&self.window) {
                *sample *= w;
            }

            self.transform.forward_real(&self.frame, &mut self.spectrum)?;
            magnitudes_into(&self.spectrum, &mut self.magnitudes);

            let has_spatial = {
                let mut frame = SpectralFrame {
                    spectrum: &mut self.spectrum,
                    spatial: &mut self.spatial,
                    magnitudes: &self.magnitudes,
                    current: &self.frame,
                    previous: &self.previous,
                    rms,
                    complete,
                    channels,
                };
                processor.process_frame(&mut frame)?
            };

            restore_conjugate_symmetry(&mut self.spectrum);
            self.transform.inverse(&mut self.spectrum)?;
            if has_spatial {
                restore_conjugate_symmetry(&mut self.spatial);
                self.transform.inverse(&mut self.spatial)?;
            }

            // Overlap-add the part of the frame that lies inside the block
            let first = n.saturating_sub(pos);
            let block_start = pos + first - n;
            for i in first..available {
                let idx = block_start + (i - first);
                let main = self.spectrum[i].re;
                self.main_acc[idx] += main;
                self.spatial_acc[idx] += if has_spatial { self.spatial[i].re } else { main };
                self.weight_acc[idx] += self.window[i];
            }

            self.previous.copy_from_slice(&self.frame);
            stats.frames += 1;
            if complete {
                stats.complete_frames += 1;
            }
            pos += hop;
        }

        for (idx, frame) in samples.chunks_exact_mut(channels).enumerate() {
            let weight = self.weight_acc[idx];
            let (main, side) = if weight > MIN_WINDOW_WEIGHT {
                (self.main_acc[idx] / weight, self.spatial_acc[idx] / weight)
            } else {
                let dry = self.extended[n + idx];
                (dry, dry)
            };

            frame[0] = main;
            for sample in frame[1..].iter_mut() {
                *sample = side;
            }
        }

        self.history.extend_from_slice(&self.extended[n..n + len]);
        self.frames_processed += stats.frames as u64;
        Ok(stats)
    }

    /// Forget input history and the previous frame
    pub fn reset(&mut self) {
        self.history.clear();
        self.previous.fill(0.0);
        self.frames_processed = 0;
    }
}
