//! The owning pipeline handle
//!
//! [`VoicePipeline`] holds every stage behind one lock. A block runs
//! through, in order:
//!
//! 1. the spectral frame engine and operator chain (when any spectral
//!    stage is enabled)
//! 2. the compressor
//! 3. the time-domain loop detector
//! 4. the frequency-domain loop detector
//!
//! Any failure inside a block, including a panic or a non-finite output
//! sample, restores the block from a copy taken on entry, resets the
//! stateful stages and is recorded in a bounded error log. The host always
//! gets its block back.
//!
//! # Thread Safety
//! `VoicePipeline` is `Send + Sync`. Processing, configuration updates and
//! reinitialization serialize on a `parking_lot::Mutex`, so buffers are
//! only ever rebuilt between blocks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::config::{PipelineConfig, StreamFormat};
use crate::dynamics::Compressor;
use crate::error::{ConfigError, ProcessingError};
use crate::frame_engine::FrameEngine;
use crate::loop_detector::{LoopDetection, LoopDetector};
use crate::spectral_chain::{ChainStats, SpectralChain};
use crate::spectral_loop_detector::{SpectralLoopDetection, SpectralLoopDetector};
use crate::utils::{apply_gain, downmix_into, DB_NOISE_FLOOR};

/// Entries kept in the error log
pub const ERROR_LOG_CAPACITY: usize = 10;

/// What happened to a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Processed,
    /// Processing failed and the block was returned unchanged
    PassedThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// 1-based index of the failed block
    pub block_index: u64,
    pub message: String,
}

/// Fixed-capacity log of recent processing failures, oldest dropped first
#[derive(Debug, Clone)]
pub struct ErrorLog {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Records from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(ERROR_LOG_CAPACITY)
    }
}

/// Snapshot of pipeline counters and the latest detector decisions
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub blocks_processed: u64,
    pub blocks_passed_through: u64,
    pub voice_active: bool,
    pub noise_floor_db: f32,
    pub fft_size: usize,
    pub chain: ChainStats,
    pub loop_detection: LoopDetection,
    pub spectral_loop_detection: SpectralLoopDetection,
}

// ============================================================================
// Components
// ============================================================================

/// Every size-dependent stage, rebuilt together on reinitialization
#[derive(Debug)]
struct Components {
    engine: FrameEngine,
    chain: SpectralChain,
    compressor: Compressor,
    loop_detector: LoopDetector,
    spectral_loop: SpectralLoopDetector,
}

impl Components {
    fn build(config: &PipelineConfig, format: StreamFormat) -> Result<Self, ConfigError> {
        let engine = FrameEngine::new(config.fft_size)?;
        let chain = SpectralChain::new(config, format.sample_rate, &engine)?;

        Ok(Self {
            chain,
            compressor: Compressor::new(&config.compressor_config(), format.sample_rate),
            loop_detector: LoopDetector::new(
                config.loop_detection_window_ms,
                config.loop_min_lag_ms,
                config.loop_detection_strength,
                config.loop_mode(),
                format.sample_rate,
            )?,
            spectral_loop: SpectralLoopDetector::new(
                config.fft_size,
                config.loop_detection_strength,
                format.sample_rate,
            )?,
            engine,
        })
    }

    fn apply(&mut self, previous: &PipelineConfig, config: &PipelineConfig) {
        // The engine history is not fed while every spectral stage is off
        if config.spectral_processing_enabled() && !previous.spectral_processing_enabled() {
            self.engine.reset();
        }
        self.chain.apply_config(config);
        self.compressor.update_config(&config.compressor_config());
        self.loop_detector.set_params(
            config.loop_min_lag_ms,
            config.loop_detection_strength,
            config.loop_mode(),
        );
        self.spectral_loop.set_strength(config.loop_detection_strength);
    }

    fn reset(&mut self) {
        self.engine.reset();
        self.chain.reset();
        self.compressor.reset();
        self.loop_detector.reset();
        self.spectral_loop.reset();
    }
}

// ============================================================================
// Pipeline State
// ============================================================================

#[derive(Debug)]
struct PipelineState {
    config: PipelineConfig,
    format: StreamFormat,
    components: Components,

    raw_mono: Vec<f32>,
    processed_mono: Vec<f32>,
    backup: Vec<f32>,

    errors: ErrorLog,
    block_index: u64,
    blocks_processed: u64,
    blocks_passed_through: u64,
}

impl PipelineState {
    fn process_block(&mut self, samples: &mut [f32], channels: usize) -> Result<(), ProcessingError> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(ProcessingError::InvalidBlock {
                len: samples.len(),
                channels,
            });
        }

        let frames = samples.len() / channels;
        if frames == 0 {
            return Ok(());
        }
        if self.raw_mono.len() < frames {
            self.raw_mono.resize(frames, 0.0);
            self.processed_mono.resize(frames, 0.0);
        }

        let raw = &mut self.raw_mono[..frames];
        let processed = &mut self.processed_mono[..frames];
        let parts = &mut self.components;
        downmix_into(samples, channels, raw);

        if self.config.spectral_processing_enabled() {
            parts.engine.process(samples, channels, &mut parts.chain)?;
        }

        if self.config.enable_compression {
            parts.compressor.process(samples, channels);
        }

        let detect_time = self.config.enable_loop_detection;
        let detect_spectral = self.config.enable_spectral_loop_detection;
        if detect_time || detect_spectral {
            downmix_into(samples, channels, processed);
        }

        if detect_time {
            let detection = parts.loop_detector.process(raw, processed)?;
            if detection.gain < 1.0 {
                apply_gain(samples, detection.gain);
                apply_gain(processed, detection.gain);
            }
        }

        if detect_spectral {
            let detection = parts.spectral_loop.process(raw, processed)?;
            if detection.gain < 1.0 {
                apply_gain(samples, detection.gain);
            }
        }

        match samples.iter().position(|s| !s.is_finite()) {
            Some(index) => Err(ProcessingError::NonFiniteOutput { index }),
            None => Ok(()),
        }
    }

    fn record_failure(&mut self, error: &ProcessingError) {
        warn!(
            "Block {} passed through unprocessed: {}",
            self.block_index, error
        );
        self.errors.push(ErrorRecord {
            block_index: self.block_index,
            message: error.to_string(),
        });
        self.blocks_passed_through += 1;
        if error.is_mid_block() {
            self.components.reset();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Voice Pipeline
// ============================================================================

/// Real-time voice enhancement pipeline
pub struct VoicePipeline {
    state: Mutex<PipelineState>,
}

impl VoicePipeline {
    pub fn new(config: PipelineConfig, format: StreamFormat) -> Result<Self, ConfigError> {
        config.validate(&format)?;
        debug!(
            "Creating VoicePipeline: sample_rate={}, channels={}, fft_size={}",
            format.sample_rate, format.channels, config.fft_size
        );

        let components = Components::build(&config, format)?;
        Ok(Self {
            state: Mutex::new(PipelineState {
                config,
                format,
                components,
                raw_mono: Vec::new(),
                processed_mono: Vec::new(),
                backup: Vec::new(),
                errors: ErrorLog::default(),
                block_index: 0,
                blocks_processed: 0,
                blocks_passed_through: 0,
            }),
        })
    }

    /// Process one interleaved block in place
    ///
    /// On failure the block is left exactly as it came in.
    pub fn process(&self, samples: &mut [f32], channels: usize) -> BlockOutcome {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.block_index += 1;

        state.backup.clear();
        state.backup.extend_from_slice(samples);

        let result = panic::catch_unwind(AssertUnwindSafe(|| state.process_block(samples, channels)));
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(ProcessingError::Panicked(panic_message(payload))),
        };

        match error {
            None => {
                state.blocks_processed += 1;
                BlockOutcome::Processed
            }
            Some(error) => {
                samples.copy_from_slice(&state.backup);
                state.record_failure(&error);
                BlockOutcome::PassedThrough
            }
        }
    }

    /// Validate and apply a new configuration
    ///
    /// Size-affecting changes rebuild the stages; everything else applies
    /// from the next block on. On error the previous configuration stays.
    pub fn update_config(&self, config: PipelineConfig) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        config.validate(&state.format)?;

        if state.config.requires_reinit(&config) {
            let components = Components::build(&config, state.format)?;
            state.components = components;
            debug!(
                "Reinitialized for fft_size={}, loop window={} ms",
                config.fft_size, config.loop_detection_window_ms
            );
        } else {
            let PipelineState { config: previous, components, .. } = &mut *state;
            components.apply(previous, &config);
            debug!("Applied configuration update in place");
        }

        state.config = config;
        Ok(())
    }

    /// Rebuild every stage for a new stream format
    pub fn reinitialize(&self, format: StreamFormat) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        state.config.validate(&format)?;

        let components = Components::build(&state.config, format)?;
        state.components = components;
        state.format = format;

        debug!(
            "Reinitialized for sample_rate={}, channels={}",
            format.sample_rate, format.channels
        );
        Ok(())
    }

    pub fn config(&self) -> PipelineConfig {
        self.state.lock().config.clone()
    }

    pub fn format(&self) -> StreamFormat {
        self.state.lock().format
    }

    /// Recent failures, oldest first
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.state.lock().errors.iter().cloned().collect()
    }

    pub fn clear_error_history(&self) {
        self.state.lock().errors.clear();
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.state.lock();
        let parts = &state.components;
        let spectral = state.config.spectral_processing_enabled();

        PipelineStats {
            blocks_processed: state.blocks_processed,
            blocks_passed_through: state.blocks_passed_through,
            voice_active: state.config.enable_vad && parts.chain.voice_active(),
            noise_floor_db: if spectral {
                parts.chain.noise_floor_db()
            } else {
                DB_NOISE_FLOOR
            },
            fft_size: parts.engine.fft_size(),
            chain: parts.chain.stats(),
            loop_detection: parts.loop_detector.last_detection(),
            spectral_loop_detection: parts.spectral_loop.last_detection(),
        }
    }
}

impl std::fmt::Debug for VoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePipeline").finish_non_exhaustive()
    }
}
