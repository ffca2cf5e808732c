//! Real-time voice enhancement for live microphone audio
//!
//! This library provides an overlap-add spectral pipeline (noise
//! subtraction, voice activity gating, echo suppression, adaptive EQ,
//! spatial widening), a compressor, and two feedback loop detectors, all
//! driven block by block through [`VoicePipeline`].

/// Utility functions for audio processing
pub mod utils;
/// Error types
pub mod error;
/// Pipeline configuration and stream format
pub mod config;
/// Fixed-capacity sample and frame histories
pub mod ring_buffer;
/// FFT-based spectral processing
pub mod fft_processor;
/// FFT cross-correlation
pub mod correlation;
/// Noise profile estimation
pub mod noise_profile;
/// Wideband adaptive noise floor
pub mod noise_floor;
/// Spectral subtraction for noise reduction
pub mod spectral_subtraction;
/// Spectral noise gate
pub mod noise_gate;
/// Voice activity detection
pub mod vad;
/// Frame-to-frame echo suppression
pub mod echo_suppressor;
/// Adaptive EQ and spatial enhancement
pub mod spectral_shaping;
/// Compressor
pub mod dynamics;
/// Overlap-add frame scheduling
pub mod frame_engine;
/// Per-frame operator chain
pub mod spectral_chain;
/// Time-domain loop detection
pub mod loop_detector;
/// Frequency-domain loop detection
pub mod spectral_loop_detector;
/// Owning pipeline handle
pub mod pipeline;

pub use config::{LoopMode, NoiseMode, PipelineConfig, StreamFormat};
pub use error::{ConfigError, ProcessingError};
pub use frame_engine::{FrameEngine, SpectralFrame, SpectralProcessor};
pub use loop_detector::LoopDetection;
pub use pipeline::{BlockOutcome, ErrorRecord, PipelineStats, VoicePipeline};
pub use spectral_loop_detector::SpectralLoopDetection;
