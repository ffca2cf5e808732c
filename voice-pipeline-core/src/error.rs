//! Error types shared across the pipeline
//!
//! Setup paths (construction, configuration updates, reinitialization)
//! return [`ConfigError`]. Block processing returns [`ProcessingError`],
//! which never escapes [`crate::pipeline::VoicePipeline::process`]: it is
//! logged and the block falls back to pass-through.

use thiserror::Error;

use crate::fft_processor::TransformError;
use crate::noise_profile::NoiseProfileError;
use crate::ring_buffer::RingBufferError;

/// Invalid configuration or stream format
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid FFT size {size}: must be a power of two between {min} and {max}")]
    InvalidFftSize { size: usize, min: usize, max: usize },

    #[error("invalid sample rate {0} Hz")]
    InvalidSampleRate(f32),

    #[error("invalid channel count {0}")]
    InvalidChannelCount(usize),

    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("invalid voice band {low_hz}..{high_hz} Hz for sample rate {sample_rate} Hz")]
    InvalidVoiceBand {
        low_hz: f32,
        high_hz: f32,
        sample_rate: f32,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Buffer(#[from] RingBufferError),
}

impl ConfigError {
    /// Range check helper used by the `validate` methods
    pub(crate) fn check_range(
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    ) -> Result<(), ConfigError> {
        if value.is_finite() && (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange { name, value, min, max })
        }
    }
}

/// Failure while processing one audio block
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("block of {len} samples is not a whole number of {channels}-channel frames")]
    InvalidBlock { len: usize, channels: usize },

    #[error("processing produced a non-finite sample at index {index}")]
    NonFiniteOutput { index: usize },

    #[error("processing panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    NoiseProfile(#[from] NoiseProfileError),
}

impl ProcessingError {
    /// Whether processing stopped after stages had already changed state
    pub fn is_mid_block(&self) -> bool {
        !matches!(self, ProcessingError::InvalidBlock { .. })
    }
}
