//! Fixed-capacity history buffers for real-time audio processing
//!
//! [`RingHistory`] keeps the most recent samples of a mono signal and
//! overwrites the oldest ones as new audio arrives. [`FrameHistory`] does
//! the same for whole per-frame vectors (magnitude spectra). Both are sized
//! once at construction and never reallocate afterwards, so they can be
//! written from the audio callback.

use thiserror::Error;

/// Error types for history buffer construction
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RingBufferError {
    #[error("history capacity must be non-zero")]
    InvalidSize,
}

// ============================================================================
// Sample History
// ============================================================================

/// Circular store of the last `capacity` samples
///
/// # Thread Safety
/// This type is not thread-safe. It is owned by a single processor.
#[derive(Debug, Clone)]
pub struct RingHistory {
    buffer: Box<[f32]>,
    /// Index the next sample is written to
    write_pos: usize,
    /// Number of valid samples, saturates at capacity
    len: usize,
}

impl RingHistory {
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::InvalidSize);
        }

        Ok(Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            write_pos: 0,
            len: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    /// Append one sample, dropping the oldest when full
    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        self.len = (self.len + 1).min(self.buffer.len());
    }

    /// Append a block of samples
    ///
    /// Blocks longer than the capacity only keep their tail.
    pub fn extend_from_slice(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        let samples = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        // At most two contiguous copies
        let first = samples.len().min(capacity - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.buffer[..rest].copy_from_slice(&samples[first..]);

        self.write_pos = (self.write_pos + samples.len()) % capacity;
        self.len = (self.len + samples.len()).min(capacity);
    }

    /// Copy the most recent `out.len()` samples into `out`, oldest first
    ///
    /// When fewer samples are stored, the leading part of `out` is filled
    /// with silence.
    pub fn copy_latest(&self, out: &mut [f32]) {
        let capacity = self.buffer.len();
        let wanted = out.len().min(capacity);
        let available = wanted.min(self.len);
        let silence = out.len() - available;
        out[..silence].fill(0.0);

        let start = (self.write_pos + capacity - available) % capacity;
        let first = available.min(capacity - start);
        out[silence..silence + first].copy_from_slice(&self.buffer[start..start + first]);
        out[silence + first..].copy_from_slice(&self.buffer[..available - first]);
    }

    /// Iterate stored samples from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let capacity = self.buffer.len();
        let start = (self.write_pos + capacity - self.len) % capacity;
        (0..self.len).map(move |i| self.buffer[(start + i) % capacity])
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.len = 0;
    }
}

// ============================================================================
// Frame History
// ============================================================================

/// Circular store of the last `capacity` fixed-length frames
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: Vec<Vec<f32>>,
    write_index: usize,
    size: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize, frame_len: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 || frame_len == 0 {
            return Err(RingBufferError::InvalidSize);
        }

        Ok(Self {
            frames: (0..capacity).map(|_| vec![0.0; frame_len]).collect(),
            write_index: 0,
            size: 0,
        })
    }

    /// Copy a frame in, replacing the oldest when full
    ///
    /// Only the first `frame_len` values of `frame` are used; shorter
    /// frames are zero-extended.
    pub fn push(&mut self, frame: &[f32]) {
        let slot = &mut self.frames[self.write_index];
        let n = slot.len().min(frame.len());
        slot[..n].copy_from_slice(&frame[..n]);
        slot[n..].fill(0.0);

        self.write_index = (self.write_index + 1) % self.frames.len();
        self.size = (self.size + 1).min(self.frames.len());
    }

    /// Frame `index` counted from the oldest stored frame
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        if index >= self.size {
            return None;
        }
        let start = (self.write_index + self.frames.len() - self.size) % self.frames.len();
        Some(&self.frames[(start + index) % self.frames.len()])
    }

    /// Iterate frames from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.size).filter_map(move |i| self.get(i))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.size = 0;
    }
}
