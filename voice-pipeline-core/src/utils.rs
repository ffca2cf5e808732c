//! Shared DSP helpers: level conversion, bin mapping, envelope following,
//! windows and block utilities

use std::f32::consts::TAU;

/// Levels at or below this many dB map to zero amplitude
pub const DB_NOISE_FLOOR: f32 = -100.0;

/// Offset added to envelope inputs to keep state out of the denormal range
pub const DENORMAL_PREVENTION: f32 = 1e-24;

/// Upper bound for one-pole smoothing coefficients
const MAX_SMOOTHING_COEFF: f32 = 0.99999;

/// Amplitude to dB, `-inf` for zero or negative input
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear > 0.0 {
        linear.log10() * 20.0
    } else {
        f32::NEG_INFINITY
    }
}

/// dB to amplitude, zero at or below [`DB_NOISE_FLOOR`]
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    if db > DB_NOISE_FLOOR {
        10.0_f32.powf(db * 0.05)
    } else {
        0.0
    }
}

/// Centre frequency of an FFT bin
#[inline]
pub fn bin_frequency(bin: usize, fft_size: usize, sample_rate: f32) -> f32 {
    bin as f32 * sample_rate / fft_size as f32
}

/// Nearest FFT bin for a frequency, clamped to `0..=fft_size/2`
#[inline]
pub fn frequency_to_bin(freq: f32, fft_size: usize, sample_rate: f32) -> usize {
    let bin = (freq.max(0.0) * fft_size as f32 / sample_rate).round() as usize;
    bin.min(fft_size / 2)
}

/// One-pole coefficient `exp(-1 / (time_seconds * update_rate))`
///
/// Zero (instant) when either argument is not positive.
#[inline]
pub fn smoothing_coeff(time_ms: f32, update_rate: f32) -> f32 {
    if time_ms > 0.0 && update_rate > 0.0 {
        let updates = time_ms * 0.001 * update_rate;
        (-updates.recip()).exp().min(MAX_SMOOTHING_COEFF)
    } else {
        0.0
    }
}

/// Rectifying one-pole follower with separate attack and release
///
/// The follower is fed at `update_rate` values per second. That is the
/// sample rate for the compressor, the frame rate for the voice activity
/// detector and the bin sweep rate for the spectral gate.
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack: f32,
    release: f32,
    value: f32,
}

impl EnvelopeFollower {
    pub fn new(attack_ms: f32, release_ms: f32, update_rate: f32) -> Self {
        Self {
            attack: smoothing_coeff(attack_ms, update_rate),
            release: smoothing_coeff(release_ms, update_rate),
            value: 0.0,
        }
    }

    /// Feed one value and return the new envelope
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let target = input.abs() + DENORMAL_PREVENTION;
        let coeff = if target > self.value { self.attack } else { self.release };
        self.value = target + (self.value - target) * coeff;
        self.value
    }

    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32, update_rate: f32) {
        self.attack = smoothing_coeff(attack_ms, update_rate);
        self.release = smoothing_coeff(release_ms, update_rate);
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn attack_coeff(&self) -> f32 {
        self.attack
    }

    #[inline]
    pub fn release_coeff(&self) -> f32 {
        self.release
    }
}

/// Symmetric Hann window, `w[n] = 0.5 * (1 - cos(2πn / (N - 1)))`
///
/// Sizes below two give all ones.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let step = TAU / (size - 1) as f32;
    (0..size)
        .map(|n| 0.5 - 0.5 * (n as f32 * step).cos())
        .collect()
}

/// Root mean square, zero for an empty slice
#[inline]
pub fn calculate_rms(buffer: &[f32]) -> f32 {
    match buffer.len() {
        0 => 0.0,
        len => (buffer.iter().map(|x| x * x).sum::<f32>() / len as f32).sqrt(),
    }
}

/// Largest absolute sample
#[inline]
pub fn calculate_peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0_f32, |peak, x| peak.max(x.abs()))
}

/// Average interleaved channels into `mono`
///
/// `mono` must hold at least `interleaved.len() / channels` samples; only
/// that prefix is written.
pub fn downmix_into(interleaved: &[f32], channels: usize, mono: &mut [f32]) {
    if channels <= 1 {
        mono[..interleaved.len()].copy_from_slice(interleaved);
        return;
    }

    let scale = 1.0 / channels as f32;
    for (out, frame) in mono.iter_mut().zip(interleaved.chunks_exact(channels)) {
        *out = frame.iter().sum::<f32>() * scale;
    }
}

#[inline]
pub fn apply_gain(buffer: &mut [f32], gain: f32) {
    buffer.iter_mut().for_each(|s| *s *= gain);
}

/// Gain applied when a correlation-based detector fires
#[inline]
pub fn correlation_attenuation(strength: f32, correlation: f32) -> f32 {
    (1.0 - strength * correlation).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_conversion() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
        assert_eq!(linear_to_db(-1.0), f32::NEG_INFINITY);

        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert_eq!(db_to_linear(DB_NOISE_FLOOR), 0.0);
        assert_eq!(db_to_linear(-150.0), 0.0);
    }

    #[test]
    fn test_bin_mapping() {
        assert!((bin_frequency(64, 2048, 48000.0) - 1500.0).abs() < 0.001);
        assert_eq!(frequency_to_bin(1500.0, 2048, 48000.0), 64);
        assert_eq!(frequency_to_bin(96000.0, 2048, 48000.0), 1024);
        assert_eq!(frequency_to_bin(-10.0, 2048, 48000.0), 0);
    }

    #[test]
    fn test_hann_window_is_symmetric() {
        let window = hann_window(5);
        assert_eq!(window.len(), 5);
        assert!(window[0].abs() < 1e-6);
        assert!(window[4].abs() < 1e-6);
        assert!((window[2] - 1.0).abs() < 1e-6);
        assert!((window[1] - window[3]).abs() < 1e-6);

        assert_eq!(hann_window(1), vec![1.0]);
        assert!(hann_window(0).is_empty());
    }

    #[test]
    fn test_envelope_attack_faster_than_release() {
        // 93.75 frames per second, as for a 2048-point frame at 48 kHz
        let mut env = EnvelopeFollower::new(20.0, 150.0, 93.75);
        let rise = env.process(1.0);
        assert!((rise - (1.0 - env.attack_coeff())).abs() < 1e-6);

        for _ in 0..50 {
            env.process(1.0);
        }
        let settled = env.current();
        let fall = env.process(0.0);
        assert!(settled - fall < rise);
        assert!(env.release_coeff() > env.attack_coeff());

        env.set_times(0.0, 0.0, 93.75);
        assert_eq!(env.process(0.0), DENORMAL_PREVENTION);
        env.reset();
        assert_eq!(env.current(), 0.0);
    }

    #[test]
    fn test_smoothing_coeff() {
        // 10 ms at 1 kHz is ten updates: exp(-1/10)
        let coeff = smoothing_coeff(10.0, 1000.0);
        assert!((coeff - (-0.1_f32).exp()).abs() < 1e-6);

        assert_eq!(smoothing_coeff(0.0, 48000.0), 0.0);
        assert_eq!(smoothing_coeff(10.0, 0.0), 0.0);
        assert_eq!(smoothing_coeff(1e9, 48000.0), MAX_SMOOTHING_COEFF);
    }

    #[test]
    fn test_levels() {
        assert!((calculate_rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(calculate_rms(&[0.0; 64]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
        assert_eq!(calculate_peak(&[0.25, -0.75, 0.5]), 0.75);
        assert_eq!(calculate_peak(&[]), 0.0);
    }

    #[test]
    fn test_downmix() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mut mono = [9.0; 4];
        downmix_into(&stereo, 2, &mut mono);
        assert_eq!(&mono[..3], &[0.5, 0.5, 0.0]);
        assert_eq!(mono[3], 9.0);

        let single = [0.25, -0.25];
        downmix_into(&single, 1, &mut mono);
        assert_eq!(&mono[..2], &single);
    }

    #[test]
    fn test_apply_gain() {
        let mut block = [1.0, -0.5, 0.25];
        apply_gain(&mut block, 0.5);
        assert_eq!(block, [0.5, -0.25, 0.125]);
    }

    #[test]
    fn test_correlation_attenuation_clamped() {
        assert_eq!(correlation_attenuation(0.5, 0.0), 1.0);
        assert!((correlation_attenuation(0.5, 0.8) - 0.6).abs() < 1e-6);
        assert_eq!(correlation_attenuation(2.0, 1.0), 0.0);
        assert_eq!(correlation_attenuation(1.0, -0.5), 1.0);
    }
}
