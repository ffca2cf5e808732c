//! Wideband adaptive noise floor
//!
//! Tracks a low percentile of recent frame levels (in dB) and follows it
//! with asymmetric smoothing: drops are taken at once, rises are blended in
//! slowly so a talker does not drag the floor up. The standard noise gate
//! raises its threshold to sit a margin above this floor.

use crate::error::ConfigError;
use crate::ring_buffer::RingHistory;
use crate::utils::{linear_to_db, DB_NOISE_FLOOR};

/// Frame levels kept for the percentile
pub const DEFAULT_HISTORY_FRAMES: usize = 100;

/// Percentile of the level history taken as the noise floor
pub const DEFAULT_PERCENTILE: f32 = 0.1;

/// Fraction of an upward step taken per frame
pub const DEFAULT_RISE_RATE: f32 = 0.05;

#[derive(Debug, Clone)]
pub struct AdaptiveNoiseFloor {
    levels: RingHistory,
    scratch: Vec<f32>,
    percentile: f32,
    rise_rate: f32,
    floor_db: Option<f32>,
}

impl AdaptiveNoiseFloor {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_history(DEFAULT_HISTORY_FRAMES)
    }

    pub fn with_history(frames: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            levels: RingHistory::new(frames)?,
            scratch: Vec::with_capacity(frames),
            percentile: DEFAULT_PERCENTILE,
            rise_rate: DEFAULT_RISE_RATE,
            floor_db: None,
        })
    }

    /// Feed one frame RMS (linear) and return the updated floor in dB
    pub fn update(&mut self, rms: f32) -> f32 {
        let level_db = if rms.is_finite() {
            linear_to_db(rms).max(DB_NOISE_FLOOR)
        } else {
            DB_NOISE_FLOOR
        };
        self.levels.push(level_db);

        self.scratch.clear();
        self.scratch.extend(self.levels.iter());
        let rank = ((self.scratch.len() - 1) as f32 * self.percentile) as usize;
        let (_, &mut target, _) = self.scratch.select_nth_unstable_by(rank, f32::total_cmp);

        let floor = match self.floor_db {
            Some(current) if target > current => current + self.rise_rate * (target - current),
            _ => target,
        };
        self.floor_db = Some(floor);
        floor
    }

    /// Current floor in dB, `DB_NOISE_FLOOR` before the first update
    #[inline]
    pub fn floor_db(&self) -> f32 {
        self.floor_db.unwrap_or(DB_NOISE_FLOOR)
    }

    pub fn reset(&mut self) {
        self.levels.clear();
        self.floor_db = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::db_to_linear;

    #[test]
    fn test_silence_clamps_to_floor() {
        let mut floor = AdaptiveNoiseFloor::new().unwrap();
        assert_eq!(floor.floor_db(), DB_NOISE_FLOOR);
        assert_eq!(floor.update(0.0), DB_NOISE_FLOOR);
        assert_eq!(floor.update(f32::NAN), DB_NOISE_FLOOR);
    }

    #[test]
    fn test_tracks_stationary_noise() {
        let mut floor = AdaptiveNoiseFloor::new().unwrap();
        for _ in 0..200 {
            floor.update(db_to_linear(-50.0));
        }
        assert!((floor.floor_db() - (-50.0)).abs() < 0.01);
    }

    #[test]
    fn test_ignores_short_loud_bursts() {
        let mut floor = AdaptiveNoiseFloor::new().unwrap();
        for _ in 0..100 {
            floor.update(db_to_linear(-60.0));
        }
        // Speech occupying less than 90% of the history leaves the low
        // percentile where it was
        for _ in 0..50 {
            floor.update(db_to_linear(-10.0));
        }
        assert!(floor.floor_db() < -59.0, "floor {}", floor.floor_db());
    }

    #[test]
    fn test_rises_slowly_drops_fast() {
        let mut floor = AdaptiveNoiseFloor::with_history(1).unwrap();
        floor.update(db_to_linear(-60.0));
        let risen = floor.update(db_to_linear(-40.0));
        assert!((risen - (-59.0)).abs() < 0.01);

        let dropped = floor.update(db_to_linear(-80.0));
        assert!((dropped - (-80.0)).abs() < 0.01);
    }
}
