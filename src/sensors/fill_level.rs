use rand::Rng;
use serde::Serialize;

use super::{clamp, jitter, round_to, Sensor, SensorIdentity, SensorKind};
use crate::config::FillLevelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Normal,
    Full,
    Overflow,
}

impl FillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillStatus::Normal => "normal",
            FillStatus::Full => "full",
            FillStatus::Overflow => "overflow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FillLevelReading {
    pub level: f64,
    pub capacity: f64,
    pub is_full: bool,
    pub is_overflowing: bool,
    pub status: FillStatus,
}

/// Monotonic accumulator: every read adds `fill_rate ± variation`.
pub struct FillLevelSensor {
    identity: SensorIdentity,
    level: f64,
    fill_rate: f64,
    variation: f64,
    capacity: f64,
    overflow_threshold: f64,
}

impl FillLevelSensor {
    pub fn new(device_id: &str, cfg: &FillLevelConfig) -> Self {
        Self {
            identity: SensorIdentity::new(device_id, SensorKind::FillLevel),
            level: clamp(cfg.initial_level, 0.0, cfg.capacity),
            fill_rate: cfg.fill_rate,
            variation: cfg.fill_rate_variation,
            capacity: cfg.capacity,
            overflow_threshold: cfg.overflow_threshold,
        }
    }

    pub fn set_level(&mut self, level: f64) {
        self.level = clamp(level, 0.0, self.capacity);
    }

    pub fn empty_bin(&mut self) {
        self.level = 0.0;
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

impl Sensor for FillLevelSensor {
    type Input<'a> = ();
    type Output = FillLevelReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, _input: ()) -> FillLevelReading {
        let step = self.fill_rate + jitter(rng, self.variation);
        self.level = clamp(self.level + step, 0.0, self.capacity);

        let level = round_to(self.level, 2);
        let is_full = level >= self.overflow_threshold;
        let is_overflowing = level >= self.capacity;
        let status = if is_overflowing {
            FillStatus::Overflow
        } else if is_full {
            FillStatus::Full
        } else {
            FillStatus::Normal
        };
        FillLevelReading {
            level,
            capacity: self.capacity,
            is_full,
            is_overflowing,
            status,
        }
    }
}
