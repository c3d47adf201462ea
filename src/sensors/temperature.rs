//! Temperature generator.
//!
//! Two-state machine: `Drifting` counts consecutive normal readings and
//! relaxes toward the base temperature; once the streak reaches the
//! configured threshold the sensor moves to `AnomalyDue` and the next read
//! is a forced anomaly. A random draw can also trigger an anomaly early.
//!
//! The reported `is_anomaly` flag is derived from the value against the
//! static thresholds, not from the branch taken, so drift alone can raise
//! it too.

use rand::Rng;
use serde::Serialize;

use super::{jitter, round_to, Sensor, SensorIdentity, SensorKind};
use crate::config::TemperatureConfig;

const HIGH_ANOMALY_SHARE: f64 = 0.7;
const HIGH_ANOMALY_SPAN: f64 = 20.0;
const LOW_ANOMALY_SPAN: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Drifting { streak: u32 },
    AnomalyDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    High,
    Low,
    None,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::High => "high",
            AnomalyType::Low => "low",
            AnomalyType::None => "none",
        }
    }
}

/// Which branch produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureBranch {
    Forced,
    Random,
    Drift,
}

impl TemperatureBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureBranch::Forced => "forced",
            TemperatureBranch::Random => "random",
            TemperatureBranch::Drift => "drift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub value: f64,
    pub unit: &'static str,
    pub is_anomaly: bool,
    pub anomaly_type: AnomalyType,
    pub branch: TemperatureBranch,
}

pub struct TemperatureSensor {
    identity: SensorIdentity,
    cfg: TemperatureConfig,
    current: f64,
    phase: Phase,
}

impl TemperatureSensor {
    pub fn new(device_id: &str, cfg: &TemperatureConfig) -> Self {
        let mut sensor = Self {
            identity: SensorIdentity::new(device_id, SensorKind::Temperature),
            current: cfg.base_temperature,
            cfg: cfg.clone(),
            phase: Phase::Drifting { streak: 0 },
        };
        sensor.phase = sensor.after_normal(0);
        sensor
    }

    pub fn set_temperature(&mut self, value: f64) {
        if value.is_finite() {
            self.current = value;
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn after_normal(&self, streak: u32) -> Phase {
        if streak >= self.cfg.normal_readings_before_anomaly {
            Phase::AnomalyDue
        } else {
            Phase::Drifting { streak }
        }
    }

    fn anomaly<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        // Offsets are drawn from (0, span] so a forced value always lands
        // strictly beyond its threshold.
        self.current = if rng.gen_bool(HIGH_ANOMALY_SHARE) {
            self.cfg.anomaly_threshold_high + (HIGH_ANOMALY_SPAN - rng.gen_range(0.0..HIGH_ANOMALY_SPAN))
        } else {
            self.cfg.anomaly_threshold_low - (LOW_ANOMALY_SPAN - rng.gen_range(0.0..LOW_ANOMALY_SPAN))
        };
        self.phase = self.after_normal(0);
    }

    fn drift<R: Rng + ?Sized>(&mut self, rng: &mut R, streak: u32) {
        self.current = 0.8 * self.current
            + 0.2 * self.cfg.base_temperature
            + jitter(rng, self.cfg.normal_fluctuation);
        self.phase = self.after_normal(streak.saturating_add(1));
    }

    fn classify(&self, value: f64) -> AnomalyType {
        if value > self.cfg.anomaly_threshold_high {
            AnomalyType::High
        } else if value < self.cfg.anomaly_threshold_low {
            AnomalyType::Low
        } else {
            AnomalyType::None
        }
    }
}

impl Sensor for TemperatureSensor {
    type Input<'a> = ();
    type Output = TemperatureReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, _input: ()) -> TemperatureReading {
        let branch = match self.phase {
            Phase::AnomalyDue => {
                self.anomaly(rng);
                TemperatureBranch::Forced
            }
            Phase::Drifting { streak } => {
                if rng.gen::<f64>() < self.cfg.anomaly_probability {
                    self.anomaly(rng);
                    TemperatureBranch::Random
                } else {
                    self.drift(rng, streak);
                    TemperatureBranch::Drift
                }
            }
        };

        let anomaly_type = self.classify(self.current);
        TemperatureReading {
            value: round_to(self.current, 2),
            unit: "Celsius",
            is_anomaly: anomaly_type != AnomalyType::None,
            anomaly_type,
            branch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn cfg(anomaly_probability: f64, threshold: u32) -> TemperatureConfig {
        TemperatureConfig {
            base_temperature: 22.0,
            normal_fluctuation: 2.0,
            anomaly_threshold_high: 50.0,
            anomaly_threshold_low: 0.0,
            anomaly_probability,
            normal_readings_before_anomaly: threshold,
        }
    }

    #[test]
    fn test_forced_anomaly_after_streak() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut t = TemperatureSensor::new("bin", &cfg(0.0, 3));
        for _ in 0..3 {
            let r = t.read(&mut rng, ());
            assert_eq!(r.branch, TemperatureBranch::Drift);
            assert!(!r.is_anomaly);
        }
        assert_eq!(t.phase(), Phase::AnomalyDue);
        let r = t.read(&mut rng, ());
        assert_eq!(r.branch, TemperatureBranch::Forced);
        assert!(r.is_anomaly);
        assert_ne!(r.anomaly_type, AnomalyType::None);
        assert_eq!(t.phase(), Phase::Drifting { streak: 0 });
    }

    #[test]
    fn test_forced_cycle_repeats() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut t = TemperatureSensor::new("bin", &cfg(0.0, 3));
        for i in 0..40 {
            let r = t.read(&mut rng, ());
            if i % 4 == 3 {
                assert_eq!(r.branch, TemperatureBranch::Forced, "read {}", i);
                assert!(r.is_anomaly, "read {}", i);
            } else {
                assert_eq!(r.branch, TemperatureBranch::Drift, "read {}", i);
            }
        }
    }

    #[test]
    fn test_random_anomaly_resets_streak() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut t = TemperatureSensor::new("bin", &cfg(1.0, 3));
        let r = t.read(&mut rng, ());
        assert_eq!(r.branch, TemperatureBranch::Random);
        assert!(r.is_anomaly);
        assert_eq!(t.phase(), Phase::Drifting { streak: 0 });
    }

    #[test]
    fn test_drift_can_flag_anomaly() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut t = TemperatureSensor::new("bin", &cfg(0.0, 100));
        // Far above the high threshold; one drift step cannot bring it back.
        t.set_temperature(200.0);
        let r = t.read(&mut rng, ());
        assert_eq!(r.branch, TemperatureBranch::Drift);
        assert!(r.is_anomaly);
        assert_eq!(r.anomaly_type, AnomalyType::High);
    }

    #[test]
    fn test_forced_follows_drift_anomaly() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut t = TemperatureSensor::new("bin", &cfg(0.0, 2));
        t.set_temperature(300.0);
        let first = t.read(&mut rng, ());
        let second = t.read(&mut rng, ());
        assert!(first.is_anomaly && second.is_anomaly);
        assert_eq!(second.branch, TemperatureBranch::Drift);
        let third = t.read(&mut rng, ());
        assert_eq!(third.branch, TemperatureBranch::Forced);
        assert!(third.is_anomaly);
    }

    #[test]
    fn test_zero_threshold_always_forced() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut t = TemperatureSensor::new("bin", &cfg(0.0, 0));
        for _ in 0..10 {
            assert_eq!(t.read(&mut rng, ()).branch, TemperatureBranch::Forced);
        }
    }

    #[test]
    fn test_drift_relaxes_toward_base() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut c = cfg(0.0, 1_000);
        c.normal_fluctuation = 0.0;
        let mut t = TemperatureSensor::new("bin", &c);
        t.set_temperature(32.0);
        let r = t.read(&mut rng, ());
        assert_eq!(r.value, 30.0);
    }
}
