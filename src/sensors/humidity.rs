use rand::Rng;
use serde::Serialize;

use super::{clamp, fill_factor, jitter, round_to, Sensor, SensorIdentity, SensorKind};
use crate::config::HumidityConfig;

/// Humidity rise at a full bin with correlation 1.0, in %RH.
const FILL_HUMIDITY_SPAN: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HumidityStatus {
    Normal,
    High,
    MoldRisk,
}

impl HumidityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HumidityStatus::Normal => "normal",
            HumidityStatus::High => "high",
            HumidityStatus::MoldRisk => "mold_risk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HumidityReading {
    pub value: f64,
    pub is_high: bool,
    pub is_mold_risk: bool,
    pub mold_risk_pct: f64,
    pub status: HumidityStatus,
}

pub struct HumiditySensor {
    identity: SensorIdentity,
    cfg: HumidityConfig,
    current: f64,
}

impl HumiditySensor {
    pub fn new(device_id: &str, cfg: &HumidityConfig) -> Self {
        Self {
            identity: SensorIdentity::new(device_id, SensorKind::Humidity),
            current: clamp(cfg.base_humidity, 0.0, 100.0),
            cfg: cfg.clone(),
        }
    }

    pub fn set_humidity(&mut self, value: f64) {
        self.current = clamp(value, 0.0, 100.0);
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Linear 0..100 between the mold threshold and saturation.
    pub fn mold_risk_pct(&self, humidity: f64) -> f64 {
        let threshold = self.cfg.mold_risk_threshold;
        if humidity <= threshold || threshold >= 100.0 {
            return 0.0;
        }
        ((humidity - threshold) / (100.0 - threshold) * 100.0).min(100.0)
    }
}

impl Sensor for HumiditySensor {
    /// Current fill level in percent, if the fill sensor is active.
    type Input<'a> = Option<f64>;
    type Output = HumidityReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, fill: Option<f64>) -> HumidityReading {
        let base = match fill {
            Some(pct) => {
                self.cfg.base_humidity + fill_factor(pct, self.cfg.fill_level_correlation) * FILL_HUMIDITY_SPAN
            }
            None => self.cfg.base_humidity,
        };
        self.current = clamp(base + jitter(rng, self.cfg.humidity_variation), 0.0, 100.0);

        let humidity = self.current;
        let is_high = humidity > self.cfg.high_humidity_threshold;
        let is_mold_risk = humidity > self.cfg.mold_risk_threshold;
        let status = if is_mold_risk {
            HumidityStatus::MoldRisk
        } else if is_high {
            HumidityStatus::High
        } else {
            HumidityStatus::Normal
        };
        HumidityReading {
            value: round_to(humidity, 2),
            is_high,
            is_mold_risk,
            mold_risk_pct: round_to(self.mold_risk_pct(humidity), 2),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn cfg(variation: f64) -> HumidityConfig {
        HumidityConfig {
            base_humidity: 50.0,
            humidity_variation: variation,
            high_humidity_threshold: 75.0,
            mold_risk_threshold: 80.0,
            fill_level_correlation: 0.6,
        }
    }

    #[test]
    fn test_fill_raises_humidity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = HumiditySensor::new("bin", &cfg(0.0));
        assert_eq!(s.read(&mut rng, None).value, 50.0);
        assert_eq!(s.read(&mut rng, Some(0.0)).value, 50.0);
        // 50 + 1.0 * 0.6 * 30
        assert_eq!(s.read(&mut rng, Some(100.0)).value, 68.0);
    }

    #[test]
    fn test_bounds_hold_with_large_variation() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut s = HumiditySensor::new("bin", &cfg(80.0));
        for i in 0..500 {
            let r = s.read(&mut rng, Some((i % 101) as f64));
            assert!((0.0..=100.0).contains(&r.value));
            assert!((0.0..=100.0).contains(&r.mold_risk_pct));
        }
    }

    #[test]
    fn test_mold_risk_scaling() {
        let s = HumiditySensor::new("bin", &cfg(0.0));
        assert_eq!(s.mold_risk_pct(80.0), 0.0);
        assert_eq!(s.mold_risk_pct(90.0), 50.0);
        assert_eq!(s.mold_risk_pct(100.0), 100.0);
    }

    #[test]
    fn test_status_mold_beats_high() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut c = cfg(0.0);
        c.base_humidity = 85.0;
        let mut s = HumiditySensor::new("bin", &c);
        let r = s.read(&mut rng, None);
        assert!(r.is_high && r.is_mold_risk);
        assert_eq!(r.status, HumidityStatus::MoldRisk);
        assert_eq!(r.mold_risk_pct, 25.0);
    }

    #[test]
    fn test_setter_clamps() {
        let mut s = HumiditySensor::new("bin", &cfg(0.0));
        s.set_humidity(140.0);
        assert_eq!(s.current(), 100.0);
        s.set_humidity(-1.0);
        assert_eq!(s.current(), 0.0);
    }
}
