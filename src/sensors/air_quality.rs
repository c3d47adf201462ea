use rand::Rng;
use serde::Serialize;

use super::{clamp, fill_factor, jitter, round_to, Sensor, SensorIdentity, SensorKind};
use crate::config::AirQualityConfig;

const FILL_AQI_SPAN: f64 = 100.0;
const TEMP_AQI_SPAN: f64 = 50.0;
const TEMP_REFERENCE_C: f64 = 25.0;
const AQI_MAX: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    /// Ordered by upper bound; the last row catches everything above.
    const TABLE: [(f64, AqiCategory); 6] = [
        (50.0, AqiCategory::Good),
        (100.0, AqiCategory::Moderate),
        (150.0, AqiCategory::UnhealthySensitive),
        (200.0, AqiCategory::Unhealthy),
        (300.0, AqiCategory::VeryUnhealthy),
        (f64::INFINITY, AqiCategory::Hazardous),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "good",
            AqiCategory::Moderate => "moderate",
            AqiCategory::UnhealthySensitive => "unhealthy_sensitive",
            AqiCategory::Unhealthy => "unhealthy",
            AqiCategory::VeryUnhealthy => "very_unhealthy",
            AqiCategory::Hazardous => "hazardous",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            AqiCategory::Good => "green",
            AqiCategory::Moderate => "yellow",
            AqiCategory::UnhealthySensitive => "orange",
            AqiCategory::Unhealthy => "red",
            AqiCategory::VeryUnhealthy => "purple",
            AqiCategory::Hazardous => "maroon",
        }
    }
}

pub fn category_for_aqi(aqi: f64) -> AqiCategory {
    if aqi.is_nan() {
        return AqiCategory::Good;
    }
    AqiCategory::TABLE
        .iter()
        .find(|(upper, _)| aqi <= *upper)
        .map(|(_, cat)| *cat)
        .unwrap_or(AqiCategory::Hazardous)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirQualityReading {
    pub aqi: f64,
    pub category: AqiCategory,
    pub color: &'static str,
    /// ppm
    pub co2: f64,
    /// ppm
    pub voc: f64,
    /// µg/m³
    pub pm25: f64,
}

impl AirQualityReading {
    fn from_aqi(aqi: f64) -> Self {
        let category = category_for_aqi(aqi);
        Self {
            aqi,
            category,
            color: category.color(),
            co2: round_to(400.0 + aqi * 2.0, 2),
            voc: round_to(0.5 + aqi * 0.01, 2),
            pm25: round_to(12.0 + aqi * 0.24, 2),
        }
    }
}

pub struct AirQualitySensor {
    identity: SensorIdentity,
    cfg: AirQualityConfig,
    current: f64,
}

/// Fill level (%) and temperature (°C), each optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct AirQualityInput {
    pub fill_pct: Option<f64>,
    pub temperature_c: Option<f64>,
}

impl AirQualitySensor {
    pub fn new(device_id: &str, cfg: &AirQualityConfig) -> Self {
        Self {
            identity: SensorIdentity::new(device_id, SensorKind::AirQuality),
            current: clamp(cfg.base_aqi, 0.0, AQI_MAX),
            cfg: cfg.clone(),
        }
    }

    pub fn set_aqi(&mut self, aqi: f64) {
        self.current = clamp(aqi, 0.0, AQI_MAX);
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn temperature_factor(&self, temperature_c: f64) -> f64 {
        if !temperature_c.is_finite() {
            return 0.0;
        }
        ((temperature_c - TEMP_REFERENCE_C) / TEMP_REFERENCE_C).max(0.0) * self.cfg.temperature_correlation
    }
}

impl Sensor for AirQualitySensor {
    type Input<'a> = AirQualityInput;
    type Output = AirQualityReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, input: AirQualityInput) -> AirQualityReading {
        let mut base = self.cfg.base_aqi;
        if let Some(pct) = input.fill_pct {
            base += fill_factor(pct, self.cfg.fill_level_correlation) * FILL_AQI_SPAN;
        }
        if let Some(temp) = input.temperature_c {
            base += self.temperature_factor(temp) * TEMP_AQI_SPAN;
        }
        self.current = clamp(base + jitter(rng, self.cfg.aqi_variation), 0.0, AQI_MAX);
        AirQualityReading::from_aqi(round_to(self.current, 2))
    }
}
