//! Simulated bin sensors.
//!
//! Each generator owns its own mutable state and is read through the
//! [`Sensor`] trait. Inputs from other sensors (fill level, temperature,
//! the acting user) are passed explicitly per read; no generator looks at
//! another generator's state.

pub mod air_quality;
pub mod fill_level;
pub mod gps;
pub mod humidity;
pub mod odor;
pub mod recyclable;
pub mod temperature;

use rand::Rng;
use serde::Serialize;

pub use air_quality::{AirQualityInput, AirQualityReading, AirQualitySensor, AqiCategory};
pub use fill_level::{FillLevelReading, FillLevelSensor, FillStatus};
pub use gps::{GpsReading, GpsSensor};
pub use humidity::{HumidityReading, HumiditySensor, HumidityStatus};
pub use odor::{OdorReading, OdorSensor, OdorType};
pub use recyclable::{Deposit, Detection, RecyclableReading, RecyclableSensor};
pub use temperature::{AnomalyType, TemperatureBranch, TemperatureReading, TemperatureSensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Gps,
    Temperature,
    FillLevel,
    Odor,
    Humidity,
    AirQuality,
    Recyclable,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Gps => "gps",
            SensorKind::Temperature => "temperature",
            SensorKind::FillLevel => "fill_level",
            SensorKind::Odor => "odor",
            SensorKind::Humidity => "humidity",
            SensorKind::AirQuality => "air_quality",
            SensorKind::Recyclable => "recyclable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorIdentity {
    pub sensor_id: String,
    pub device_id: String,
    pub kind: SensorKind,
}

impl SensorIdentity {
    pub fn new(device_id: &str, kind: SensorKind) -> Self {
        Self {
            sensor_id: format!("{}-{}", device_id, kind.as_str()),
            device_id: device_id.to_string(),
            kind,
        }
    }
}

/// A generator that produces one reading per call.
///
/// `Input` carries whatever the pipeline must thread in from other
/// sensors; independent generators use `()`.
pub trait Sensor {
    type Input<'a>
    where
        Self: 'a;
    type Output;

    fn identity(&self) -> &SensorIdentity;

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, input: Self::Input<'a>) -> Self::Output;
}

/// Uniform draw in [-magnitude, magnitude]; zero for non-positive magnitude.
pub(crate) fn jitter<R: Rng + ?Sized>(rng: &mut R, magnitude: f64) -> f64 {
    if magnitude > 0.0 && magnitude.is_finite() {
        rng.gen_range(-magnitude..=magnitude)
    } else {
        0.0
    }
}

/// Uniform draw in [lo, hi]; `lo` when the range is empty.
pub(crate) fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

/// `min(fill / 100, 1) × correlation`, floored at zero.
pub fn fill_factor(fill_pct: f64, correlation: f64) -> f64 {
    if !fill_pct.is_finite() {
        return 0.0;
    }
    (fill_pct / 100.0).clamp(0.0, 1.0) * correlation
}

pub(crate) fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
