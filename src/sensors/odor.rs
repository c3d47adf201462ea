//! Odor generator.
//!
//! The odor category is a weighted draw whose weight vector depends on the
//! fill-factor bucket; fuller bins skew toward organic and chemical odors.
//! Intensity is drawn from the category's range, jittered, and clamped.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::Serialize;

use super::{clamp, fill_factor, jitter, round_to, uniform, Sensor, SensorIdentity, SensorKind};
use crate::config::OdorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OdorType {
    Organic,
    Chemical,
    Mold,
    None,
}

impl OdorType {
    pub const ALL: [OdorType; 4] = [OdorType::Organic, OdorType::Chemical, OdorType::Mold, OdorType::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            OdorType::Organic => "organic",
            OdorType::Chemical => "chemical",
            OdorType::Mold => "mold",
            OdorType::None => "none",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OdorType::Organic => "Decomposing organic waste",
            OdorType::Chemical => "Chemical waste or cleaning products",
            OdorType::Mold => "Mold or mildew growth",
            OdorType::None => "No significant odor",
        }
    }

    pub fn intensity_range(&self) -> (f64, f64) {
        match self {
            OdorType::Organic => (0.1, 1.0),
            OdorType::Chemical => (0.3, 0.9),
            OdorType::Mold => (0.2, 0.7),
            OdorType::None => (0.0, 0.1),
        }
    }
}

/// Weights in [`OdorType::ALL`] order.
pub fn weights_for(fill_factor: Option<f64>) -> [f64; 4] {
    match fill_factor {
        Some(f) if f > 0.8 => [0.5, 0.3, 0.15, 0.05],
        Some(f) if f > 0.5 => [0.3, 0.2, 0.3, 0.2],
        Some(f) if f > 0.2 => [0.1, 0.2, 0.2, 0.5],
        Some(_) => [0.05, 0.1, 0.1, 0.75],
        None => [0.3, 0.2, 0.2, 0.3],
    }
}

/// Draw an odor category for the given fill factor.
pub fn select_odor_type<R: Rng + ?Sized>(rng: &mut R, fill_factor: Option<f64>) -> OdorType {
    match WeightedIndex::new(weights_for(fill_factor)) {
        Ok(dist) => OdorType::ALL[dist.sample(rng)],
        Err(_) => OdorType::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OdorReading {
    pub odor_type: OdorType,
    pub description: &'static str,
    pub intensity: f64,
    pub is_significant: bool,
}

impl OdorReading {
    pub fn status(&self) -> &'static str {
        if self.is_significant {
            "significant"
        } else {
            "normal"
        }
    }
}

pub struct OdorSensor {
    identity: SensorIdentity,
    cfg: OdorConfig,
    current_type: OdorType,
    current_intensity: f64,
}

impl OdorSensor {
    pub fn new(device_id: &str, cfg: &OdorConfig) -> Self {
        Self {
            identity: SensorIdentity::new(device_id, SensorKind::Odor),
            cfg: cfg.clone(),
            current_type: OdorType::None,
            current_intensity: 0.0,
        }
    }

    pub fn set_odor(&mut self, odor_type: OdorType, intensity: f64) {
        self.current_type = odor_type;
        self.current_intensity = clamp(intensity, 0.0, 1.0);
    }

    pub fn current(&self) -> (OdorType, f64) {
        (self.current_type, self.current_intensity)
    }
}

impl Sensor for OdorSensor {
    /// Current fill level in percent, if the fill sensor is active.
    type Input<'a> = Option<f64>;
    type Output = OdorReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, fill: Option<f64>) -> OdorReading {
        let factor = fill.map(|pct| fill_factor(pct, self.cfg.fill_level_correlation));
        let odor_type = select_odor_type(rng, factor);
        let (lo, hi) = odor_type.intensity_range();
        let intensity = clamp(uniform(rng, lo, hi) + jitter(rng, self.cfg.odor_variation), 0.0, 1.0);

        self.current_type = odor_type;
        self.current_intensity = intensity;

        OdorReading {
            odor_type,
            description: odor_type.description(),
            intensity: round_to(intensity, 3),
            is_significant: intensity > self.cfg.odor_threshold,
        }
    }
}
