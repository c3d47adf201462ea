use rand::Rng;
use serde::Serialize;

use super::{clamp, jitter, round_to, Sensor, SensorIdentity, SensorKind};
use crate::config::GpsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsReading {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub accuracy_m: f64,
}

/// Random-walk position, clamped to valid coordinates.
pub struct GpsSensor {
    identity: SensorIdentity,
    latitude: f64,
    longitude: f64,
    movement_range: f64,
}

impl GpsSensor {
    pub fn new(device_id: &str, cfg: &GpsConfig) -> Self {
        Self {
            identity: SensorIdentity::new(device_id, SensorKind::Gps),
            latitude: clamp(cfg.initial_latitude, -90.0, 90.0),
            longitude: clamp(cfg.initial_longitude, -180.0, 180.0),
            movement_range: cfg.movement_range,
        }
    }

    pub fn set_position(&mut self, latitude: f64, longitude: f64) {
        self.latitude = clamp(latitude, -90.0, 90.0);
        self.longitude = clamp(longitude, -180.0, 180.0);
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

impl Sensor for GpsSensor {
    type Input<'a> = ();
    type Output = GpsReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, _input: ()) -> GpsReading {
        self.latitude = clamp(self.latitude + jitter(rng, self.movement_range), -90.0, 90.0);
        self.longitude = clamp(self.longitude + jitter(rng, self.movement_range), -180.0, 180.0);
        GpsReading {
            latitude: round_to(self.latitude, 6),
            longitude: round_to(self.longitude, 6),
            altitude_m: 0.0,
            accuracy_m: 5.0,
        }
    }
}
