//! Correlation pipeline.
//!
//! Read order per tick: GPS, temperature, fill level, then odor / humidity
//! / air quality fed with the fill level (air quality also with the
//! temperature), then the recyclable detector crediting the acting user.
//! The result is one immutable [`CompositeReading`].

use std::sync::Arc;

use anyhow::Result;
use rand::Rng;

use crate::catalog::MaterialCatalog;
use crate::config::SimConfig;
use crate::ledger::TokenLedger;
use crate::logging::{log_temperature_anomaly, ts_now};
use crate::sensors::{
    AirQualityInput, AirQualityReading, AirQualitySensor, Deposit, FillLevelReading, FillLevelSensor, GpsReading,
    GpsSensor, HumidityReading, HumiditySensor, OdorReading, OdorSensor, RecyclableReading, RecyclableSensor, Sensor,
    TemperatureReading, TemperatureSensor,
};

/// One tick's worth of readings. Built only by the pipeline.
#[derive(Debug, Clone)]
pub struct CompositeReading {
    tick: u64,
    device_id: String,
    timestamp: String,
    user_id: Option<String>,
    user_name: Option<String>,
    token_balance: Option<f64>,
    gps: GpsReading,
    temperature: TemperatureReading,
    fill_level: Option<FillLevelReading>,
    odor: Option<OdorReading>,
    humidity: Option<HumidityReading>,
    air_quality: Option<AirQualityReading>,
    recyclable: RecyclableReading,
}

impl CompositeReading {
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Balance after this tick's award.
    pub fn token_balance(&self) -> Option<f64> {
        self.token_balance
    }

    pub fn gps(&self) -> &GpsReading {
        &self.gps
    }

    pub fn temperature(&self) -> &TemperatureReading {
        &self.temperature
    }

    pub fn fill_level(&self) -> Option<&FillLevelReading> {
        self.fill_level.as_ref()
    }

    pub fn odor(&self) -> Option<&OdorReading> {
        self.odor.as_ref()
    }

    pub fn humidity(&self) -> Option<&HumidityReading> {
        self.humidity.as_ref()
    }

    pub fn air_quality(&self) -> Option<&AirQualityReading> {
        self.air_quality.as_ref()
    }

    pub fn recyclable(&self) -> &RecyclableReading {
        &self.recyclable
    }
}

pub struct CorrelationPipeline {
    device_id: String,
    gps: GpsSensor,
    temperature: TemperatureSensor,
    fill_level: Option<FillLevelSensor>,
    odor: Option<OdorSensor>,
    humidity: Option<HumiditySensor>,
    air_quality: Option<AirQualitySensor>,
    recyclable: RecyclableSensor,
}

impl CorrelationPipeline {
    pub fn new(device_id: &str, cfg: &SimConfig, materials: Arc<MaterialCatalog>) -> Result<Self> {
        let active = cfg.active;
        Ok(Self {
            device_id: device_id.to_string(),
            gps: GpsSensor::new(device_id, &cfg.gps),
            temperature: TemperatureSensor::new(device_id, &cfg.temperature),
            fill_level: active.fill_level.then(|| FillLevelSensor::new(device_id, &cfg.fill_level)),
            odor: active.odor.then(|| OdorSensor::new(device_id, &cfg.odor)),
            humidity: active.humidity.then(|| HumiditySensor::new(device_id, &cfg.humidity)),
            air_quality: active.air_quality.then(|| AirQualitySensor::new(device_id, &cfg.air_quality)),
            recyclable: RecyclableSensor::new(device_id, &cfg.recyclable, materials)?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn gps_mut(&mut self) -> &mut GpsSensor {
        &mut self.gps
    }

    pub fn temperature_mut(&mut self) -> &mut TemperatureSensor {
        &mut self.temperature
    }

    pub fn fill_level_mut(&mut self) -> Option<&mut FillLevelSensor> {
        self.fill_level.as_mut()
    }

    pub fn odor_mut(&mut self) -> Option<&mut OdorSensor> {
        self.odor.as_mut()
    }

    pub fn humidity_mut(&mut self) -> Option<&mut HumiditySensor> {
        self.humidity.as_mut()
    }

    pub fn air_quality_mut(&mut self) -> Option<&mut AirQualitySensor> {
        self.air_quality.as_mut()
    }

    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        tick: u64,
        user: Option<&str>,
        ledger: Option<&mut TokenLedger>,
    ) -> CompositeReading {
        self.tick_at(rng, tick, user, ledger, ts_now())
    }

    pub fn tick_at<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        tick: u64,
        user: Option<&str>,
        mut ledger: Option<&mut TokenLedger>,
        timestamp: String,
    ) -> CompositeReading {
        let gps = self.gps.read(rng, ());
        let temperature = self.temperature.read(rng, ());
        if temperature.is_anomaly {
            log_temperature_anomaly(
                tick,
                temperature.value,
                temperature.anomaly_type.as_str(),
                temperature.branch.as_str(),
            );
        }

        let fill_level = self.fill_level.as_mut().map(|s| s.read(rng, ()));
        let fill_pct = fill_level.map(|f| f.level);

        let odor = self.odor.as_mut().map(|s| s.read(rng, fill_pct));
        let humidity = self.humidity.as_mut().map(|s| s.read(rng, fill_pct));
        let air_quality = self.air_quality.as_mut().map(|s| {
            s.read(
                rng,
                AirQualityInput {
                    fill_pct,
                    temperature_c: Some(temperature.value),
                },
            )
        });

        let recyclable = self.recyclable.read(
            rng,
            Deposit {
                user,
                ledger: ledger.as_deref_mut(),
                timestamp: &timestamp,
            },
        );

        let account = match (user, ledger.as_deref()) {
            (Some(id), Some(l)) => l.account(id),
            _ => None,
        };

        CompositeReading {
            tick,
            device_id: self.device_id.clone(),
            user_id: user.map(str::to_string),
            user_name: account.map(|a| a.name().to_string()),
            token_balance: account.map(|a| a.balance().as_f64()),
            timestamp,
            gps,
            temperature,
            fill_level,
            odor,
            humidity,
            air_quality,
            recyclable,
        }
    }
}
