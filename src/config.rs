//! Session configuration.
//!
//! Layering: built-in defaults, then a JSON file at `$ECOBIN_CONFIG`, then
//! individual env overrides. Read once at start-up.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::catalog::{MaterialCatalog, RedemptionCatalog};
use crate::sensors::recyclable::validate_detection_weights;
use crate::telemetry::retry::RetryConfig;
use crate::telemetry::SinkKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub initial_latitude: f64,
    pub initial_longitude: f64,
    pub movement_range: f64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        // Singapore
        Self {
            initial_latitude: 1.3521,
            initial_longitude: 103.8198,
            movement_range: 0.0001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub base_temperature: f64,
    pub normal_fluctuation: f64,
    pub anomaly_threshold_high: f64,
    pub anomaly_threshold_low: f64,
    pub anomaly_probability: f64,
    pub normal_readings_before_anomaly: u32,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            base_temperature: 22.0,
            normal_fluctuation: 2.0,
            anomaly_threshold_high: 50.0,
            anomaly_threshold_low: 0.0,
            anomaly_probability: 0.05,
            normal_readings_before_anomaly: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FillLevelConfig {
    pub initial_level: f64,
    pub fill_rate: f64,
    pub fill_rate_variation: f64,
    pub capacity: f64,
    pub overflow_threshold: f64,
}

impl Default for FillLevelConfig {
    fn default() -> Self {
        Self {
            initial_level: 1.0,
            fill_rate: 5.0,
            fill_rate_variation: 0.1,
            capacity: 100.0,
            overflow_threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OdorConfig {
    pub odor_threshold: f64,
    pub fill_level_correlation: f64,
    pub odor_variation: f64,
}

impl Default for OdorConfig {
    fn default() -> Self {
        Self {
            odor_threshold: 0.6,
            fill_level_correlation: 0.7,
            odor_variation: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumidityConfig {
    pub base_humidity: f64,
    pub humidity_variation: f64,
    pub high_humidity_threshold: f64,
    pub mold_risk_threshold: f64,
    pub fill_level_correlation: f64,
}

impl Default for HumidityConfig {
    fn default() -> Self {
        Self {
            base_humidity: 50.0,
            humidity_variation: 5.0,
            high_humidity_threshold: 75.0,
            mold_risk_threshold: 80.0,
            fill_level_correlation: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AirQualityConfig {
    pub base_aqi: f64,
    pub aqi_variation: f64,
    pub fill_level_correlation: f64,
    pub temperature_correlation: f64,
}

impl Default for AirQualityConfig {
    fn default() -> Self {
        Self {
            base_aqi: 50.0,
            aqi_variation: 10.0,
            fill_level_correlation: 0.7,
            temperature_correlation: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecyclableConfig {
    /// Material -> probability; must sum to 1 within 0.01.
    pub detection_weights: BTreeMap<String, f64>,
    pub miss_probability: f64,
}

impl Default for RecyclableConfig {
    fn default() -> Self {
        let detection_weights = [
            ("paper", 0.3),
            ("plastic", 0.4),
            ("metal", 0.15),
            ("glass", 0.1),
            ("e-waste", 0.05),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
        Self {
            detection_weights,
            miss_probability: 0.1,
        }
    }
}

/// Optional sensors. GPS, temperature and the detector always run.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ActiveSensors {
    pub fill_level: bool,
    pub odor: bool,
    pub humidity: bool,
    pub air_quality: bool,
}

impl Default for ActiveSensors {
    fn default() -> Self {
        Self {
            fill_level: true,
            odor: true,
            humidity: true,
            air_quality: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sink: SinkKind,
    /// Hub host, e.g. `https://myhub.azure-devices.net`.
    pub endpoint: Option<String>,
    /// Base64 shared access key.
    pub device_key: Option<String>,
    pub sqlite_path: String,
    pub sas_ttl_secs: u64,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub circuit_threshold: u32,
    pub cooldown_ticks: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Log,
            endpoint: None,
            device_key: None,
            sqlite_path: "./telemetry.sqlite".to_string(),
            sas_ttl_secs: 3600,
            request_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            circuit_threshold: 5,
            cooldown_ticks: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// `None` draws `waste-bin-NNNN` from the session rng.
    pub device_id: Option<String>,
    pub tick_secs: u64,
    /// `None` runs until shutdown.
    pub max_ticks: Option<u64>,
    pub seed: Option<u64>,
    pub users: Vec<String>,
    /// Simulate a redemption every N ticks; 0 disables.
    pub redeem_every: u64,
    pub gps: GpsConfig,
    pub temperature: TemperatureConfig,
    pub fill_level: FillLevelConfig,
    pub odor: OdorConfig,
    pub humidity: HumidityConfig,
    pub air_quality: AirQualityConfig,
    pub recyclable: RecyclableConfig,
    pub active: ActiveSensors,
    pub materials: MaterialCatalog,
    pub redemptions: RedemptionCatalog,
    pub telemetry: TelemetryConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            tick_secs: 2,
            max_ticks: Some(15),
            seed: None,
            users: vec![
                "John Smith".to_string(),
                "Maria Garcia".to_string(),
                "Ahmed Hassan".to_string(),
            ],
            redeem_every: 5,
            gps: GpsConfig::default(),
            temperature: TemperatureConfig::default(),
            fill_level: FillLevelConfig::default(),
            odor: OdorConfig::default(),
            humidity: HumidityConfig::default(),
            air_quality: AirQualityConfig::default(),
            recyclable: RecyclableConfig::default(),
            active: ActiveSensors::default(),
            materials: MaterialCatalog::default(),
            redemptions: RedemptionCatalog::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl SimConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("ECOBIN_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DEVICE_ID") {
            self.device_id = Some(v);
        }
        if let Some(v) = env_parse("TICK_SECS") {
            self.tick_secs = v;
        }
        if let Ok(v) = std::env::var("MAX_TICKS") {
            // "0" or "forever" runs until Ctrl-C
            self.max_ticks = v.parse().ok().filter(|n| *n > 0);
        }
        if let Some(v) = env_parse("SIM_SEED") {
            self.seed = Some(v);
        }
        if let Some(kind) = std::env::var("TELEMETRY_SINK").ok().and_then(|v| SinkKind::parse(&v)) {
            self.telemetry.sink = kind;
        }
        if let Ok(v) = std::env::var("TELEMETRY_ENDPOINT") {
            self.telemetry.endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("DEVICE_KEY") {
            self.telemetry.device_key = Some(v);
        }
        if let Ok(v) = std::env::var("TELEMETRY_DB") {
            self.telemetry.sqlite_path = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.materials.validate().context("material catalog")?;
        self.redemptions.validate().context("redemption catalog")?;
        validate_detection_weights(&self.recyclable, &self.materials).context("recyclable detector")?;

        if self.users.iter().all(|u| u.trim().is_empty()) {
            bail!("at least one user name is required");
        }
        if let Some(id) = &self.device_id {
            if id.trim().is_empty() {
                bail!("device id is empty");
            }
        }

        let fill = &self.fill_level;
        if !(fill.capacity.is_finite() && fill.capacity > 0.0) {
            bail!("fill capacity must be positive, got {}", fill.capacity);
        }
        if fill.overflow_threshold > fill.capacity {
            bail!(
                "overflow threshold {} exceeds capacity {}",
                fill.overflow_threshold,
                fill.capacity
            );
        }

        let t = &self.temperature;
        if !(0.0..=1.0).contains(&t.anomaly_probability) {
            bail!("anomaly probability {} outside [0, 1]", t.anomaly_probability);
        }
        if t.anomaly_threshold_low >= t.anomaly_threshold_high {
            bail!(
                "temperature thresholds inverted: low {} >= high {}",
                t.anomaly_threshold_low,
                t.anomaly_threshold_high
            );
        }
        if self.humidity.high_humidity_threshold > self.humidity.mold_risk_threshold {
            bail!("high humidity threshold above mold threshold");
        }

        let variations = [
            ("gps.movement_range", self.gps.movement_range),
            ("temperature.normal_fluctuation", t.normal_fluctuation),
            ("fill_level.fill_rate_variation", fill.fill_rate_variation),
            ("odor.odor_variation", self.odor.odor_variation),
            ("humidity.humidity_variation", self.humidity.humidity_variation),
            ("air_quality.aqi_variation", self.air_quality.aqi_variation),
        ];
        for (name, v) in variations {
            if !v.is_finite() || v < 0.0 {
                bail!("{} must be non-negative, got {}", name, v);
            }
        }

        if self.telemetry.sink == SinkKind::Http {
            if self.telemetry.endpoint.is_none() {
                bail!("http sink requires TELEMETRY_ENDPOINT");
            }
            if self.telemetry.device_key.is_none() {
                bail!("http sink requires DEVICE_KEY");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = SimConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.users.len(), 3);
        assert_eq!(cfg.max_ticks, Some(15));
        assert_eq!(cfg.temperature.normal_readings_before_anomaly, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: SimConfig = serde_json::from_str(
            r#"{"tick_secs": 1, "fill_level": {"fill_rate": 10.0}, "telemetry": {"sink": "sqlite"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.tick_secs, 1);
        assert_eq!(cfg.fill_level.fill_rate, 10.0);
        assert_eq!(cfg.fill_level.capacity, 100.0);
        assert_eq!(cfg.telemetry.sink, SinkKind::Sqlite);
        assert_eq!(cfg.redemptions.rate("voucher"), Some(0.10));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut cfg = SimConfig::default();
        cfg.recyclable.detection_weights.insert("paper".to_string(), 0.9);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_negative_variation_rejected() {
        let mut cfg = SimConfig::default();
        cfg.humidity.humidity_variation = -1.0;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("humidity_variation"));
    }

    #[test]
    fn test_http_sink_needs_credentials() {
        let mut cfg = SimConfig::default();
        cfg.telemetry.sink = SinkKind::Http;
        assert!(cfg.validate().is_err());
        cfg.telemetry.endpoint = Some("https://hub.example.net".to_string());
        cfg.telemetry.device_key = Some("c2VjcmV0".to_string());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, r#"{"device_id": "waste-bin-4242", "seed": 7}"#).unwrap();
        let cfg = SimConfig::from_file(&path).unwrap();
        assert_eq!(cfg.device_id.as_deref(), Some("waste-bin-4242"));
        assert_eq!(cfg.seed, Some(7));
        assert!(SimConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
