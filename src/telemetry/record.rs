//! Flattened device-to-cloud record.
//!
//! Keys are camelCase. Fill / odor / humidity / air-quality groups are
//! present only when the corresponding sensor produced a reading.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::pipeline::CompositeReading;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillFields {
    pub fill_level: f64,
    pub fill_level_unit: &'static str,
    pub fill_level_status: &'static str,
    pub is_full: bool,
    pub is_overflowing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdorFields {
    pub odor_type: &'static str,
    pub odor_intensity: f64,
    pub odor_unit: &'static str,
    pub is_significant_odor: bool,
    pub odor_status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HumidityFields {
    pub humidity: f64,
    pub humidity_unit: &'static str,
    pub is_high_humidity: bool,
    pub is_mold_risk: bool,
    pub mold_risk_percentage: f64,
    pub humidity_status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityFields {
    pub aqi: f64,
    pub aqi_category: &'static str,
    pub aqi_color: &'static str,
    pub co2: f64,
    pub co2_unit: &'static str,
    pub voc: f64,
    pub voc_unit: &'static str,
    pub pm25: f64,
    pub pm25_unit: &'static str,
    pub air_quality_status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_balance: Option<f64>,

    pub latitude: f64,
    pub longitude: f64,
    pub location: Location,

    pub temperature: f64,
    pub temperature_unit: &'static str,
    pub temperature_anomaly: bool,
    pub temperature_anomaly_type: &'static str,

    pub material_detected: bool,
    pub material_type: Option<String>,
    pub material_subtype: Option<String>,
    pub material_weight: Option<f64>,
    pub material_weight_unit: &'static str,
    pub tokens_awarded: f64,

    #[serde(flatten)]
    pub fill: Option<FillFields>,
    #[serde(flatten)]
    pub odor: Option<OdorFields>,
    #[serde(flatten)]
    pub humidity: Option<HumidityFields>,
    #[serde(flatten)]
    pub air_quality: Option<AirQualityFields>,
}

impl TelemetryRecord {
    pub fn from_reading(r: &CompositeReading) -> Self {
        let gps = r.gps();
        let temp = r.temperature();
        let rec = r.recyclable();
        let detection = rec.detection.as_ref();

        Self {
            device_id: r.device_id().to_string(),
            timestamp: r.timestamp().to_string(),
            user_id: r.user_id().map(str::to_string),
            user_name: r.user_name().map(str::to_string),
            token_balance: r.token_balance(),
            latitude: gps.latitude,
            longitude: gps.longitude,
            location: Location {
                lat: gps.latitude,
                lon: gps.longitude,
                alt: gps.altitude_m,
                accuracy: gps.accuracy_m,
            },
            temperature: temp.value,
            temperature_unit: temp.unit,
            temperature_anomaly: temp.is_anomaly,
            temperature_anomaly_type: temp.anomaly_type.as_str(),
            material_detected: detection.is_some(),
            material_type: detection.map(|d| d.material.clone()),
            material_subtype: detection.map(|d| d.subtype.clone()),
            material_weight: detection.map(|d| d.weight_kg),
            material_weight_unit: "kg",
            tokens_awarded: rec.tokens_awarded,
            fill: r.fill_level().map(|f| FillFields {
                fill_level: f.level,
                fill_level_unit: "percent",
                fill_level_status: f.status.as_str(),
                is_full: f.is_full,
                is_overflowing: f.is_overflowing,
            }),
            odor: r.odor().map(|o| OdorFields {
                odor_type: o.odor_type.as_str(),
                odor_intensity: o.intensity,
                odor_unit: "normalized",
                is_significant_odor: o.is_significant,
                odor_status: o.status(),
            }),
            humidity: r.humidity().map(|h| HumidityFields {
                humidity: h.value,
                humidity_unit: "percent",
                is_high_humidity: h.is_high,
                is_mold_risk: h.is_mold_risk,
                mold_risk_percentage: h.mold_risk_pct,
                humidity_status: h.status.as_str(),
            }),
            air_quality: r.air_quality().map(|a| AirQualityFields {
                aqi: a.aqi,
                aqi_category: a.category.as_str(),
                aqi_color: a.color,
                co2: a.co2,
                co2_unit: "ppm",
                voc: a.voc,
                voc_unit: "ppm",
                pm25: a.pm25,
                pm25_unit: "µg/m³",
                air_quality_status: a.category.as_str(),
            }),
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::pipeline::CorrelationPipeline;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Arc;

    fn reading(cfg: &SimConfig) -> CompositeReading {
        let mut p = CorrelationPipeline::new("waste-bin-7777", cfg, Arc::new(cfg.materials.clone())).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        p.tick(&mut rng, 0, None, None)
    }

    #[test]
    fn test_keys_are_camel_case_and_flat() {
        let record = TelemetryRecord::from_reading(&reading(&SimConfig::default()));
        let map = record.to_map();
        for key in [
            "deviceId",
            "timestamp",
            "temperatureAnomalyType",
            "materialDetected",
            "tokensAwarded",
            "fillLevelStatus",
            "isSignificantOdor",
            "moldRiskPercentage",
            "aqiCategory",
            "pm25Unit",
        ] {
            assert!(map.contains_key(key), "missing {}", key);
        }
        assert!(!map.contains_key("fill"));
        assert!(!map.contains_key("userId"));
        assert_eq!(map["location"]["accuracy"], 5.0);
    }

    #[test]
    fn test_inactive_groups_omitted() {
        let mut cfg = SimConfig::default();
        cfg.active.humidity = false;
        cfg.active.air_quality = false;
        let map = TelemetryRecord::from_reading(&reading(&cfg)).to_map();
        assert!(!map.contains_key("humidity"));
        assert!(!map.contains_key("aqi"));
        assert!(map.contains_key("fillLevel"));
        assert!(map.contains_key("odorType"));
    }
}
