//! Recyclable detector.
//!
//! Each read either misses (no item) or detects one item: a weighted
//! material draw, a uniform subtype, and a uniform weight from the
//! material's range. When the caller passes a user and a ledger the
//! detection is credited immediately; a ledger refusal is logged and
//! reported as zero tokens, never as a failed read.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use super::{round_to, uniform, Sensor, SensorIdentity, SensorKind};
use crate::catalog::MaterialCatalog;
use crate::config::RecyclableConfig;
use crate::ledger::TokenLedger;
use crate::logging::{log_award, log_rejection};

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub material: String,
    pub subtype: String,
    pub weight_kg: f64,
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecyclableReading {
    pub detection: Option<Detection>,
    pub tokens_awarded: f64,
    pub user_id: Option<String>,
}

/// Who gets credited for this read, and where.
pub struct Deposit<'a> {
    pub user: Option<&'a str>,
    pub ledger: Option<&'a mut TokenLedger>,
    pub timestamp: &'a str,
}

impl<'a> Deposit<'a> {
    /// Detection only; nobody is credited.
    pub fn anonymous(timestamp: &'a str) -> Self {
        Self {
            user: None,
            ledger: None,
            timestamp,
        }
    }
}

pub struct RecyclableSensor {
    identity: SensorIdentity,
    catalog: Arc<MaterialCatalog>,
    materials: Vec<String>,
    picker: WeightedIndex<f64>,
    miss_probability: f64,
}

/// Weights must be non-negative, name catalog materials, and sum to 1.
pub fn validate_detection_weights(cfg: &RecyclableConfig, catalog: &MaterialCatalog) -> Result<()> {
    if cfg.detection_weights.is_empty() {
        bail!("detection weights are empty");
    }
    let mut sum = 0.0;
    for (material, weight) in &cfg.detection_weights {
        if !catalog.contains(material) {
            bail!("detection weight for unknown material {}", material);
        }
        if !weight.is_finite() || *weight < 0.0 {
            bail!("detection weight for {} is invalid: {}", material, weight);
        }
        sum += weight;
    }
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        bail!("detection weights sum to {:.4}, expected 1.0", sum);
    }
    if !(0.0..=1.0).contains(&cfg.miss_probability) {
        bail!("miss probability {} outside [0, 1]", cfg.miss_probability);
    }
    Ok(())
}

impl RecyclableSensor {
    pub fn new(device_id: &str, cfg: &RecyclableConfig, catalog: Arc<MaterialCatalog>) -> Result<Self> {
        validate_detection_weights(cfg, &catalog)?;
        let materials: Vec<String> = cfg.detection_weights.keys().cloned().collect();
        let picker = WeightedIndex::new(cfg.detection_weights.values().copied())
            .map_err(|e| anyhow!("detection weights: {}", e))?;
        Ok(Self {
            identity: SensorIdentity::new(device_id, SensorKind::Recyclable),
            catalog,
            materials,
            picker,
            miss_probability: cfg.miss_probability,
        })
    }

    pub fn catalog(&self) -> &Arc<MaterialCatalog> {
        &self.catalog
    }

    fn detect<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Detection> {
        if rng.gen_bool(self.miss_probability) {
            return None;
        }
        let material = &self.materials[self.picker.sample(rng)];
        let entry = self.catalog.get(material)?;
        let subtype = entry.subtypes.choose(rng)?;
        let (lo, hi) = entry.weight_range;
        Some(Detection {
            material: material.clone(),
            subtype: subtype.clone(),
            weight_kg: round_to(uniform(rng, lo, hi), 3),
            density: entry.density,
        })
    }
}

impl Sensor for RecyclableSensor {
    type Input<'a> = Deposit<'a>;
    type Output = RecyclableReading;

    fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    fn read<'a, R: Rng + ?Sized>(&'a mut self, rng: &mut R, deposit: Deposit<'a>) -> RecyclableReading {
        let detection = self.detect(rng);
        let user_id = deposit.user.map(str::to_string);

        let tokens_awarded = match (&detection, deposit.user, deposit.ledger) {
            (Some(d), Some(user), Some(ledger)) => {
                match ledger.award_tokens(user, &d.material, &d.subtype, d.weight_kg, deposit.timestamp) {
                    Ok(tokens) => {
                        log_award(user, &d.material, &d.subtype, d.weight_kg, tokens.as_f64());
                        tokens.as_f64()
                    }
                    Err(e) => {
                        log_rejection("award", user, &e.to_string());
                        0.0
                    }
                }
            }
            _ => 0.0,
        };

        RecyclableReading {
            detection,
            tokens_awarded,
            user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RedemptionCatalog;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::BTreeMap;

    fn weights(pairs: &[(&str, f64)]) -> RecyclableConfig {
        RecyclableConfig {
            detection_weights: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect::<BTreeMap<_, _>>(),
            miss_probability: 0.1,
        }
    }

    fn sensor(cfg: &RecyclableConfig) -> RecyclableSensor {
        RecyclableSensor::new("bin", cfg, Arc::new(MaterialCatalog::default())).unwrap()
    }

    #[test]
    fn test_rejects_bad_weights() {
        let catalog = Arc::new(MaterialCatalog::default());
        assert!(RecyclableSensor::new("bin", &weights(&[("paper", 0.5)]), catalog.clone()).is_err());
        assert!(RecyclableSensor::new("bin", &weights(&[("paper", 0.5), ("wood", 0.5)]), catalog.clone()).is_err());
        assert!(RecyclableSensor::new("bin", &weights(&[("paper", 1.5), ("glass", -0.5)]), catalog.clone()).is_err());
        assert!(RecyclableSensor::new("bin", &weights(&[("paper", 0.995)]), catalog).is_ok());
    }

    #[test]
    fn test_detection_within_catalog() {
        let mut rng = StdRng::seed_from_u64(4);
        let cfg = RecyclableConfig::default();
        let mut s = sensor(&cfg);
        let catalog = MaterialCatalog::default();
        let mut misses = 0;
        for _ in 0..2_000 {
            let r = s.read(&mut rng, Deposit::anonymous("t"));
            assert_eq!(r.tokens_awarded, 0.0);
            match r.detection {
                Some(d) => {
                    let entry = catalog.get(&d.material).unwrap();
                    assert!(entry.subtypes.contains(&d.subtype));
                    assert!(d.weight_kg >= entry.weight_range.0 && d.weight_kg <= entry.weight_range.1);
                }
                None => misses += 1,
            }
        }
        assert!(misses > 120 && misses < 290, "misses {}", misses);
    }

    #[test]
    fn test_single_material_always_chosen() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut s = sensor(&weights(&[("metal", 1.0)]));
        for _ in 0..100 {
            if let Some(d) = s.read(&mut rng, Deposit::anonymous("t")).detection {
                assert_eq!(d.material, "metal");
            }
        }
    }

    #[test]
    fn test_award_credits_user() {
        let mut rng = StdRng::seed_from_u64(12);
        let catalog = Arc::new(MaterialCatalog::default());
        let mut ledger = TokenLedger::new(catalog.clone(), RedemptionCatalog::default());
        let user = ledger.register_user("Maria Garcia").unwrap().user_id().to_string();
        let mut cfg = weights(&[("e-waste", 1.0)]);
        cfg.miss_probability = 0.0;
        let mut s = RecyclableSensor::new("bin", &cfg, catalog).unwrap();

        let mut total = 0.0;
        for _ in 0..10 {
            let r = s.read(
                &mut rng,
                Deposit {
                    user: Some(&user),
                    ledger: Some(&mut ledger),
                    timestamp: "2024-01-01T00:00:00Z",
                },
            );
            let d = r.detection.unwrap();
            assert!((r.tokens_awarded - (d.weight_kg * 5.0 * 100.0).round() / 100.0).abs() < 1e-9);
            assert_eq!(r.user_id.as_deref(), Some(user.as_str()));
            total += r.tokens_awarded;
        }
        let balance = ledger.balance(&user).unwrap().as_f64();
        assert!((balance - total).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_user_yields_zero_tokens() {
        let mut rng = StdRng::seed_from_u64(13);
        let catalog = Arc::new(MaterialCatalog::default());
        let mut ledger = TokenLedger::new(catalog.clone(), RedemptionCatalog::default());
        let mut cfg = weights(&[("paper", 1.0)]);
        cfg.miss_probability = 0.0;
        let mut s = RecyclableSensor::new("bin", &cfg, catalog).unwrap();
        let r = s.read(
            &mut rng,
            Deposit {
                user: Some("U9999"),
                ledger: Some(&mut ledger),
                timestamp: "t",
            },
        );
        assert!(r.detection.is_some());
        assert_eq!(r.tokens_awarded, 0.0);
        assert!(ledger.journal().is_empty());
    }
}
