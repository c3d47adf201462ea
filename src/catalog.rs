//! Static material and redemption catalogs.
//!
//! Both are loaded once at session start and read-only afterwards. The
//! material catalog drives the recyclable detector (subtypes, weights)
//! and the ledger (token value per kg); the redemption catalog maps an
//! option name to reward units per token.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub subtypes: Vec<String>,
    /// Inclusive [min, max] in kg.
    pub weight_range: (f64, f64),
    /// Loose density, lb/yd³.
    pub density: f64,
    pub token_value_per_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialCatalog {
    entries: BTreeMap<String, MaterialEntry>,
}

impl MaterialCatalog {
    pub fn new(entries: BTreeMap<String, MaterialEntry>) -> Result<Self> {
        let catalog = Self { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn get(&self, material: &str) -> Option<&MaterialEntry> {
        self.entries.get(material)
    }

    pub fn contains(&self, material: &str) -> bool {
        self.entries.contains_key(material)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MaterialEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            bail!("material catalog is empty");
        }
        for (name, entry) in &self.entries {
            if name.trim().is_empty() {
                bail!("material catalog has an unnamed entry");
            }
            if entry.subtypes.is_empty() {
                bail!("material {} has no subtypes", name);
            }
            let (min, max) = entry.weight_range;
            if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
                bail!("material {} has invalid weight range [{}, {}]", name, min, max);
            }
            if !entry.token_value_per_kg.is_finite() || entry.token_value_per_kg < 0.0 {
                bail!("material {} has invalid token value {}", name, entry.token_value_per_kg);
            }
            if !entry.density.is_finite() || entry.density < 0.0 {
                bail!("material {} has invalid density {}", name, entry.density);
            }
        }
        Ok(())
    }
}

fn material(subtypes: &[&str], weight_range: (f64, f64), density: f64, value: f64) -> MaterialEntry {
    MaterialEntry {
        subtypes: subtypes.iter().map(|s| s.to_string()).collect(),
        weight_range,
        density,
        token_value_per_kg: value,
    }
}

impl Default for MaterialCatalog {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "paper".to_string(),
            material(&["newspaper", "cardboard", "magazine", "mixed paper"], (0.05, 2.0), 75.0, 1.0),
        );
        entries.insert(
            "plastic".to_string(),
            material(
                &["PET bottle", "HDPE container", "plastic bag", "plastic packaging"],
                (0.01, 0.5),
                35.0,
                2.0,
            ),
        );
        entries.insert(
            "metal".to_string(),
            material(&["aluminum can", "steel can", "metal lid", "foil"], (0.02, 0.5), 62.5, 3.0),
        );
        entries.insert(
            "glass".to_string(),
            material(&["clear bottle", "green bottle", "brown bottle", "glass jar"], (0.1, 1.0), 500.0, 1.5),
        );
        entries.insert(
            "e-waste".to_string(),
            material(&["battery", "small electronic", "cable", "charger"], (0.05, 2.0), 350.0, 5.0),
        );
        Self { entries }
    }
}

/// Option name -> reward units per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedemptionCatalog {
    rates: BTreeMap<String, f64>,
}

impl RedemptionCatalog {
    pub fn new(rates: BTreeMap<String, f64>) -> Result<Self> {
        let catalog = Self { rates };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn rate(&self, option: &str) -> Option<f64> {
        self.rates.get(option).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn validate(&self) -> Result<()> {
        if self.rates.is_empty() {
            bail!("redemption catalog is empty");
        }
        for (name, rate) in &self.rates {
            if !rate.is_finite() || *rate <= 0.0 {
                bail!("redemption option {} has invalid rate {}", name, rate);
            }
        }
        Ok(())
    }
}

impl Default for RedemptionCatalog {
    fn default() -> Self {
        let rates = [("cash", 0.05), ("voucher", 0.10), ("transit", 0.08), ("donation", 0.06)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self { rates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalogs_are_valid() {
        assert!(MaterialCatalog::default().validate().is_ok());
        assert!(RedemptionCatalog::default().validate().is_ok());
        assert_eq!(MaterialCatalog::default().len(), 5);
    }

    #[test]
    fn test_plastic_value() {
        let catalog = MaterialCatalog::default();
        let plastic = catalog.get("plastic").unwrap();
        assert_eq!(plastic.token_value_per_kg, 2.0);
        assert_eq!(plastic.subtypes[0], "PET bottle");
    }

    #[test]
    fn test_rejects_inverted_weight_range() {
        let mut entries = BTreeMap::new();
        entries.insert("paper".to_string(), material(&["newspaper"], (2.0, 0.5), 75.0, 1.0));
        assert!(MaterialCatalog::new(entries).is_err());
    }

    #[test]
    fn test_rejects_empty_subtypes() {
        let mut entries = BTreeMap::new();
        entries.insert("paper".to_string(), material(&[], (0.1, 0.5), 75.0, 1.0));
        assert!(MaterialCatalog::new(entries).is_err());
    }

    #[test]
    fn test_rejects_zero_rate() {
        let mut rates = BTreeMap::new();
        rates.insert("cash".to_string(), 0.0);
        assert!(RedemptionCatalog::new(rates).is_err());
    }

    #[test]
    fn test_catalog_json_shape() {
        let json = r#"{"cash": 0.5}"#;
        let catalog: RedemptionCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.rate("cash"), Some(0.5));
        assert_eq!(catalog.rate("gold"), None);
    }
}
