use std::collections::BTreeMap;
use std::fmt;

use crate::ledger::{EntryKind, TokenLedger, Tokens};
use crate::pipeline::CompositeReading;

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub check: &'static str,
    pub msg: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.msg)
    }
}

fn violation(check: &'static str, msg: String) -> InvariantViolation {
    InvariantViolation { check, msg }
}

fn in_range(check: &'static str, name: &str, v: f64, lo: f64, hi: f64) -> Result<(), InvariantViolation> {
    if v.is_nan() || v < lo || v > hi {
        return Err(violation(check, format!("{} = {} outside [{}, {}]", name, v, lo, hi)));
    }
    Ok(())
}

/// Every bounded output lies within its closed interval.
pub fn assert_reading_bounds(r: &CompositeReading) -> Result<(), InvariantViolation> {
    const CHECK: &str = "reading_bounds";
    in_range(CHECK, "latitude", r.gps().latitude, -90.0, 90.0)?;
    in_range(CHECK, "longitude", r.gps().longitude, -180.0, 180.0)?;
    if !r.temperature().value.is_finite() {
        return Err(violation(CHECK, "temperature not finite".to_string()));
    }
    if let Some(f) = r.fill_level() {
        in_range(CHECK, "fill_level", f.level, 0.0, f.capacity)?;
    }
    if let Some(o) = r.odor() {
        in_range(CHECK, "odor_intensity", o.intensity, 0.0, 1.0)?;
    }
    if let Some(h) = r.humidity() {
        in_range(CHECK, "humidity", h.value, 0.0, 100.0)?;
        in_range(CHECK, "mold_risk_pct", h.mold_risk_pct, 0.0, 100.0)?;
    }
    if let Some(a) = r.air_quality() {
        in_range(CHECK, "aqi", a.aqi, 0.0, 500.0)?;
    }
    if r.recyclable().tokens_awarded < 0.0 {
        return Err(violation(CHECK, "negative tokens awarded".to_string()));
    }
    Ok(())
}

/// Per account: `balance == awarded - redeemed`, never negative, and both
/// totals agree with the journal. The journal chain must verify.
pub fn assert_ledger_invariants(ledger: &TokenLedger) -> Result<(), InvariantViolation> {
    const CHECK: &str = "ledger_balance";
    if !ledger.verify_journal() {
        return Err(violation("ledger_journal", "hash chain broken".to_string()));
    }

    let mut journal_awards: BTreeMap<&str, Tokens> = BTreeMap::new();
    let mut journal_redeems: BTreeMap<&str, Tokens> = BTreeMap::new();
    for entry in ledger.journal() {
        let bucket = match entry.kind {
            EntryKind::Award { .. } => &mut journal_awards,
            EntryKind::Redeem { .. } => &mut journal_redeems,
        };
        let slot = bucket.entry(entry.user_id.as_str()).or_insert(Tokens::ZERO);
        *slot = *slot + entry.tokens;
    }

    for account in ledger.accounts() {
        let id = account.user_id();
        if account.balance() < Tokens::ZERO {
            return Err(violation(CHECK, format!("{} balance negative: {}", id, account.balance())));
        }
        if account.balance() != account.total_awarded() - account.total_redeemed() {
            return Err(violation(
                CHECK,
                format!(
                    "{} balance {} != awarded {} - redeemed {}",
                    id,
                    account.balance(),
                    account.total_awarded(),
                    account.total_redeemed()
                ),
            ));
        }
        let history: Tokens = account.history().iter().map(|r| r.tokens).sum();
        if history != account.total_redeemed() {
            return Err(violation(CHECK, format!("{} history {} != redeemed {}", id, history, account.total_redeemed())));
        }
        let awarded = journal_awards.get(id).copied().unwrap_or(Tokens::ZERO);
        let redeemed = journal_redeems.get(id).copied().unwrap_or(Tokens::ZERO);
        if awarded != account.total_awarded() || redeemed != account.total_redeemed() {
            return Err(violation(CHECK, format!("{} totals disagree with journal", id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MaterialCatalog, RedemptionCatalog};
    use std::sync::Arc;

    #[test]
    fn test_ledger_invariants_hold_through_activity() {
        let mut ledger = TokenLedger::new(Arc::new(MaterialCatalog::default()), RedemptionCatalog::default());
        let a = ledger.register_user("A").unwrap().user_id().to_string();
        let b = ledger.register_user("B").unwrap().user_id().to_string();
        assert!(assert_ledger_invariants(&ledger).is_ok());

        ledger.award_tokens(&a, "metal", "aluminum can", 0.5, "t0").unwrap();
        ledger.award_tokens(&b, "paper", "newspaper", 1.25, "t1").unwrap();
        ledger.redeem_tokens_at(&a, 1.0, "cash", "t2").unwrap();
        assert!(ledger.redeem_tokens_at(&b, 5.0, "cash", "t3").is_err());
        assert!(assert_ledger_invariants(&ledger).is_ok());
    }

    #[test]
    fn test_bounds_on_real_reading() {
        use crate::config::SimConfig;
        use crate::pipeline::CorrelationPipeline;
        use rand::{rngs::StdRng, SeedableRng};

        let cfg = SimConfig::default();
        let mut p = CorrelationPipeline::new("bin", &cfg, Arc::new(cfg.materials.clone())).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..50 {
            let r = p.tick(&mut rng, i, None, None);
            assert!(assert_reading_bounds(&r).is_ok());
        }
    }

    #[test]
    fn test_range_helper() {
        assert!(in_range("x", "v", 5.0, 0.0, 10.0).is_ok());
        let err = in_range("x", "v", f64::NAN, 0.0, 10.0).unwrap_err();
        assert_eq!(err.check, "x");
        assert!(in_range("x", "v", 10.5, 0.0, 10.0).is_err());
    }
}
