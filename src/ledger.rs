//! Token ledger: user accounts, balances, redemption history.
//!
//! Balances are kept in integer hundredths of a token, so
//! `balance == awarded - redeemed` holds exactly rather than up to float
//! error. Every successful mutation is appended to a hash-chained journal.
//!
//! All mutating operations take `&mut self`: the balance check and the
//! balance update of one call cannot interleave with another call. Sharing
//! a ledger between devices means wrapping it in a `Mutex`, which keeps
//! each award/redeem a single critical section.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::catalog::{MaterialCatalog, RedemptionCatalog};

const HUNDREDTHS_EPSILON: f64 = 1e-6;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Token amount in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tokens(i64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    /// Round to two decimals. `None` for NaN/inf or amounts that do not
    /// fit in i64 hundredths.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * 100.0).round();
        // i64::MAX as f64 rounds up to 2^63, which is already out of range.
        if scaled >= i64::MAX as f64 || scaled < i64::MIN as f64 {
            return None;
        }
        Some(Tokens(scaled as i64))
    }

    /// Like `from_f64` but `None` unless `value` is a whole number of
    /// hundredths (within float noise).
    pub fn from_f64_exact(value: f64) -> Option<Self> {
        let tokens = Self::from_f64(value)?;
        if (value * 100.0 - tokens.0 as f64).abs() > HUNDREDTHS_EPSILON {
            return None;
        }
        Some(tokens)
    }

    pub fn checked_add(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_add(rhs.0).map(Tokens)
    }

    pub fn checked_sub(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_sub(rhs.0).map(Tokens)
    }

    pub fn from_hundredths(h: i64) -> Self {
        Tokens(h)
    }

    pub fn hundredths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl std::ops::Add for Tokens {
    type Output = Tokens;
    fn add(self, rhs: Tokens) -> Tokens {
        Tokens(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Tokens {
    type Output = Tokens;
    fn sub(self, rhs: Tokens) -> Tokens {
        Tokens(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Tokens {
        Tokens(iter.map(|t| t.0).sum())
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Tokens {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    EmptyName,
    UnknownUser(String),
    UnknownMaterial(String),
    UnknownOption(String),
    InvalidAmount(f64),
    InsufficientBalance { balance: Tokens, requested: Tokens },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::EmptyName => write!(f, "user name is empty"),
            LedgerError::UnknownUser(id) => write!(f, "unknown user {}", id),
            LedgerError::UnknownMaterial(m) => write!(f, "unknown material {}", m),
            LedgerError::UnknownOption(o) => write!(f, "unknown redemption option {}", o),
            LedgerError::InvalidAmount(v) => write!(f, "invalid amount {}", v),
            LedgerError::InsufficientBalance { balance, requested } => {
                write!(f, "insufficient balance {} for {}", balance, requested)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub timestamp: String,
    pub tokens: Tokens,
    pub option: String,
    pub reward: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    user_id: String,
    name: String,
    balance: Tokens,
    total_awarded: Tokens,
    total_redeemed: Tokens,
    history: Vec<Redemption>,
}

impl UserAccount {
    fn new(user_id: String, name: String) -> Self {
        Self {
            user_id,
            name,
            balance: Tokens::ZERO,
            total_awarded: Tokens::ZERO,
            total_redeemed: Tokens::ZERO,
            history: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Tokens {
        self.balance
    }

    pub fn total_awarded(&self) -> Tokens {
        self.total_awarded
    }

    pub fn total_redeemed(&self) -> Tokens {
        self.total_redeemed
    }

    pub fn history(&self) -> &[Redemption] {
        &self.history
    }
}

impl fmt::Display for UserAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ID: {}) - {} tokens", self.name, self.user_id, self.balance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Award { material: String, subtype: String, weight_kg: f64 },
    Redeem { option: String, reward: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: String,
    pub user_id: String,
    pub tokens: Tokens,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct EntryBody<'a> {
    seq: u64,
    timestamp: &'a str,
    user_id: &'a str,
    tokens: i64,
    #[serde(flatten)]
    kind: &'a EntryKind,
}

fn entry_hash(prev_hash: &str, body: &EntryBody<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    // EntryBody holds only strings, integers, and finite floats.
    hasher.update(serde_json::to_vec(body).unwrap_or_default());
    hex::encode(hasher.finalize())
}

pub struct TokenLedger {
    materials: Arc<MaterialCatalog>,
    redemptions: RedemptionCatalog,
    accounts: BTreeMap<String, UserAccount>,
    journal: Vec<JournalEntry>,
    next_user: u32,
}

impl TokenLedger {
    pub fn new(materials: Arc<MaterialCatalog>, redemptions: RedemptionCatalog) -> Self {
        Self {
            materials,
            redemptions,
            accounts: BTreeMap::new(),
            journal: Vec::new(),
            next_user: 1,
        }
    }

    pub fn materials(&self) -> &Arc<MaterialCatalog> {
        &self.materials
    }

    pub fn redemptions(&self) -> &RedemptionCatalog {
        &self.redemptions
    }

    pub fn register_user(&mut self, name: &str) -> Result<&UserAccount, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyName);
        }
        let user_id = format!("U{:04}", self.next_user);
        self.next_user += 1;
        let account = self
            .accounts
            .entry(user_id.clone())
            .or_insert_with(|| UserAccount::new(user_id, name.to_string()));
        Ok(account)
    }

    pub fn account(&self, user_id: &str) -> Option<&UserAccount> {
        self.accounts.get(user_id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &UserAccount> {
        self.accounts.values()
    }

    pub fn balance(&self, user_id: &str) -> Option<Tokens> {
        self.accounts.get(user_id).map(|a| a.balance)
    }

    /// Credit `weight_kg × value_per_kg` (2 decimals) to the user.
    /// On `Err` nothing is mutated.
    pub fn award_tokens(
        &mut self,
        user_id: &str,
        material: &str,
        subtype: &str,
        weight_kg: f64,
        timestamp: &str,
    ) -> Result<Tokens, LedgerError> {
        if !self.accounts.contains_key(user_id) {
            return Err(LedgerError::UnknownUser(user_id.to_string()));
        }
        let value = self
            .materials
            .get(material)
            .ok_or_else(|| LedgerError::UnknownMaterial(material.to_string()))?
            .token_value_per_kg;
        if !weight_kg.is_finite() || weight_kg < 0.0 {
            return Err(LedgerError::InvalidAmount(weight_kg));
        }
        let tokens = Tokens::from_f64(weight_kg * value).ok_or(LedgerError::InvalidAmount(weight_kg))?;

        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
        let (Some(balance), Some(awarded)) = (
            account.balance.checked_add(tokens),
            account.total_awarded.checked_add(tokens),
        ) else {
            return Err(LedgerError::InvalidAmount(weight_kg));
        };
        account.balance = balance;
        account.total_awarded = awarded;
        self.append(
            user_id,
            timestamp,
            tokens,
            EntryKind::Award {
                material: material.to_string(),
                subtype: subtype.to_string(),
                weight_kg,
            },
        );
        Ok(tokens)
    }

    pub fn redeem_tokens(
        &mut self,
        user_id: &str,
        token_count: f64,
        option: &str,
    ) -> Result<Redemption, LedgerError> {
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.redeem_tokens_at(user_id, token_count, option, &ts)
    }

    /// Debit the user and append to their history. On `Err` nothing is
    /// mutated.
    pub fn redeem_tokens_at(
        &mut self,
        user_id: &str,
        token_count: f64,
        option: &str,
        timestamp: &str,
    ) -> Result<Redemption, LedgerError> {
        let balance = self
            .accounts
            .get(user_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
        let rate = self
            .redemptions
            .rate(option)
            .ok_or_else(|| LedgerError::UnknownOption(option.to_string()))?;
        let requested = Tokens::from_f64_exact(token_count)
            .filter(|t| t.is_positive())
            .ok_or(LedgerError::InvalidAmount(token_count))?;
        if balance < requested {
            return Err(LedgerError::InsufficientBalance { balance, requested });
        }

        let reward = (requested.as_f64() * rate * 100.0).round() / 100.0;
        let redemption = Redemption {
            timestamp: timestamp.to_string(),
            tokens: requested,
            option: option.to_string(),
            reward,
        };
        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UnknownUser(user_id.to_string()))?;
        let (Some(balance), Some(redeemed)) = (
            account.balance.checked_sub(requested),
            account.total_redeemed.checked_add(requested),
        ) else {
            return Err(LedgerError::InvalidAmount(token_count));
        };
        account.balance = balance;
        account.total_redeemed = redeemed;
        account.history.push(redemption.clone());
        self.append(
            user_id,
            timestamp,
            requested,
            EntryKind::Redeem {
                option: option.to_string(),
                reward,
            },
        );
        Ok(redemption)
    }

    fn append(&mut self, user_id: &str, timestamp: &str, tokens: Tokens, kind: EntryKind) {
        let seq = self.journal.len() as u64;
        let prev_hash = self.journal_head().to_string();
        let hash = entry_hash(
            &prev_hash,
            &EntryBody {
                seq,
                timestamp,
                user_id,
                tokens: tokens.hundredths(),
                kind: &kind,
            },
        );
        self.journal.push(JournalEntry {
            seq,
            timestamp: timestamp.to_string(),
            user_id: user_id.to_string(),
            tokens,
            kind,
            prev_hash,
            hash,
        });
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn journal_head(&self) -> &str {
        self.journal.last().map(|e| e.hash.as_str()).unwrap_or(GENESIS_HASH)
    }

    /// Recompute the hash chain from genesis.
    pub fn verify_journal(&self) -> bool {
        let mut prev = GENESIS_HASH.to_string();
        for (i, entry) in self.journal.iter().enumerate() {
            if entry.seq != i as u64 || entry.prev_hash != prev {
                return false;
            }
            let expected = entry_hash(
                &prev,
                &EntryBody {
                    seq: entry.seq,
                    timestamp: &entry.timestamp,
                    user_id: &entry.user_id,
                    tokens: entry.tokens.hundredths(),
                    kind: &entry.kind,
                },
            );
            if expected != entry.hash {
                return false;
            }
            prev = entry.hash.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TokenLedger {
        TokenLedger::new(Arc::new(MaterialCatalog::default()), RedemptionCatalog::default())
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        let b = l.register_user("B").unwrap().user_id().to_string();
        assert_ne!(a, b);
        assert_eq!(l.balance(&a), Some(Tokens::ZERO));
        assert!(l.account(&a).unwrap().history().is_empty());
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut l = ledger();
        assert_eq!(l.register_user("   ").unwrap_err(), LedgerError::EmptyName);
        assert_eq!(l.accounts().count(), 0);
    }

    #[test]
    fn test_award_pet_bottle() {
        let mut l = ledger();
        let u = l.register_user("u1").unwrap().user_id().to_string();
        let tokens = l.award_tokens(&u, "plastic", "PET bottle", 0.30, "t0").unwrap();
        assert_eq!(tokens, Tokens::from_hundredths(60));
        assert_eq!(l.balance(&u).unwrap().as_f64(), 0.60);
    }

    #[test]
    fn test_award_unknown_material_leaves_balance() {
        let mut l = ledger();
        let u = l.register_user("u1").unwrap().user_id().to_string();
        let err = l.award_tokens(&u, "wood", "pallet", 1.0, "t0").unwrap_err();
        assert_eq!(err, LedgerError::UnknownMaterial("wood".to_string()));
        assert_eq!(l.balance(&u), Some(Tokens::ZERO));
        assert!(l.journal().is_empty());
    }

    #[test]
    fn test_award_unknown_user_creates_nothing() {
        let mut l = ledger();
        let u = l.register_user("u1").unwrap().user_id().to_string();
        l.award_tokens(&u, "metal", "foil", 0.1, "t0").unwrap();
        assert!(l.award_tokens("U9999", "metal", "foil", 0.1, "t1").is_err());
        assert!(l.account("U9999").is_none());
        assert_eq!(l.accounts().count(), 1);
        assert_eq!(l.balance(&u).unwrap().as_f64(), 0.30);
    }

    #[test]
    fn test_redeem_insufficient_balance() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        l.register_user("B").unwrap();
        // 1.5 kg of paper at 1.0/kg, then 0.75 kg of plastic at 2.0/kg
        l.award_tokens(&a, "paper", "cardboard", 1.5, "t0").unwrap();
        l.award_tokens(&a, "plastic", "plastic bag", 0.75, "t1").unwrap();
        assert_eq!(l.balance(&a).unwrap().as_f64(), 3.0);

        let err = l.redeem_tokens(&a, 5.0, "cash").unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(l.balance(&a).unwrap().as_f64(), 3.0);
        assert!(l.account(&a).unwrap().history().is_empty());
    }

    #[test]
    fn test_redeem_debits_and_records() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        l.award_tokens(&a, "e-waste", "battery", 2.0, "t0").unwrap();
        let r = l.redeem_tokens_at(&a, 4.0, "voucher", "t1").unwrap();
        assert_eq!(r.tokens.as_f64(), 4.0);
        assert!((r.reward - 0.4).abs() < 1e-9);
        assert_eq!(l.balance(&a).unwrap().as_f64(), 6.0);
        assert_eq!(l.account(&a).unwrap().history(), &[r]);
    }

    #[test]
    fn test_redeem_unknown_option_and_bad_amounts() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        l.award_tokens(&a, "paper", "newspaper", 1.0, "t0").unwrap();
        assert!(matches!(l.redeem_tokens(&a, 0.5, "gold"), Err(LedgerError::UnknownOption(_))));
        assert!(matches!(l.redeem_tokens(&a, 0.0, "cash"), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(l.redeem_tokens(&a, -1.0, "cash"), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(l.redeem_tokens(&a, f64::NAN, "cash"), Err(LedgerError::InvalidAmount(_))));
        assert_eq!(l.balance(&a).unwrap().as_f64(), 1.0);
    }

    #[test]
    fn test_redeem_exact_balance() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        l.award_tokens(&a, "glass", "glass jar", 0.5, "t0").unwrap();
        assert!(l.redeem_tokens(&a, 0.75, "cash").is_ok());
        assert_eq!(l.balance(&a), Some(Tokens::ZERO));
    }

    #[test]
    fn test_redeem_rejects_fractional_hundredths() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        // 5 kg of paper at 1.0/kg
        l.award_tokens(&a, "paper", "cardboard", 5.0, "t0").unwrap();
        assert_eq!(l.balance(&a), Some(Tokens::from_hundredths(500)));

        // 5.004 would round down to the full balance
        let err = l.redeem_tokens_at(&a, 5.004, "cash", "t1").unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount(5.004));
        assert!(l.redeem_tokens_at(&a, 0.004, "cash", "t2").is_err());
        assert_eq!(l.balance(&a), Some(Tokens::from_hundredths(500)));
        assert!(l.account(&a).unwrap().history().is_empty());
        assert_eq!(l.journal().len(), 1);

        let r = l.redeem_tokens_at(&a, 1.23, "cash", "t3").unwrap();
        assert_eq!(r.tokens, Tokens::from_hundredths(123));
    }

    #[test]
    fn test_huge_award_rejected_without_mutation() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        // 1e17 kg of e-waste at 5.0/kg is past i64 hundredths
        let err = l.award_tokens(&a, "e-waste", "battery", 1e17, "t0").unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount(1e17));
        assert_eq!(l.balance(&a), Some(Tokens::ZERO));
        assert!(l.journal().is_empty());

        // representable on its own, but the sum would overflow
        l.award_tokens(&a, "e-waste", "battery", 1.5e16, "t1").unwrap();
        let before = l.balance(&a);
        assert!(l.award_tokens(&a, "e-waste", "battery", 1.5e16, "t2").is_err());
        assert_eq!(l.balance(&a), before);
        assert_eq!(l.journal().len(), 1);
        assert!(l.award_tokens(&a, "paper", "newspaper", 1.0, "t3").is_ok());
        assert!(l.balance(&a).unwrap() > Tokens::ZERO);
    }

    #[test]
    fn test_journal_chain_verifies() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        assert_eq!(l.journal_head(), GENESIS_HASH);
        l.award_tokens(&a, "paper", "magazine", 1.2, "t0").unwrap();
        l.redeem_tokens_at(&a, 1.0, "donation", "t1").unwrap();
        assert_eq!(l.journal().len(), 2);
        assert_eq!(l.journal()[1].prev_hash, l.journal()[0].hash);
        assert!(l.verify_journal());
    }

    #[test]
    fn test_journal_detects_tampering() {
        let mut l = ledger();
        let a = l.register_user("A").unwrap().user_id().to_string();
        l.award_tokens(&a, "paper", "magazine", 1.2, "t0").unwrap();
        l.journal[0].tokens = Tokens::from_hundredths(9_999);
        assert!(!l.verify_journal());
    }

    #[test]
    fn test_tokens_display() {
        assert_eq!(Tokens::from_hundredths(60).to_string(), "0.60");
        assert_eq!(Tokens::from_hundredths(12_345).to_string(), "123.45");
        assert_eq!(Tokens::from_f64(0.005).unwrap().hundredths(), 1);
        assert!(Tokens::from_f64(f64::INFINITY).is_none());
        assert!(Tokens::from_f64(1e17).is_none());
        assert!(Tokens::from_f64_exact(0.1 + 0.2).is_some());
        assert!(Tokens::from_f64_exact(0.125).is_none());
    }
}
