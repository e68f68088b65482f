//! Shared types for the cap table engine.
//!
//! These types form the canonical capitalization model consumed by the
//! parser, the round modeler, and the waterfall engine. A `CapTable` is an
//! immutable snapshot: every stage that changes ownership returns a new one.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lower bound of the acceptable ownership-percentage sum.
pub const OWNERSHIP_SUM_MIN: Decimal = dec!(99.9);
/// Upper bound of the acceptable ownership-percentage sum.
pub const OWNERSHIP_SUM_MAX: Decimal = dec!(100.1);

/// Decimal places kept on percentages stored in a table.
pub const PCT_DP: u32 = 2;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of security a share class represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    Common,
    Preferred,
    Options,
}

impl ShareType {
    /// Infer the share type from a class label ("preferred" wins over "option").
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("preferred") {
            ShareType::Preferred
        } else if lower.contains("option") {
            ShareType::Options
        } else {
            ShareType::Common
        }
    }
}

impl fmt::Display for ShareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareType::Common => write!(f, "common"),
            ShareType::Preferred => write!(f, "preferred"),
            ShareType::Options => write!(f, "options"),
        }
    }
}

/// Role of a holder on the cap table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderType {
    Founder,
    Investor,
    Employee,
    Pool,
    Other,
}

impl fmt::Display for HolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderType::Founder => write!(f, "founder"),
            HolderType::Investor => write!(f, "investor"),
            HolderType::Employee => write!(f, "employee"),
            HolderType::Pool => write!(f, "pool"),
            HolderType::Other => write!(f, "other"),
        }
    }
}

/// Parse an explicit holder-type cell (case-insensitive).
impl std::str::FromStr for HolderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "founder" | "founders" | "co-founder" | "cofounder" => Ok(HolderType::Founder),
            "investor" | "investors" | "vc" | "angel" => Ok(HolderType::Investor),
            "employee" | "employees" => Ok(HolderType::Employee),
            "pool" | "option pool" | "esop" => Ok(HolderType::Pool),
            "other" => Ok(HolderType::Other),
            _ => Err(anyhow::anyhow!("Unknown holder type: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Share class
// ---------------------------------------------------------------------------

/// A class of shares and its liquidation terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareClass {
    pub name: String,
    pub share_type: ShareType,
    pub authorized: u64,
    pub issued: u64,
    pub outstanding: u64,
    pub price_per_share: Decimal,
    /// Liquidation preference multiple (1.0 = 1x).
    pub liquidation_preference: Decimal,
    pub participating: bool,
    /// Cap on participation as a multiple of investment. Recorded, not applied.
    #[serde(default)]
    pub participation_cap: Option<Decimal>,
    #[serde(default = "default_conversion_ratio")]
    pub conversion_ratio: Decimal,
    /// Higher is paid first.
    pub seniority: u32,
    pub total_invested: Decimal,
}

fn default_conversion_ratio() -> Decimal {
    Decimal::ONE
}

impl fmt::Display for ShareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) shares={} invested=${:.0} pref={}x seniority={}",
            self.name,
            self.share_type,
            self.outstanding,
            self.total_invested,
            self.liquidation_preference,
            self.seniority,
        )
    }
}

impl ShareClass {
    /// Seniority implied by a class label's round letter.
    ///
    /// Preferred labels rank by series (base = 1, B = 2, C = 3, D = 4);
    /// anything that is not preferred ranks 0.
    pub fn seniority_for_label(label: &str) -> u32 {
        let lower = label.to_lowercase().replace(['_', '-'], " ");
        if !lower.contains("preferred") {
            return 0;
        }
        if lower.contains("series b") {
            2
        } else if lower.contains("series c") {
            3
        } else if lower.contains("series d") {
            4
        } else {
            1
        }
    }

    /// Build a class from its label with default terms and empty totals.
    pub fn from_label(label: &str) -> Self {
        let share_type = ShareType::from_label(label);
        let liquidation_preference = match share_type {
            ShareType::Preferred => Decimal::ONE,
            _ => Decimal::ZERO,
        };
        Self {
            name: label.to_string(),
            share_type,
            authorized: 0,
            issued: 0,
            outstanding: 0,
            price_per_share: Decimal::ZERO,
            liquidation_preference,
            participating: false,
            participation_cap: None,
            conversion_ratio: Decimal::ONE,
            seniority: Self::seniority_for_label(label),
            total_invested: Decimal::ZERO,
        }
    }

    /// Recompute share and capital totals from the holders in this class.
    pub fn refresh_totals(&mut self, holders: &[Holder]) {
        let members = holders.iter().filter(|h| h.share_class == self.name);
        let (shares, invested) = members.fold((0u64, Decimal::ZERO), |(s, i), h| {
            (s.saturating_add(h.shares), i.saturating_add(h.invested))
        });
        self.issued = shares;
        self.outstanding = shares;
        self.authorized = self.authorized.max(shares);
        self.total_invested = invested;
        if self.price_per_share.is_zero() {
            if let Some(h) = holders
                .iter()
                .find(|h| h.share_class == self.name && h.price_per_share > Decimal::ZERO)
            {
                self.price_per_share = h.price_per_share;
            }
        }
    }

    pub fn is_preferred(&self) -> bool {
        self.share_type == ShareType::Preferred
    }
}

// ---------------------------------------------------------------------------
// Holder
// ---------------------------------------------------------------------------

/// One line of the cap table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub name: String,
    pub holder_type: HolderType,
    pub share_class: String,
    pub shares: u64,
    pub price_per_share: Decimal,
    pub invested: Decimal,
    /// Percentage of outstanding shares (0–100).
    pub ownership_pct: Decimal,
    /// Percentage of fully diluted shares (0–100).
    pub fully_diluted_pct: Decimal,
    #[serde(default)]
    pub vesting_start: Option<NaiveDate>,
    #[serde(default)]
    pub vesting_end: Option<NaiveDate>,
    #[serde(default)]
    pub vested_shares: u64,
    /// Input columns that did not map to a canonical field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} shares of {} ({:.2}%)",
            self.name, self.holder_type, self.shares, self.share_class, self.ownership_pct,
        )
    }
}

// ---------------------------------------------------------------------------
// Cap table
// ---------------------------------------------------------------------------

/// Complete capitalization table snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapTable {
    pub company_name: String,
    pub as_of_date: NaiveDate,
    pub total_shares_authorized: u64,
    pub total_shares_outstanding: u64,
    pub fully_diluted_shares: u64,
    pub option_pool_shares: u64,
    pub option_pool_pct: Decimal,
    pub share_classes: Vec<ShareClass>,
    pub holders: Vec<Holder>,
}

impl fmt::Display for CapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} as of {}: {} outstanding / {} fully diluted, {} holders, {} classes, pool {:.2}%",
            self.company_name,
            self.as_of_date,
            self.total_shares_outstanding,
            self.fully_diluted_shares,
            self.holders.len(),
            self.share_classes.len(),
            self.option_pool_pct,
        )
    }
}

impl CapTable {
    /// Look up a share class by name.
    pub fn class(&self, name: &str) -> Option<&ShareClass> {
        self.share_classes.iter().find(|c| c.name == name)
    }

    /// Sum of all holders' share counts, `None` on overflow.
    pub fn checked_holder_shares(&self) -> Option<u64> {
        self.holders
            .iter()
            .try_fold(0u64, |acc, h| acc.checked_add(h.shares))
    }

    /// Sum of all holders' share counts, saturating at `u64::MAX`.
    pub fn holder_shares(&self) -> u64 {
        self.checked_holder_shares().unwrap_or(u64::MAX)
    }

    /// Shares held by holders classified as the option pool.
    pub fn pool_shares(&self) -> u64 {
        self.holders
            .iter()
            .filter(|h| h.holder_type == HolderType::Pool)
            .fold(0u64, |acc, h| acc.saturating_add(h.shares))
    }

    /// Total capital invested across all holders.
    pub fn total_invested(&self) -> Decimal {
        self.holders
            .iter()
            .fold(Decimal::ZERO, |acc, h| acc.saturating_add(h.invested))
    }

    /// Sum of holders' ownership percentages.
    pub fn ownership_sum(&self) -> Decimal {
        self.holders
            .iter()
            .fold(Decimal::ZERO, |acc, h| acc.saturating_add(h.ownership_pct))
    }

    /// Highest seniority among preferred classes (0 when there are none).
    pub fn max_preferred_seniority(&self) -> u32 {
        self.share_classes
            .iter()
            .filter(|c| c.is_preferred())
            .map(|c| c.seniority)
            .max()
            .unwrap_or(0)
    }

    /// Non-fatal check that ownership percentages add up to ~100%.
    pub fn ownership_warning(&self) -> Option<DataQualityWarning> {
        let sum = self.ownership_sum();
        if (OWNERSHIP_SUM_MIN..=OWNERSHIP_SUM_MAX).contains(&sum) {
            None
        } else {
            Some(DataQualityWarning::OwnershipSumOutOfRange { sum })
        }
    }

    /// Check the structural invariants downstream stages rely on.
    pub fn validate(&self) -> CapResult<()> {
        for holder in &self.holders {
            if self.class(&holder.share_class).is_none() {
                return Err(CapTableError::UnknownShareClass {
                    holder: holder.name.clone(),
                    share_class: holder.share_class.clone(),
                });
            }
            if holder.price_per_share < Decimal::ZERO {
                return Err(CapTableError::validation(format!(
                    "holder '{}' has negative price per share {}",
                    holder.name, holder.price_per_share
                )));
            }
        }

        let held = self.checked_holder_shares().ok_or_else(|| {
            CapTableError::validation("holder share counts overflow a 64-bit total")
        })?;
        if held != self.total_shares_outstanding {
            return Err(CapTableError::validation(format!(
                "holder shares sum to {held} but table reports {} outstanding",
                self.total_shares_outstanding
            )));
        }
        // Options and pool grants are carried as holders, so every share
        // that dilutes is also counted as outstanding.
        if self.fully_diluted_shares != self.total_shares_outstanding {
            return Err(CapTableError::validation(format!(
                "fully diluted shares {} differ from outstanding {}; carry options as holders",
                self.fully_diluted_shares, self.total_shares_outstanding
            )));
        }
        if self
            .holders
            .iter()
            .try_fold(Decimal::ZERO, |acc, h| acc.checked_add(h.invested))
            .is_none()
        {
            return Err(CapTableError::validation("invested capital overflows"));
        }
        if let Some(c) = self.share_classes.iter().find(|c| c.price_per_share < Decimal::ZERO) {
            return Err(CapTableError::validation(format!(
                "share class '{}' has negative price per share",
                c.name
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Percent helpers
// ---------------------------------------------------------------------------

/// `part / whole * 100`, or `None` when `whole` is zero.
pub fn percent_of(part: u64, whole: u64) -> Option<Decimal> {
    if whole == 0 {
        return None;
    }
    Some(Decimal::from(part) / Decimal::from(whole) * dec!(100))
}

/// Round a percentage to the precision stored on tables.
pub fn round_pct(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PCT_DP, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal data-quality signal handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Input row dropped entirely.
    SkippedRecord { row: usize, reason: String },
    /// Cell could not be read and was replaced with a default.
    DefaultedField { row: usize, field: String, raw: String },
    /// Explicit holder type not recognised; type was inferred instead.
    UnknownHolderType { row: usize, value: String },
    /// Supplied authorized share count is below outstanding shares.
    AuthorizedBelowOutstanding { authorized: u64, outstanding: u64 },
    /// Ownership percentages sum outside [99.9, 100.1].
    OwnershipSumOutOfRange { sum: Decimal },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityWarning::SkippedRecord { row, reason } => {
                write!(f, "row {row} skipped: {reason}")
            }
            DataQualityWarning::DefaultedField { row, field, raw } => {
                write!(f, "row {row}: could not read {field} from '{raw}', defaulted")
            }
            DataQualityWarning::UnknownHolderType { row, value } => {
                write!(f, "row {row}: unknown holder type '{value}', inferred instead")
            }
            DataQualityWarning::AuthorizedBelowOutstanding { authorized, outstanding } => {
                write!(f, "authorized shares {authorized} below outstanding {outstanding}")
            }
            DataQualityWarning::OwnershipSumOutOfRange { sum } => {
                write!(f, "ownership percentages sum to {sum:.2}%")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Result alias for engine operations.
pub type CapResult<T> = std::result::Result<T, CapTableError>;

/// Failures that abort a single parse/round/waterfall operation.
#[derive(Debug, thiserror::Error)]
pub enum CapTableError {
    /// Malformed or logically inconsistent input.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: holder '{holder}' references unknown share class '{share_class}'")]
    UnknownShareClass { holder: String, share_class: String },

    /// Degenerate ratio (e.g. zero fully diluted shares).
    #[error("Computation error: {0}")]
    Computation(String),

    /// A background scenario task failed to complete.
    #[error("Scenario task failed: {0}")]
    Task(String),
}

impl CapTableError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    /// Whether this error reports bad input rather than a degenerate table.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownShareClass { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn holder(name: &str, class: &str, shares: u64, invested: Decimal) -> Holder {
        Holder {
            name: name.to_string(),
            holder_type: HolderType::Other,
            share_class: class.to_string(),
            shares,
            price_per_share: Decimal::ZERO,
            invested,
            ownership_pct: Decimal::ZERO,
            fully_diluted_pct: Decimal::ZERO,
            vesting_start: None,
            vesting_end: None,
            vested_shares: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Assemble a consistent table from holders, deriving classes and totals.
    pub(crate) fn table(holders: Vec<Holder>) -> CapTable {
        let total: u64 = holders.iter().map(|h| h.shares).sum();
        let mut classes: Vec<ShareClass> = Vec::new();
        for h in &holders {
            if !classes.iter().any(|c| c.name == h.share_class) {
                classes.push(ShareClass::from_label(&h.share_class));
            }
        }
        for c in &mut classes {
            c.refresh_totals(&holders);
        }
        let holders: Vec<Holder> = holders
            .into_iter()
            .map(|mut h| {
                let pct = round_pct(percent_of(h.shares, total).unwrap_or_default());
                h.ownership_pct = pct;
                h.fully_diluted_pct = pct;
                h
            })
            .collect();
        let pool: u64 = holders
            .iter()
            .filter(|h| h.holder_type == HolderType::Pool)
            .map(|h| h.shares)
            .sum();
        CapTable {
            company_name: "Acme".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            total_shares_authorized: total,
            total_shares_outstanding: total,
            fully_diluted_shares: total,
            option_pool_shares: pool,
            option_pool_pct: round_pct(percent_of(pool, total).unwrap_or_default()),
            share_classes: classes,
            holders,
        }
    }

    #[test]
    fn test_share_type_from_label() {
        assert_eq!(ShareType::from_label("Series A Preferred"), ShareType::Preferred);
        assert_eq!(ShareType::from_label("Stock Options"), ShareType::Options);
        assert_eq!(ShareType::from_label("Common"), ShareType::Common);
        assert_eq!(ShareType::from_label("preferred options"), ShareType::Preferred);
    }

    #[test]
    fn test_seniority_for_label() {
        assert_eq!(ShareClass::seniority_for_label("Series A Preferred"), 1);
        assert_eq!(ShareClass::seniority_for_label("preferred_series_b"), 2);
        assert_eq!(ShareClass::seniority_for_label("Series C Preferred"), 3);
        assert_eq!(ShareClass::seniority_for_label("series-d preferred"), 4);
        assert_eq!(ShareClass::seniority_for_label("Seed Preferred"), 1);
        assert_eq!(ShareClass::seniority_for_label("Series B Common"), 0);
    }

    #[test]
    fn test_holder_type_from_str() {
        assert_eq!("Founder".parse::<HolderType>().unwrap(), HolderType::Founder);
        assert_eq!(" ESOP ".parse::<HolderType>().unwrap(), HolderType::Pool);
        assert_eq!("investor".parse::<HolderType>().unwrap(), HolderType::Investor);
        assert!("advisor".parse::<HolderType>().is_err());
    }

    #[test]
    fn test_holder_type_serialization() {
        let json = serde_json::to_string(&HolderType::Employee).unwrap();
        assert_eq!(json, "\"employee\"");
        let back: HolderType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HolderType::Employee);
    }

    #[test]
    fn test_refresh_totals() {
        let holders = vec![
            holder("A", "Series A Preferred", 100, dec!(50)),
            holder("B", "Series A Preferred", 300, dec!(150)),
            holder("C", "Common", 600, Decimal::ZERO),
        ];
        let mut class = ShareClass::from_label("Series A Preferred");
        class.refresh_totals(&holders);
        assert_eq!(class.outstanding, 400);
        assert_eq!(class.issued, 400);
        assert_eq!(class.total_invested, dec!(200));
        assert_eq!(class.liquidation_preference, Decimal::ONE);
    }

    #[test]
    fn test_validate_ok() {
        let t = table(vec![
            holder("A", "Common", 60, Decimal::ZERO),
            holder("B", "Common", 40, Decimal::ZERO),
        ]);
        assert!(t.validate().is_ok());
        assert!(t.ownership_warning().is_none());
    }

    #[test]
    fn test_validate_unknown_class() {
        let mut t = table(vec![holder("A", "Common", 100, Decimal::ZERO)]);
        t.holders[0].share_class = "Ghost".to_string();
        let err = t.validate().unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, CapTableError::UnknownShareClass { .. }));
    }

    #[test]
    fn test_validate_share_sum_mismatch() {
        let mut t = table(vec![holder("A", "Common", 100, Decimal::ZERO)]);
        t.total_shares_outstanding = 90;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_extra_fully_diluted() {
        let mut t = table(vec![
            holder("A", "Common", 8_000_000, Decimal::ZERO),
            holder("B", "Series A Preferred", 2_000_000, dec!(5000000)),
        ]);
        t.fully_diluted_shares = 12_000_000;
        let err = t.validate().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("fully diluted shares 12000000"));

        t.fully_diluted_shares = 9_000_000;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_share_sum_overflow_is_validation_error() {
        let mut t = table(vec![holder("A", "Common", 1, Decimal::ZERO)]);
        t.holders.push(holder("B", "Common", u64::MAX, Decimal::ZERO));
        assert_eq!(t.checked_holder_shares(), None);
        assert_eq!(t.holder_shares(), u64::MAX);
        assert!(t.validate().unwrap_err().is_validation());

        let mut class = ShareClass::from_label("Common");
        class.refresh_totals(&t.holders);
        assert_eq!(class.outstanding, u64::MAX);
    }

    #[test]
    fn test_ownership_warning_out_of_range() {
        let mut t = table(vec![holder("A", "Common", 100, Decimal::ZERO)]);
        t.holders[0].ownership_pct = dec!(95);
        assert_eq!(
            t.ownership_warning(),
            Some(DataQualityWarning::OwnershipSumOutOfRange { sum: dec!(95) })
        );
    }

    #[test]
    fn test_percent_helpers() {
        assert_eq!(percent_of(1, 3).map(round_pct), Some(dec!(33.33)));
        assert_eq!(percent_of(2, 3).map(round_pct), Some(dec!(66.67)));
        assert_eq!(percent_of(5, 0), None);
        assert_eq!(round_pct(dec!(12.345)), dec!(12.35));
    }

    #[test]
    fn test_error_display() {
        let e = CapTableError::validation("investment must be positive");
        assert_eq!(e.to_string(), "Validation error: investment must be positive");
        assert!(!CapTableError::computation("x").is_validation());
    }
}
