//! Column and holder classification.
//!
//! Vendor exports name the same fields differently. Each source format gets
//! a `ColumnClassifier` that maps normalized column headers onto the
//! canonical field set; everything downstream of the parser only sees the
//! canonical model. Holder-type keywords live in `HolderTypeRules` so they
//! can be overridden from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::HolderType;

// ---------------------------------------------------------------------------
// Formats and fields
// ---------------------------------------------------------------------------

/// Known source layouts for cap table exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Generic,
    Carta,
    Pulley,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Generic => write!(f, "generic"),
            SourceFormat::Carta => write!(f, "carta"),
            SourceFormat::Pulley => write!(f, "pulley"),
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" | "csv" => Ok(SourceFormat::Generic),
            "carta" => Ok(SourceFormat::Carta),
            "pulley" => Ok(SourceFormat::Pulley),
            _ => Err(anyhow::anyhow!("Unknown cap table format: {s}")),
        }
    }
}

/// Canonical holder-record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Holder,
    ShareClass,
    Shares,
    PricePerShare,
    Invested,
    OwnershipPct,
    HolderType,
    VestingStart,
    VestingEnd,
    VestedShares,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Holder => "holder",
            CanonicalField::ShareClass => "share_class",
            CanonicalField::Shares => "shares",
            CanonicalField::PricePerShare => "price_per_share",
            CanonicalField::Invested => "invested",
            CanonicalField::OwnershipPct => "ownership_pct",
            CanonicalField::HolderType => "holder_type",
            CanonicalField::VestingStart => "vesting_start",
            CanonicalField::VestingEnd => "vesting_end",
            CanonicalField::VestedShares => "vested_shares",
        }
    }
}

/// Lower-case, trim, and replace spaces with underscores.
pub fn normalize_column(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Guess the export format from its header row.
pub fn detect_format(headers: &[String]) -> SourceFormat {
    let lower: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let has = |name: &str| {
        let underscored = name.replace(' ', "_");
        lower.iter().any(|h| h == name || *h == underscored)
    };

    if has("security type") || has("certificate") {
        SourceFormat::Carta
    } else if has("grant type") || has("stakeholder") {
        SourceFormat::Pulley
    } else {
        SourceFormat::Generic
    }
}

/// Pick the classifier for a format.
pub fn classifier_for(format: SourceFormat) -> Box<dyn ColumnClassifier> {
    match format {
        SourceFormat::Generic => Box::new(GenericClassifier),
        SourceFormat::Carta => Box::new(CartaClassifier),
        SourceFormat::Pulley => Box::new(PulleyClassifier),
    }
}

// ---------------------------------------------------------------------------
// Classifier strategy
// ---------------------------------------------------------------------------

/// Maps normalized column names to canonical fields for one source format.
#[cfg_attr(test, mockall::automock)]
pub trait ColumnClassifier: Send + Sync {
    /// The format this classifier understands.
    fn format(&self) -> SourceFormat;

    /// Canonical field for a normalized column name, if any.
    fn canonical_field(&self, column: &str) -> Option<CanonicalField>;
}

/// Column names every format accepts.
fn generic_field(column: &str) -> Option<CanonicalField> {
    use CanonicalField as F;
    let field = match column {
        "holder" | "stakeholder" | "shareholder" | "name" => F::Holder,
        "share_class" | "security_type" | "class" => F::ShareClass,
        "holder_type" | "type" => F::HolderType,
        "shares" | "quantity" | "share_count" | "number_of_shares" => F::Shares,
        "invested" | "cost_basis" | "investment" | "amount_invested" => F::Invested,
        "price_per_share" | "pps" | "share_price" => F::PricePerShare,
        "ownership_pct" | "ownership" | "percent" | "%" => F::OwnershipPct,
        "vesting_start" => F::VestingStart,
        "vesting_end" => F::VestingEnd,
        "vested_shares" | "vested" => F::VestedShares,
        _ => return None,
    };
    Some(field)
}

pub struct GenericClassifier;

impl ColumnClassifier for GenericClassifier {
    fn format(&self) -> SourceFormat {
        SourceFormat::Generic
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        generic_field(column)
    }
}

/// Carta ledger exports (security/certificate oriented).
pub struct CartaClassifier;

impl ColumnClassifier for CartaClassifier {
    fn format(&self) -> SourceFormat {
        SourceFormat::Carta
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        use CanonicalField as F;
        match column {
            "stakeholder_name" => Some(F::Holder),
            "stakeholder_type" | "relationship" => Some(F::HolderType),
            "shares_outstanding" | "outstanding_shares" => Some(F::Shares),
            "issue_price" | "original_issue_price" => Some(F::PricePerShare),
            "cash_paid" => Some(F::Invested),
            "vesting_start_date" => Some(F::VestingStart),
            "vesting_end_date" => Some(F::VestingEnd),
            _ => generic_field(column),
        }
    }
}

/// Pulley stakeholder exports (grant oriented).
pub struct PulleyClassifier;

impl ColumnClassifier for PulleyClassifier {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pulley
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        use CanonicalField as F;
        match column {
            "security" | "grant_type" => Some(F::ShareClass),
            "stakeholder_type" | "relationship" => Some(F::HolderType),
            "outstanding" | "granted" => Some(F::Shares),
            "exercise_price" | "purchase_price" => Some(F::PricePerShare),
            "vest_start" => Some(F::VestingStart),
            "vest_end" => Some(F::VestingEnd),
            _ => generic_field(column),
        }
    }
}

// ---------------------------------------------------------------------------
// Holder type inference
// ---------------------------------------------------------------------------

/// Name keywords used to infer a holder's role.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HolderTypeRules {
    pub founder: Vec<String>,
    pub pool: Vec<String>,
    pub investor: Vec<String>,
    pub employee: Vec<String>,
}

impl Default for HolderTypeRules {
    fn default() -> Self {
        let words = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };
        Self {
            founder: words(&["founder"]),
            pool: words(&["pool", "esop", "option"]),
            investor: words(&["ventures", "capital", "partners", "fund", "investor"]),
            employee: words(&["employee"]),
        }
    }
}

impl HolderTypeRules {
    /// Infer a holder type when none was supplied explicitly.
    ///
    /// Precedence is fixed: founder name > pool name > investor-firm name >
    /// preferred class > employee name in a common class > other.
    pub fn infer(&self, holder_name: &str, share_class: &str) -> HolderType {
        let name = holder_name.to_lowercase();
        let class = share_class.to_lowercase();
        let name_has = |words: &[String]| words.iter().any(|w| name.contains(&w.to_lowercase()));

        if name_has(&self.founder) {
            return HolderType::Founder;
        }
        if name_has(&self.pool) {
            return HolderType::Pool;
        }
        if name_has(&self.investor) {
            return HolderType::Investor;
        }
        if class.contains("preferred") {
            return HolderType::Investor;
        }
        if class.contains("common") && name_has(&self.employee) {
            return HolderType::Employee;
        }
        HolderType::Other
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
