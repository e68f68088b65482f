//! Cap table parser: raw tabular holder records → canonical `CapTable`.
//!
//! Column names are resolved through a `ColumnClassifier`, holder roles
//! through `HolderTypeRules`. Bad rows never abort a parse: they are skipped
//! or defaulted and reported as `DataQualityWarning`s next to the table.

pub mod classify;

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::types::{
    percent_of, round_pct, CapTable, DataQualityWarning, Holder, HolderType, ShareClass,
};
use classify::{
    classifier_for, detect_format, normalize_column, CanonicalField, ColumnClassifier,
    HolderTypeRules, SourceFormat,
};

const DEFAULT_HOLDER_NAME: &str = "Unknown";
const DEFAULT_SHARE_CLASS: &str = "common";
const DEFAULT_COMPANY_NAME: &str = "Unknown";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Tabular input: one header row plus data rows of string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }
}

/// Caller-supplied facts the records do not carry.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub company_name: Option<String>,
    /// Defaults to today when absent.
    pub as_of: Option<NaiveDate>,
    pub authorized_shares: Option<u64>,
    /// Force a format instead of detecting it from the headers.
    pub format: Option<SourceFormat>,
}

/// Parser output: the table plus everything that went wrong on the way.
#[derive(Debug, Clone)]
pub struct ParsedCapTable {
    pub table: CapTable,
    pub format: SourceFormat,
    pub warnings: Vec<DataQualityWarning>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A row after column resolution, before table-level derivations.
struct RowDraft {
    row: usize,
    name: String,
    share_class: String,
    shares: u64,
    price_per_share: Decimal,
    invested: Decimal,
    ownership_pct: Option<Decimal>,
    explicit_type: Option<String>,
    vesting_start: Option<NaiveDate>,
    vesting_end: Option<NaiveDate>,
    vested_shares: u64,
    extra: BTreeMap<String, String>,
}

pub struct CapTableParser {
    rules: HolderTypeRules,
    classifier: Option<Box<dyn ColumnClassifier>>,
}

impl Default for CapTableParser {
    fn default() -> Self {
        Self::new(HolderTypeRules::default())
    }
}

impl CapTableParser {
    pub fn new(rules: HolderTypeRules) -> Self {
        Self {
            rules,
            classifier: None,
        }
    }

    /// Use a specific classifier for every parse, bypassing detection.
    pub fn with_classifier(mut self, classifier: Box<dyn ColumnClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Parse a raw table into a canonical cap table.
    pub fn parse(&self, input: &RawTable, options: &ParseOptions) -> ParsedCapTable {
        let detected;
        let classifier: &dyn ColumnClassifier = match &self.classifier {
            Some(c) => c.as_ref(),
            None => {
                let format = options.format.unwrap_or_else(|| detect_format(&input.headers));
                detected = classifier_for(format);
                detected.as_ref()
            }
        };
        let format = classifier.format();

        // Resolve each column once; a field claimed twice keeps the first column.
        let columns: Vec<(String, Option<CanonicalField>)> = {
            let mut claimed: Vec<CanonicalField> = Vec::new();
            input
                .headers
                .iter()
                .map(|h| {
                    let norm = normalize_column(h);
                    let field = classifier
                        .canonical_field(&norm)
                        .filter(|f| !claimed.contains(f));
                    if let Some(f) = field {
                        claimed.push(f);
                    }
                    (norm, field)
                })
                .collect()
        };

        let mut warnings = Vec::new();
        let mut total_shares: u64 = 0;
        let mut drafts: Vec<RowDraft> = Vec::new();
        for (i, cells) in input.rows.iter().enumerate() {
            let Some(d) = read_row(i + 1, cells, &columns, &mut warnings) else {
                continue;
            };
            match total_shares.checked_add(d.shares) {
                Some(total) => {
                    total_shares = total;
                    drafts.push(d);
                }
                None => {
                    warnings.push(DataQualityWarning::SkippedRecord {
                        row: d.row,
                        reason: format!("{} shares overflow the table total", d.shares),
                    });
                }
            }
        }

        let holders: Vec<Holder> = drafts
            .into_iter()
            .map(|d| self.build_holder(d, total_shares, &mut warnings))
            .collect();

        // Classes in order of first appearance.
        let mut share_classes: Vec<ShareClass> = Vec::new();
        for h in &holders {
            if !share_classes.iter().any(|c| c.name == h.share_class) {
                share_classes.push(ShareClass::from_label(&h.share_class));
            }
        }
        for class in &mut share_classes {
            class.refresh_totals(&holders);
        }

        let option_pool_shares: u64 = holders
            .iter()
            .filter(|h| h.holder_type == HolderType::Pool)
            .map(|h| h.shares)
            .sum();
        let option_pool_pct = percent_of(option_pool_shares, total_shares)
            .map(round_pct)
            .unwrap_or(Decimal::ZERO);

        let total_shares_authorized = match options.authorized_shares {
            Some(authorized) if authorized < total_shares => {
                warnings.push(DataQualityWarning::AuthorizedBelowOutstanding {
                    authorized,
                    outstanding: total_shares,
                });
                total_shares
            }
            Some(authorized) => authorized,
            None => total_shares,
        };

        let table = CapTable {
            company_name: options
                .company_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPANY_NAME.to_string()),
            as_of_date: options
                .as_of
                .unwrap_or_else(|| chrono::Local::now().date_naive()),
            total_shares_authorized,
            total_shares_outstanding: total_shares,
            fully_diluted_shares: total_shares,
            option_pool_shares,
            option_pool_pct,
            share_classes,
            holders,
        };

        if let Some(w) = table.ownership_warning() {
            warn!(warning = %w, "Ownership percentages out of range");
            warnings.push(w);
        }

        info!(
            format = %format,
            holders = table.holders.len(),
            classes = table.share_classes.len(),
            total_shares = table.total_shares_outstanding,
            pool_pct = %table.option_pool_pct,
            warnings = warnings.len(),
            "Cap table parsed"
        );

        ParsedCapTable {
            table,
            format,
            warnings,
        }
    }

    fn build_holder(
        &self,
        draft: RowDraft,
        total_shares: u64,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Holder {
        let holder_type = match draft.explicit_type.as_deref() {
            Some(raw) => raw.parse::<HolderType>().unwrap_or_else(|_| {
                warnings.push(DataQualityWarning::UnknownHolderType {
                    row: draft.row,
                    value: raw.to_string(),
                });
                self.rules.infer(&draft.name, &draft.share_class)
            }),
            None => self.rules.infer(&draft.name, &draft.share_class),
        };

        let supplied = draft.ownership_pct.filter(|p| !p.is_zero());
        let ownership = match (supplied, percent_of(draft.shares, total_shares)) {
            (Some(p), _) => p,
            (None, Some(computed)) => computed,
            (None, None) => Decimal::ZERO,
        };
        let ownership_pct = round_pct(ownership);

        debug!(
            row = draft.row,
            holder = %draft.name,
            holder_type = %holder_type,
            shares = draft.shares,
            ownership = %ownership_pct,
            "Holder parsed"
        );

        Holder {
            name: draft.name,
            holder_type,
            share_class: draft.share_class,
            shares: draft.shares,
            price_per_share: draft.price_per_share,
            invested: draft.invested,
            ownership_pct,
            fully_diluted_pct: ownership_pct,
            vesting_start: draft.vesting_start,
            vesting_end: draft.vesting_end,
            vested_shares: draft.vested_shares,
            extra: draft.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Row reading
// ---------------------------------------------------------------------------

/// Read one data row. Returns `None` (with a warning) when the row is dropped.
fn read_row(
    row: usize,
    cells: &[String],
    columns: &[(String, Option<CanonicalField>)],
    warnings: &mut Vec<DataQualityWarning>,
) -> Option<RowDraft> {
    if cells.iter().all(|c| c.trim().is_empty()) {
        warnings.push(DataQualityWarning::SkippedRecord {
            row,
            reason: "empty row".to_string(),
        });
        return None;
    }

    let mut fields: BTreeMap<&'static str, &str> = BTreeMap::new();
    let mut extra = BTreeMap::new();
    for (idx, (column, field)) in columns.iter().enumerate() {
        let cell = cells.get(idx).map(|c| c.trim()).unwrap_or("");
        match field {
            Some(f) => {
                fields.insert(f.as_str(), cell);
            }
            None => {
                extra.insert(column.clone(), cell.to_string());
            }
        }
    }
    let text = |f: CanonicalField| fields.get(f.as_str()).copied().filter(|s| !s.is_empty());

    let number = |f: CanonicalField, warnings: &mut Vec<DataQualityWarning>| {
        let raw = text(f)?;
        match parse_decimal(raw) {
            Some(v) => Some(v),
            None => {
                warnings.push(DataQualityWarning::DefaultedField {
                    row,
                    field: f.as_str().to_string(),
                    raw: raw.to_string(),
                });
                None
            }
        }
    };

    let shares = number(CanonicalField::Shares, warnings).unwrap_or(Decimal::ZERO);
    if shares.is_sign_negative() && !shares.is_zero() {
        warnings.push(DataQualityWarning::SkippedRecord {
            row,
            reason: format!("negative share count {shares}"),
        });
        return None;
    }
    if !shares.fract().is_zero() {
        warnings.push(DataQualityWarning::DefaultedField {
            row,
            field: CanonicalField::Shares.as_str().to_string(),
            raw: shares.to_string(),
        });
    }
    let Some(shares) = shares.trunc().to_u64() else {
        warnings.push(DataQualityWarning::SkippedRecord {
            row,
            reason: format!("share count {shares} out of range"),
        });
        return None;
    };

    let non_negative = |f: CanonicalField, warnings: &mut Vec<DataQualityWarning>| {
        let value = number(f, warnings)?;
        if value < Decimal::ZERO {
            warnings.push(DataQualityWarning::DefaultedField {
                row,
                field: f.as_str().to_string(),
                raw: value.to_string(),
            });
            return None;
        }
        Some(value)
    };

    let price_per_share =
        non_negative(CanonicalField::PricePerShare, warnings).unwrap_or(Decimal::ZERO);
    let invested = non_negative(CanonicalField::Invested, warnings).unwrap_or(Decimal::ZERO);
    let vested_shares = non_negative(CanonicalField::VestedShares, warnings)
        .and_then(|v| v.trunc().to_u64())
        .unwrap_or(0);

    let ownership_pct = non_negative(CanonicalField::OwnershipPct, warnings).and_then(|p| {
        if p > Decimal::ONE_HUNDRED {
            warnings.push(DataQualityWarning::DefaultedField {
                row,
                field: CanonicalField::OwnershipPct.as_str().to_string(),
                raw: p.to_string(),
            });
            None
        } else {
            Some(p)
        }
    });

    let mut date = |f: CanonicalField| {
        let raw = text(f)?;
        let parsed = DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok());
        if parsed.is_none() {
            warnings.push(DataQualityWarning::DefaultedField {
                row,
                field: f.as_str().to_string(),
                raw: raw.to_string(),
            });
        }
        parsed
    };
    let vesting_start = date(CanonicalField::VestingStart);
    let vesting_end = date(CanonicalField::VestingEnd);

    Some(RowDraft {
        row,
        name: text(CanonicalField::Holder)
            .unwrap_or(DEFAULT_HOLDER_NAME)
            .to_string(),
        share_class: text(CanonicalField::ShareClass)
            .unwrap_or(DEFAULT_SHARE_CLASS)
            .to_string(),
        shares,
        price_per_share,
        invested,
        ownership_pct,
        explicit_type: text(CanonicalField::HolderType).map(str::to_string),
        vesting_start,
        vesting_end,
        vested_shares,
        extra,
    })
}

/// Lenient numeric cell reader: `$1,250.00`, `12.5%`, `(300)`, `1e6`.
/// Blank and NaN-like cells read as absent.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%' | ' ' | '_'))
        .collect();
    let (negative, body) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner.to_string()),
        None => (false, cleaned),
    };
    let value = Decimal::from_str(&body)
        .or_else(|_| Decimal::from_scientific(&body))
        .ok()?;
    Some(if negative { -value } else { value })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
