//! Deterministic cap table exports for integration testing.
//!
//! Builds raw tables the way `storage::read_csv` would hand them over, plus
//! a fixed-mapping `ColumnClassifier` for exercising the classifier seam
//! from outside the crate.

use chrono::NaiveDate;
use std::collections::HashMap;

use captable::parser::classify::{CanonicalField, ColumnClassifier, SourceFormat};
use captable::parser::{CapTableParser, ParseOptions, ParsedCapTable, RawTable};

pub fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
    RawTable::new(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

pub fn options() -> ParseOptions {
    ParseOptions {
        company_name: Some("Acme".to_string()),
        as_of: NaiveDate::from_ymd_opt(2024, 1, 1),
        ..Default::default()
    }
}

pub fn parse(input: &RawTable) -> ParsedCapTable {
    CapTableParser::default().parse(input, &options())
}

/// Two founders, 6M and 4M common.
pub fn founders_export() -> RawTable {
    raw(
        &["Holder", "Share Class", "Shares"],
        &[
            &["Founder A", "Common", "6,000,000"],
            &["Founder B", "Common", "4,000,000"],
        ],
    )
}

/// 8M common plus a $5M Series A preferred position of 2M shares.
pub fn seed_export() -> RawTable {
    raw(
        &["Holder", "Share Class", "Shares", "Invested"],
        &[
            &["Founder", "Common", "8000000", "0"],
            &["Fund I", "Series A Preferred", "2000000", "$5,000,000"],
        ],
    )
}

/// A later-stage table with two preferred series and an option pool.
pub fn growth_export() -> RawTable {
    raw(
        &["Holder", "Share Class", "Shares", "Invested", "Price Per Share"],
        &[
            &["Jane Founder", "Common", "5000000", "", ""],
            &["Sam Founder", "Common", "3000000", "", ""],
            &["Option Pool", "Options", "1500000", "", ""],
            &["Seed Capital", "Seed Preferred", "1000000", "1000000", "1.00"],
            &["Alpha Partners", "Series B Preferred", "1250000", "5000000", "4.00"],
            &["Beta Ventures", "Series B Preferred", "250000", "1000000", "4.00"],
        ],
    )
}

/// Carta-style ledger export with explicit relationships.
pub fn carta_export() -> RawTable {
    raw(
        &[
            "Stakeholder Name",
            "Security Type",
            "Shares Outstanding",
            "Cash Paid",
            "Relationship",
            "Certificate",
        ],
        &[
            &["Ada", "Common", "7000000", "0", "Founder", "CS-1"],
            &["Grace", "Common", "1000000", "0", "Employee", "CS-2"],
            &["Big Fund LP", "Series A Preferred", "2000000", "4000000", "Investor", "PA-1"],
        ],
    )
}

/// Classifier driven by an explicit column → field table.
pub struct FixedClassifier {
    pub format: SourceFormat,
    pub columns: HashMap<String, CanonicalField>,
}

impl FixedClassifier {
    pub fn new(mapping: &[(&str, CanonicalField)]) -> Self {
        Self {
            format: SourceFormat::Generic,
            columns: mapping
                .iter()
                .map(|(c, f)| (c.to_string(), *f))
                .collect(),
        }
    }
}

impl ColumnClassifier for FixedClassifier {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        self.columns.get(column).copied()
    }
}
