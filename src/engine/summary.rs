//! Headline metrics for a cap table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{CapTable, HolderType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapTableSummary {
    pub company_name: String,
    pub total_shares_outstanding: u64,
    pub fully_diluted_shares: u64,
    pub option_pool_pct: Decimal,
    pub share_class_count: usize,
    pub holder_count: usize,
    /// Summed stored ownership percentages per holder type.
    pub ownership_by_type: BTreeMap<HolderType, Decimal>,
    pub total_invested: Decimal,
    /// Latest preferred price × fully diluted shares, when any preferred was priced.
    pub implied_valuation: Option<Decimal>,
}

impl fmt::Display for CapTableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} holders in {} classes, {} fd shares, pool {:.2}%, invested ${:.0}",
            self.company_name,
            self.holder_count,
            self.share_class_count,
            self.fully_diluted_shares,
            self.option_pool_pct,
            self.total_invested,
        )?;
        if let Some(v) = self.implied_valuation {
            write!(f, ", implied valuation ${:.0}", v)?;
        }
        Ok(())
    }
}

pub fn summarize(table: &CapTable) -> CapTableSummary {
    let mut ownership_by_type = BTreeMap::new();
    for holder in &table.holders {
        *ownership_by_type.entry(holder.holder_type).or_insert(Decimal::ZERO) +=
            holder.ownership_pct;
    }

    let preferred_price = table
        .holders
        .iter()
        .filter(|h| h.share_class.to_lowercase().contains("preferred"))
        .map(|h| h.price_per_share)
        .max()
        .filter(|p| *p > Decimal::ZERO);

    CapTableSummary {
        company_name: table.company_name.clone(),
        total_shares_outstanding: table.total_shares_outstanding,
        fully_diluted_shares: table.fully_diluted_shares,
        option_pool_pct: table.option_pool_pct,
        share_class_count: table.share_classes.len(),
        holder_count: table.holders.len(),
        ownership_by_type,
        total_invested: table.total_invested(),
        implied_valuation: preferred_price
            .and_then(|p| p.checked_mul(Decimal::from(table.fully_diluted_shares))),
    }
}
