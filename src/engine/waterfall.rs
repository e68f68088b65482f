//! Exit waterfall: distributes an exit value across holders.
//!
//! Two passes:
//! 1. Preferred classes, most senior first, collect their preference
//!    (invested × multiple) until the exit value runs out. Each class
//!    payment is split pro rata by shares within the class.
//! 2. Whatever is left is shared by *every* holder pro rata on fully
//!    diluted shares. Preferred holders take part in this pass too.
//!
//! Class terms are rebuilt from the holder list and the class labels, not
//! read from the table's `share_classes`.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use tracing::{debug, info};

use crate::types::{CapResult, CapTable, CapTableError, HolderType, ShareClass, ShareType};

/// Preference multiple applied to every preferred class.
pub const PREFERRED_MULTIPLE: Decimal = dec!(1.0);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Class terms as the waterfall sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallClass {
    pub name: String,
    pub share_type: ShareType,
    pub seniority: u32,
    pub multiple: Decimal,
    pub shares: u64,
    pub invested: Decimal,
}

impl WaterfallClass {
    /// Preference claimed in the first pass.
    pub fn claim(&self) -> Decimal {
        match self.share_type {
            ShareType::Preferred => self.invested.saturating_mul(self.multiple),
            _ => Decimal::ZERO,
        }
    }
}

/// One holder's share of an exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderProceeds {
    pub holder_name: String,
    pub holder_type: HolderType,
    pub share_class: String,
    pub shares: u64,
    pub invested: Decimal,
    pub preference_proceeds: Decimal,
    pub residual_proceeds: Decimal,
    pub proceeds: Decimal,
    /// `proceeds / invested − 1`; `None` when nothing was invested.
    pub return_multiple: Option<Decimal>,
    /// Share of the exit value, 0–100.
    pub proceeds_pct: Decimal,
}

impl fmt::Display for HolderProceeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) ${:.2} ({:.2}%)",
            self.holder_name, self.share_class, self.proceeds, self.proceeds_pct
        )?;
        if let Some(m) = self.return_multiple {
            write!(f, " return {:.2}x", m)?;
        }
        Ok(())
    }
}

/// Per-class totals of an exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProceeds {
    pub share_class: String,
    pub seniority: u32,
    pub preference_paid: Decimal,
    pub residual_paid: Decimal,
    pub total: Decimal,
}

/// Full distribution of one exit value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitScenario {
    pub exit_value: Decimal,
    /// Same order as the table's holders.
    pub holders: Vec<HolderProceeds>,
    pub class_proceeds: Vec<ClassProceeds>,
    pub preference_paid: Decimal,
    pub total_distributed: Decimal,
    /// Exit value not handed out (zero up to rounding).
    pub remaining: Decimal,
}

impl ExitScenario {
    pub fn holder(&self, name: &str) -> Option<&HolderProceeds> {
        self.holders.iter().find(|h| h.holder_name == name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassProceeds> {
        self.class_proceeds.iter().find(|c| c.share_class == name)
    }
}

impl fmt::Display for ExitScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exit ${:.0}: preferences ${:.2}, distributed ${:.2}, remaining ${:.2}",
            self.exit_value, self.preference_paid, self.total_distributed, self.remaining
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct WaterfallEngine;

impl WaterfallEngine {
    /// Rebuild class terms from holders, in first-appearance order.
    pub fn extract_classes(table: &CapTable) -> Vec<WaterfallClass> {
        let mut classes: Vec<WaterfallClass> = Vec::new();
        for holder in &table.holders {
            match classes.iter_mut().find(|c| c.name == holder.share_class) {
                Some(class) => {
                    class.shares = class.shares.saturating_add(holder.shares);
                    class.invested = class.invested.saturating_add(holder.invested);
                }
                None => {
                    let share_type = ShareType::from_label(&holder.share_class);
                    classes.push(WaterfallClass {
                        name: holder.share_class.clone(),
                        share_type,
                        seniority: ShareClass::seniority_for_label(&holder.share_class),
                        multiple: match share_type {
                            ShareType::Preferred => PREFERRED_MULTIPLE,
                            _ => Decimal::ZERO,
                        },
                        shares: holder.shares,
                        invested: holder.invested,
                    });
                }
            }
        }
        classes
    }

    /// Distribute `exit_value` across the table's holders.
    pub fn compute(table: &CapTable, exit_value: Decimal) -> CapResult<ExitScenario> {
        if exit_value < Decimal::ZERO {
            return Err(CapTableError::validation(format!(
                "exit value must be non-negative, got {exit_value}"
            )));
        }
        table.validate()?;
        let fully_diluted = table.fully_diluted_shares;
        if fully_diluted == 0 {
            return Err(CapTableError::computation(
                "fully diluted shares is zero; nothing to distribute against",
            ));
        }

        let classes = Self::extract_classes(table);
        let mut preferred: Vec<&WaterfallClass> =
            classes.iter().filter(|c| c.share_type == ShareType::Preferred).collect();
        // Stable: equal seniority keeps first-appearance order.
        preferred.sort_by_key(|c| Reverse(c.seniority));

        let n = table.holders.len();
        let mut preference = vec![Decimal::ZERO; n];
        let mut residual = vec![Decimal::ZERO; n];
        let mut remaining = exit_value;

        // Pass 1: liquidation preferences
        for class in preferred {
            if remaining <= Decimal::ZERO {
                break;
            }
            let payment = class.claim().min(remaining);
            if payment.is_zero() {
                continue;
            }
            if class.shares == 0 {
                return Err(CapTableError::computation(format!(
                    "preferred class '{}' owed {payment} but holds zero shares",
                    class.name
                )));
            }
            remaining -= payment;
            let class_shares = Decimal::from(class.shares);
            for (i, holder) in table.holders.iter().enumerate() {
                if holder.share_class == class.name {
                    preference[i] += pro_rata(payment, holder.shares, class_shares);
                }
            }
            debug!(
                class = %class.name,
                seniority = class.seniority,
                payment = %format!("${:.2}", payment),
                remaining = %format!("${:.2}", remaining),
                "Preference paid"
            );
        }
        let preference_paid = exit_value - remaining;

        // Pass 2: residual, everyone pro rata on fully diluted shares
        if remaining > Decimal::ZERO {
            let fd = Decimal::from(fully_diluted);
            for (i, holder) in table.holders.iter().enumerate() {
                residual[i] = pro_rata(remaining, holder.shares, fd);
            }
        }

        let holders: Vec<HolderProceeds> = table
            .holders
            .iter()
            .enumerate()
            .map(|(i, h)| -> CapResult<HolderProceeds> {
                let proceeds = preference[i] + residual[i];
                let return_multiple = if h.invested > Decimal::ZERO {
                    let ratio = proceeds.checked_div(h.invested).ok_or_else(|| {
                        CapTableError::computation(format!(
                            "return multiple for '{}' overflows ({proceeds} on {} invested)",
                            h.name, h.invested
                        ))
                    })?;
                    Some(ratio - Decimal::ONE)
                } else {
                    None
                };
                let proceeds_pct = if exit_value > Decimal::ZERO {
                    proceeds / exit_value * dec!(100)
                } else {
                    Decimal::ZERO
                };
                Ok(HolderProceeds {
                    holder_name: h.name.clone(),
                    holder_type: h.holder_type,
                    share_class: h.share_class.clone(),
                    shares: h.shares,
                    invested: h.invested,
                    preference_proceeds: preference[i],
                    residual_proceeds: residual[i],
                    proceeds,
                    return_multiple,
                    proceeds_pct,
                })
            })
            .collect::<CapResult<_>>()?;

        let class_proceeds = classes
            .iter()
            .map(|c| {
                let (pref, resid) = holders
                    .iter()
                    .filter(|h| h.share_class == c.name)
                    .fold((Decimal::ZERO, Decimal::ZERO), |(p, r), h| {
                        (p + h.preference_proceeds, r + h.residual_proceeds)
                    });
                ClassProceeds {
                    share_class: c.name.clone(),
                    seniority: c.seniority,
                    preference_paid: pref,
                    residual_paid: resid,
                    total: pref + resid,
                }
            })
            .collect();

        let total_distributed: Decimal = holders.iter().map(|h| h.proceeds).sum();
        let scenario = ExitScenario {
            exit_value,
            holders,
            class_proceeds,
            preference_paid,
            total_distributed,
            remaining: exit_value - total_distributed,
        };

        info!(scenario = %scenario, holders = n, "Waterfall computed");
        Ok(scenario)
    }

    /// Run several exit values against the same table, in input order.
    pub fn run_batch(table: &CapTable, exit_values: &[Decimal]) -> CapResult<Vec<ExitScenario>> {
        exit_values
            .iter()
            .map(|&exit| Self::compute(table, exit))
            .collect()
    }
}

/// `amount × part / whole`, multiplying first while the product fits.
///
/// `part` never exceeds `whole`, so the divide-first fallback stays below
/// `amount` and cannot overflow.
fn pro_rata(amount: Decimal, part: u64, whole: Decimal) -> Decimal {
    let part = Decimal::from(part);
    match amount.checked_mul(part) {
        Some(scaled) => scaled / whole,
        None => amount * (part / whole),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
