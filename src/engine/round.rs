//! Round modeler: prices a financing round against a cap table.
//!
//! Runs the option-pool shuffle, prices the round off the nominal pre-money,
//! issues the new investor's shares, and returns a fresh post-round table
//! together with the dilution each existing holder takes. The input table is
//! never touched.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::types::{
    percent_of, round_pct, CapResult, CapTable, CapTableError, DataQualityWarning, Holder,
    HolderType, ShareClass, ShareType,
};

/// Class that receives shuffle shares when the table has no pool holder yet.
pub const DEFAULT_POOL_CLASS: &str = "Option Pool";
pub const DEFAULT_ROUND_NAME: &str = "Series A";

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Anti-dilution protection granted to the round. Recorded on the terms only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiDilution {
    #[default]
    BroadWeightedAverage,
    NarrowWeightedAverage,
    FullRatchet,
    None,
}

impl std::str::FromStr for AntiDilution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "broad_weighted_average" | "broad" => Ok(AntiDilution::BroadWeightedAverage),
            "narrow_weighted_average" | "narrow" => Ok(AntiDilution::NarrowWeightedAverage),
            "full_ratchet" => Ok(AntiDilution::FullRatchet),
            "none" => Ok(AntiDilution::None),
            _ => Err(anyhow::anyhow!("Unknown anti-dilution provision: {s}")),
        }
    }
}

/// Proposed financing terms.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundInput {
    pub round_name: String,
    pub investment: Decimal,
    pub pre_money: Decimal,
    /// Target post-shuffle option pool, percent of fully diluted shares.
    pub target_pool_pct: Option<Decimal>,
    pub liquidation_preference: Decimal,
    pub participating: bool,
    pub participation_cap: Option<Decimal>,
    pub anti_dilution: AntiDilution,
    pub pro_rata_rights: bool,
}

impl RoundInput {
    pub fn new(round_name: impl Into<String>, investment: Decimal, pre_money: Decimal) -> Self {
        Self {
            round_name: round_name.into(),
            investment,
            pre_money,
            target_pool_pct: None,
            liquidation_preference: Decimal::ONE,
            participating: false,
            participation_cap: None,
            anti_dilution: AntiDilution::default(),
            pro_rata_rights: true,
        }
    }

    pub fn with_pool_target(mut self, pct: Decimal) -> Self {
        self.target_pool_pct = Some(pct);
        self
    }

    pub fn with_preference(mut self, multiple: Decimal, participating: bool) -> Self {
        self.liquidation_preference = multiple;
        self.participating = participating;
        self
    }

    /// Share class label the new investor is issued into.
    pub fn class_name(&self) -> String {
        format!(
            "preferred_{}",
            self.round_name.trim().to_lowercase().replace(' ', "_")
        )
    }

    fn validate(&self) -> CapResult<()> {
        if self.investment <= Decimal::ZERO {
            return Err(CapTableError::validation(format!(
                "investment must be positive, got {}",
                self.investment
            )));
        }
        if self.pre_money <= Decimal::ZERO {
            return Err(CapTableError::validation(format!(
                "pre-money valuation must be positive, got {}",
                self.pre_money
            )));
        }
        if let Some(target) = self.target_pool_pct {
            if target < Decimal::ZERO || target >= Decimal::ONE_HUNDRED {
                return Err(CapTableError::validation(format!(
                    "target option pool must be in [0, 100), got {target}"
                )));
            }
        }
        if self.liquidation_preference < Decimal::ZERO {
            return Err(CapTableError::validation(format!(
                "liquidation preference must be non-negative, got {}",
                self.liquidation_preference
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Priced terms of a modeled round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTerms {
    pub round_name: String,
    pub investment_amount: Decimal,
    pub pre_money_valuation: Decimal,
    /// Pre-money net of the pool expansion.
    pub effective_pre_money: Decimal,
    pub post_money_valuation: Decimal,
    pub price_per_share: Decimal,
    pub shares_after_pool_shuffle: u64,
    pub new_shares_issued: u64,
    pub option_pool_increase_pct: Decimal,
    pub option_pool_increase_shares: u64,
    pub liquidation_preference: Decimal,
    pub participating: bool,
    pub participation_cap: Option<Decimal>,
    pub anti_dilution: AntiDilution,
    pub pro_rata_rights: bool,
}

impl fmt::Display for RoundTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: ${:.0} at ${:.0} pre (${:.0} post) | ${:.4}/share | {} new shares | pool +{:.2}%",
            self.round_name,
            self.investment_amount,
            self.pre_money_valuation,
            self.post_money_valuation,
            self.price_per_share,
            self.new_shares_issued,
            self.option_pool_increase_pct,
        )
    }
}

/// How one pre-existing holder is affected by the round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DilutionImpact {
    pub holder_name: String,
    pub holder_type: HolderType,
    pub pre_round_shares: u64,
    pub pre_round_pct: Decimal,
    pub post_round_shares: u64,
    pub post_round_pct: Decimal,
    /// Percentage points lost (pre − post).
    pub dilution_pct: Decimal,
}

impl fmt::Display for DilutionImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {:.2}% -> {:.2}% (diluted {:.2}%)",
            self.holder_name,
            self.holder_type,
            self.pre_round_pct,
            self.post_round_pct,
            self.dilution_pct,
        )
    }
}

/// Everything the round modeler produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundModel {
    pub terms: RoundTerms,
    pub post_round_table: CapTable,
    pub dilution: Vec<DilutionImpact>,
    pub new_investor_pct: Decimal,
    pub option_pool_post_pct: Decimal,
    #[serde(default)]
    pub warnings: Vec<DataQualityWarning>,
}

/// Result of the pre-money option pool expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolShuffle {
    pub pool_increase_shares: u64,
    pub pool_increase_pct: Decimal,
    pub effective_pre_money: Decimal,
}

/// Expand the pool before pricing when the target exceeds the current pool.
pub fn option_pool_shuffle(
    pre_money: Decimal,
    current_pool_pct: Decimal,
    target_pool_pct: Option<Decimal>,
    fully_diluted_shares: u64,
) -> PoolShuffle {
    let target = match target_pool_pct {
        Some(t) if t > current_pool_pct => t,
        _ => {
            return PoolShuffle {
                pool_increase_shares: 0,
                pool_increase_pct: Decimal::ZERO,
                effective_pre_money: pre_money,
            }
        }
    };

    let additional_pct = target - current_pool_pct;
    let fraction = additional_pct / dec!(100);
    let pool_increase_shares = (Decimal::from(fully_diluted_shares) * fraction)
        .floor()
        .to_u64()
        .unwrap_or(0);

    PoolShuffle {
        pool_increase_shares,
        pool_increase_pct: additional_pct,
        effective_pre_money: pre_money * (Decimal::ONE - fraction),
    }
}

// ---------------------------------------------------------------------------
// Modeler
// ---------------------------------------------------------------------------

pub struct RoundModeler;

impl RoundModeler {
    /// Model a priced round. Fails without producing a table when the
    /// terms or the input table are invalid.
    pub fn model(table: &CapTable, input: &RoundInput) -> CapResult<RoundModel> {
        input.validate()?;
        table.validate()?;

        let pre_shares = table.total_shares_outstanding;
        if pre_shares == 0 {
            return Err(CapTableError::validation(
                "cannot model a round on a table with zero shares outstanding",
            ));
        }
        let round_class = input.class_name();
        if table.class(&round_class).is_some() {
            return Err(CapTableError::validation(format!(
                "share class '{round_class}' already exists on the table"
            )));
        }

        // 1. Pool shuffle
        let current_pool_pct = percent_of(table.option_pool_shares, pre_shares)
            .ok_or_else(|| CapTableError::computation("zero fully diluted shares"))?;
        let shuffle = option_pool_shuffle(
            input.pre_money,
            current_pool_pct,
            input.target_pool_pct,
            pre_shares,
        );
        let shares_after_shuffle = pre_shares
            .checked_add(shuffle.pool_increase_shares)
            .ok_or_else(|| CapTableError::computation("pool increase overflows the share count"))?;

        // 2–4. Price and issue
        let price_per_share = input
            .pre_money
            .checked_div(Decimal::from(shares_after_shuffle))
            .filter(|p| !p.is_zero())
            .ok_or_else(|| {
                CapTableError::computation(format!(
                    "pre-money {} over {shares_after_shuffle} shares has no representable price",
                    input.pre_money
                ))
            })?;
        let new_shares = input
            .investment
            .checked_div(price_per_share)
            .and_then(|n| n.floor().to_u64())
            .ok_or_else(|| {
                CapTableError::computation(format!(
                    "new share count overflows at price {price_per_share}"
                ))
            })?;
        let total_post = shares_after_shuffle.checked_add(new_shares).ok_or_else(|| {
            CapTableError::computation("post-round share count overflows")
        })?;
        let post_money = input
            .pre_money
            .checked_add(input.investment)
            .ok_or_else(|| CapTableError::computation("post-money valuation overflows"))?;

        info!(
            round = %input.round_name,
            price_per_share = %price_per_share.round_dp(6),
            new_shares,
            pool_increase = shuffle.pool_increase_shares,
            total_post,
            "Round priced"
        );

        // 5. Dilution for every pre-existing holder
        let post_pct = |shares: u64| percent_of(shares, total_post).unwrap_or(Decimal::ZERO);
        let dilution: Vec<DilutionImpact> = table
            .holders
            .iter()
            .map(|h| {
                let pre = percent_of(h.shares, pre_shares).unwrap_or(Decimal::ZERO);
                let post = post_pct(h.shares);
                debug!(holder = %h.name, pre = %pre.round_dp(4), post = %post.round_dp(4), "Holder diluted");
                DilutionImpact {
                    holder_name: h.name.clone(),
                    holder_type: h.holder_type,
                    pre_round_shares: h.shares,
                    pre_round_pct: pre,
                    post_round_shares: h.shares,
                    post_round_pct: post,
                    dilution_pct: pre - post,
                }
            })
            .collect();

        // Post-round holders: existing share counts unchanged.
        let mut holders: Vec<Holder> = table
            .holders
            .iter()
            .map(|h| {
                let pct = round_pct(post_pct(h.shares));
                Holder {
                    ownership_pct: pct,
                    fully_diluted_pct: pct,
                    ..h.clone()
                }
            })
            .collect();
        let mut share_classes = table.share_classes.clone();

        if shuffle.pool_increase_shares > 0 {
            let pool_class = table
                .holders
                .iter()
                .find(|h| h.holder_type == HolderType::Pool)
                .map(|h| h.share_class.clone())
                .unwrap_or_else(|| DEFAULT_POOL_CLASS.to_string());
            if !share_classes.iter().any(|c| c.name == pool_class) {
                share_classes.push(ShareClass::from_label(&pool_class));
            }
            holders.push(synthetic_holder(
                format!("{} Option Pool Increase", input.round_name),
                HolderType::Pool,
                pool_class,
                shuffle.pool_increase_shares,
                Decimal::ZERO,
                Decimal::ZERO,
                round_pct(post_pct(shuffle.pool_increase_shares)),
            ));
        }

        // 6. The new investor
        let new_investor_pct = post_pct(new_shares);
        holders.push(synthetic_holder(
            format!("{} Investor", input.round_name),
            HolderType::Investor,
            round_class.clone(),
            new_shares,
            price_per_share,
            input.investment,
            round_pct(new_investor_pct),
        ));
        share_classes.push(ShareClass {
            share_type: ShareType::Preferred,
            price_per_share,
            liquidation_preference: input.liquidation_preference,
            participating: input.participating,
            participation_cap: input.participation_cap,
            seniority: table.max_preferred_seniority() + 1,
            ..ShareClass::from_label(&round_class)
        });
        for class in &mut share_classes {
            class.refresh_totals(&holders);
        }

        // 7. Pool after the round
        let pool_shares = table
            .option_pool_shares
            .saturating_add(shuffle.pool_increase_shares);
        let option_pool_post_pct = post_pct(pool_shares);

        let post_round_table = CapTable {
            company_name: table.company_name.clone(),
            as_of_date: table.as_of_date,
            total_shares_authorized: table.total_shares_authorized.max(total_post),
            total_shares_outstanding: total_post,
            fully_diluted_shares: total_post,
            option_pool_shares: pool_shares,
            option_pool_pct: round_pct(option_pool_post_pct),
            share_classes,
            holders,
        };
        post_round_table.validate()?;

        let mut warnings = Vec::new();
        if let Some(w) = post_round_table.ownership_warning() {
            warn!(warning = %w, round = %input.round_name, "Post-round ownership out of range");
            warnings.push(w);
        }

        let terms = RoundTerms {
            round_name: input.round_name.clone(),
            investment_amount: input.investment,
            pre_money_valuation: input.pre_money,
            effective_pre_money: shuffle.effective_pre_money,
            post_money_valuation: post_money,
            price_per_share,
            shares_after_pool_shuffle: shares_after_shuffle,
            new_shares_issued: new_shares,
            option_pool_increase_pct: shuffle.pool_increase_pct,
            option_pool_increase_shares: shuffle.pool_increase_shares,
            liquidation_preference: input.liquidation_preference,
            participating: input.participating,
            participation_cap: input.participation_cap,
            anti_dilution: input.anti_dilution,
            pro_rata_rights: input.pro_rata_rights,
        };

        info!(
            terms = %terms,
            new_investor_pct = %round_pct(new_investor_pct),
            pool_post_pct = %round_pct(option_pool_post_pct),
            "Round modeled"
        );

        Ok(RoundModel {
            terms,
            post_round_table,
            dilution,
            new_investor_pct,
            option_pool_post_pct,
            warnings,
        })
    }
}

fn synthetic_holder(
    name: String,
    holder_type: HolderType,
    share_class: String,
    shares: u64,
    price_per_share: Decimal,
    invested: Decimal,
    pct: Decimal,
) -> Holder {
    Holder {
        name,
        holder_type,
        share_class,
        shares,
        price_per_share,
        invested,
        ownership_pct: pct,
        fully_diluted_pct: pct,
        vesting_start: None,
        vesting_end: None,
        vested_shares: 0,
        extra: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
