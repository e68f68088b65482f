//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Monetary and percentage values are written as plain numbers and turned
//! into `Decimal` when the engine inputs are built.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::engine::round::{AntiDilution, RoundInput, DEFAULT_ROUND_NAME};
use crate::parser::classify::{HolderTypeRules, SourceFormat};
use crate::parser::ParseOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub company: CompanyConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub classification: HolderTypeRules,
    #[serde(default)]
    pub round: Option<RoundConfig>,
    #[serde(default)]
    pub waterfall: WaterfallConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompanyConfig {
    pub name: String,
    /// Defaults to today.
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub path: PathBuf,
    /// "generic", "carta" or "pulley"; detected from headers when absent.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub authorized_shares: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoundConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub investment: f64,
    pub pre_money: f64,
    #[serde(default)]
    pub target_pool_pct: Option<f64>,
    #[serde(default = "default_liquidation_preference")]
    pub liquidation_preference: f64,
    #[serde(default)]
    pub participating: bool,
    #[serde(default)]
    pub participation_cap: Option<f64>,
    #[serde(default)]
    pub anti_dilution: Option<String>,
    #[serde(default = "default_true")]
    pub pro_rata_rights: bool,
}

fn default_liquidation_preference() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct WaterfallConfig {
    #[serde(default)]
    pub exit_values: Vec<f64>,
    /// Run scenarios on the blocking pool instead of one after another.
    #[serde(default = "default_true")]
    pub concurrent: bool,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            exit_values: Vec::new(),
            concurrent: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn parse_options(&self) -> Result<ParseOptions> {
        let format = self
            .input
            .format
            .as_deref()
            .map(str::parse::<SourceFormat>)
            .transpose()?;
        Ok(ParseOptions {
            company_name: Some(self.company.name.clone()),
            as_of: self.company.as_of,
            authorized_shares: self.input.authorized_shares,
            format,
        })
    }

    /// Round terms, if a `[round]` section is configured.
    pub fn round_input(&self) -> Result<Option<RoundInput>> {
        let Some(round) = &self.round else {
            return Ok(None);
        };
        let name = round.name.clone().unwrap_or_else(|| DEFAULT_ROUND_NAME.to_string());
        let mut input = RoundInput::new(
            name,
            to_decimal("round.investment", round.investment)?,
            to_decimal("round.pre_money", round.pre_money)?,
        );
        input.target_pool_pct = round
            .target_pool_pct
            .map(|v| to_decimal("round.target_pool_pct", v))
            .transpose()?;
        input.liquidation_preference =
            to_decimal("round.liquidation_preference", round.liquidation_preference)?;
        input.participating = round.participating;
        input.participation_cap = round
            .participation_cap
            .map(|v| to_decimal("round.participation_cap", v))
            .transpose()?;
        if let Some(ad) = &round.anti_dilution {
            input.anti_dilution = ad.parse::<AntiDilution>()?;
        }
        input.pro_rata_rights = round.pro_rata_rights;
        Ok(Some(input))
    }

    pub fn exit_values(&self) -> Result<Vec<Decimal>> {
        self.waterfall
            .exit_values
            .iter()
            .map(|&v| to_decimal("waterfall.exit_values", v))
            .collect()
    }
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        bail!("{field} must be a finite number, got {value}");
    }
    Decimal::try_from(value).with_context(|| format!("{field} is out of range: {value}"))
}
