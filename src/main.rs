//! captable: cap table modeling from the command line.
//!
//! Entry point. Loads configuration, initialises structured logging, parses
//! the configured cap table export, optionally models a financing round on
//! it, and runs the configured exit scenarios. Every stage writes its JSON
//! document to the output directory.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use captable::config::{self, AppConfig};
use captable::engine::batch::run_scenarios;
use captable::engine::round::RoundModeler;
use captable::engine::summary::summarize;
use captable::engine::waterfall::{ExitScenario, WaterfallEngine};
use captable::parser::CapTableParser;
use captable::storage::{
    self, CapTableDocument, RoundDocument, WaterfallDocument, CAP_TABLE_FILE, ROUND_FILE,
    WATERFALL_FILE,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();
    info!(config = %config_path, company = %cfg.company.name, "captable starting");

    let out_dir = &cfg.output.directory;

    // -- Parse -----------------------------------------------------------

    let raw = storage::read_csv(&cfg.input.path)?;
    let parser = CapTableParser::new(cfg.classification.clone());
    let parsed = parser.parse(&raw, &cfg.parse_options()?);
    for w in &parsed.warnings {
        warn!(warning = %w, "Data quality");
    }
    let summary = summarize(&parsed.table);
    info!(summary = %summary, format = %parsed.format, "Cap table parsed");

    storage::save_document(
        &CapTableDocument {
            cap_table: parsed.table.clone(),
            summary,
            format: parsed.format,
            warnings: parsed.warnings,
            parsed_at: Utc::now(),
        },
        out_dir.join(CAP_TABLE_FILE),
    )?;

    // -- Round -----------------------------------------------------------

    let table = match cfg.round_input()? {
        Some(input) => {
            let model = RoundModeler::model(&parsed.table, &input)?;
            for impact in &model.dilution {
                info!(impact = %impact, "Dilution");
            }
            let post = model.post_round_table.clone();
            storage::save_document(
                &RoundDocument {
                    round: model,
                    generated_at: Utc::now(),
                },
                out_dir.join(ROUND_FILE),
            )?;
            post
        }
        None => parsed.table,
    };

    // -- Waterfall -------------------------------------------------------

    let exits = cfg.exit_values()?;
    if exits.is_empty() {
        info!("No exit values configured, skipping waterfall");
        return Ok(());
    }

    let scenarios = if cfg.waterfall.concurrent {
        run_scenarios(Arc::new(table), &exits).await?
    } else {
        WaterfallEngine::run_batch(&table, &exits)?
    };
    for scenario in &scenarios {
        log_scenario(scenario);
    }
    storage::save_document(
        &WaterfallDocument {
            scenarios,
            generated_at: Utc::now(),
        },
        out_dir.join(WATERFALL_FILE),
    )?;

    info!(output = %out_dir.display(), "captable finished");
    Ok(())
}

/// Log the per-class breakdown of one exit.
fn log_scenario(scenario: &ExitScenario) {
    info!(scenario = %scenario, "Exit scenario");
    for class in &scenario.class_proceeds {
        info!(
            exit = format!("${:.0}", scenario.exit_value),
            class = %class.share_class,
            preference = format!("${:.2}", class.preference_paid),
            residual = format!("${:.2}", class.residual_paid),
            total = format!("${:.2}", class.total),
            "Class proceeds"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("captable=info"));

    let json_logging = std::env::var("CAPTABLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
