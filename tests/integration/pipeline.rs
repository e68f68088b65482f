//! End-to-end pipeline tests against known cap table scenarios.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

use captable::config::AppConfig;
use captable::engine::batch::run_scenarios;
use captable::engine::round::{RoundInput, RoundModeler};
use captable::engine::summary::summarize;
use captable::engine::waterfall::WaterfallEngine;
use captable::parser::classify::{CanonicalField, SourceFormat};
use captable::parser::CapTableParser;
use captable::storage::{self, RoundDocument};
use captable::types::{CapTable, HolderType, OWNERSHIP_SUM_MAX, OWNERSHIP_SUM_MIN};

use crate::fixtures::{self, FixedClassifier};

fn assert_close(a: Decimal, b: Decimal) {
    assert!((a - b).abs() < dec!(0.000001), "{a} != {b}");
}

fn assert_table_invariants(table: &CapTable) {
    assert_eq!(table.holder_shares(), table.total_shares_outstanding);
    assert_eq!(table.fully_diluted_shares, table.total_shares_outstanding);
    for h in &table.holders {
        assert!(h.ownership_pct >= Decimal::ZERO && h.ownership_pct <= dec!(100), "{h}");
    }
    let sum = table.ownership_sum();
    assert!(sum >= OWNERSHIP_SUM_MIN && sum <= OWNERSHIP_SUM_MAX, "sum {sum}");
    assert!(table.validate().is_ok());
}

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[test]
fn test_parsed_tables_hold_invariants() {
    for export in [
        fixtures::founders_export(),
        fixtures::seed_export(),
        fixtures::growth_export(),
        fixtures::carta_export(),
    ] {
        let parsed = fixtures::parse(&export);
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        assert_table_invariants(&parsed.table);
    }
}

#[test]
fn test_carta_export() {
    let parsed = fixtures::parse(&fixtures::carta_export());
    assert_eq!(parsed.format, SourceFormat::Carta);
    let t = &parsed.table;
    assert_eq!(t.holders[0].holder_type, HolderType::Founder);
    assert_eq!(t.holders[1].holder_type, HolderType::Employee);
    assert_eq!(t.holders[2].holder_type, HolderType::Investor);
    assert_eq!(t.holders[2].invested, dec!(4000000));
    assert_eq!(t.holders[0].extra.get("certificate").map(String::as_str), Some("CS-1"));
    assert_eq!(t.share_classes.len(), 2);
}

#[test]
fn test_custom_classifier() {
    let classifier = FixedClassifier::new(&[
        ("who", CanonicalField::Holder),
        ("units", CanonicalField::Shares),
        ("series", CanonicalField::ShareClass),
    ]);
    let raw = fixtures::raw(
        &["Who", "Units", "Series"],
        &[&["Founder X", "750", "Common"], &["Pool", "250", "Options"]],
    );
    let parsed = CapTableParser::default()
        .with_classifier(Box::new(classifier))
        .parse(&raw, &fixtures::options());
    assert_eq!(parsed.table.total_shares_outstanding, 1_000);
    assert_eq!(parsed.table.holders[0].holder_type, HolderType::Founder);
    assert_eq!(parsed.table.option_pool_pct, dec!(25));
}

// ---------------------------------------------------------------------------
// Round modeler
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_a_priced_round() {
    let table = fixtures::parse(&fixtures::founders_export()).table;
    let model = RoundModeler::model(
        &table,
        &RoundInput::new("Series A", dec!(2000000), dec!(8000000)),
    )
    .unwrap();

    assert_eq!(model.terms.price_per_share, dec!(0.80));
    assert_eq!(model.terms.new_shares_issued, 2_500_000);
    assert_eq!(model.post_round_table.total_shares_outstanding, 12_500_000);
    let founder_a = model.dilution.iter().find(|d| d.holder_name == "Founder A").unwrap();
    assert_eq!(founder_a.post_round_pct, dec!(48.0));
    assert_eq!(model.new_investor_pct, dec!(20.0));
    assert_table_invariants(&model.post_round_table);
}

#[test]
fn test_round_with_shuffle_dilutes_everyone() {
    let table = fixtures::parse(&fixtures::growth_export()).table;
    let input = RoundInput::new("Series C", dec!(12000000), dec!(60000000))
        .with_pool_target(dec!(15));
    let model = RoundModeler::model(&table, &input).unwrap();

    // 12.5% → 15% of 12M fully diluted.
    assert_eq!(model.terms.option_pool_increase_shares, 300_000);
    let implied = model.terms.price_per_share
        * Decimal::from(model.terms.shares_after_pool_shuffle);
    assert!(((implied - dec!(60000000)) / dec!(60000000)).abs() < dec!(0.000001));

    for d in &model.dilution {
        assert!(d.post_round_pct < d.pre_round_pct, "{d}");
    }
    let post = &model.post_round_table;
    assert_table_invariants(post);
    assert_eq!(post.class("preferred_series_c").unwrap().seniority, 3);
    assert_eq!(post.option_pool_shares, 1_800_000);
    // Input table untouched.
    assert_eq!(table.total_shares_outstanding, 12_000_000);
}

#[test]
fn test_round_is_pure() {
    let table = fixtures::parse(&fixtures::growth_export()).table;
    let input = RoundInput::new("Series C", dec!(7777777), dec!(33333333)).with_pool_target(dec!(20));
    let a = RoundModeler::model(&table, &input).unwrap();
    let b = RoundModeler::model(&table, &input).unwrap();
    assert_eq!(a.terms, b.terms);
    assert_eq!(a.post_round_table, b.post_round_table);
}

// ---------------------------------------------------------------------------
// Waterfall
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_b_preference_takes_all() {
    let table = fixtures::parse(&fixtures::seed_export()).table;
    let s = WaterfallEngine::compute(&table, dec!(3000000)).unwrap();
    assert_eq!(s.holder("Fund I").unwrap().proceeds, dec!(3000000));
    assert_eq!(s.holder("Founder").unwrap().proceeds, Decimal::ZERO);
    assert_eq!(s.remaining, Decimal::ZERO);
}

#[test]
fn test_scenario_c_preference_plus_residual() {
    let table = fixtures::parse(&fixtures::seed_export()).table;
    let s = WaterfallEngine::compute(&table, dec!(50000000)).unwrap();
    let fund = s.holder("Fund I").unwrap();
    assert_eq!(fund.preference_proceeds, dec!(5000000));
    assert_close(fund.residual_proceeds, dec!(9000000));
    assert_close(fund.proceeds, dec!(14000000));
    assert_close(s.holder("Founder").unwrap().proceeds, dec!(36000000));
}

#[test]
fn test_growth_table_waterfall() {
    let table = fixtures::parse(&fixtures::growth_export()).table;

    // Series B is senior and absorbs a small exit entirely.
    let small = WaterfallEngine::compute(&table, dec!(4000000)).unwrap();
    assert_close(small.holder("Alpha Partners").unwrap().proceeds, dec!(3333333.333333));
    assert_close(small.holder("Beta Ventures").unwrap().proceeds, dec!(666666.666667));
    assert_eq!(small.holder("Seed Capital").unwrap().proceeds, Decimal::ZERO);
    assert_eq!(small.holder("Jane Founder").unwrap().proceeds, Decimal::ZERO);

    // 7M of preferences, then 30M over 12M shares = 2.50/share.
    let large = WaterfallEngine::compute(&table, dec!(37000000)).unwrap();
    assert_eq!(large.holder("Jane Founder").unwrap().proceeds, dec!(12500000));
    assert_eq!(large.holder("Alpha Partners").unwrap().proceeds, dec!(8125000));
    assert_eq!(large.holder("Option Pool").unwrap().proceeds, dec!(3750000));
    assert_eq!(large.class("Series B Preferred").unwrap().preference_paid, dec!(6000000));
}

#[test]
fn test_waterfall_properties_over_exit_sweep() {
    let table = fixtures::parse(&fixtures::growth_export()).table;
    let exits: Vec<Decimal> = (0..=40).map(|i| Decimal::from(i) * dec!(1250000)).collect();
    let scenarios = WaterfallEngine::run_batch(&table, &exits).unwrap();

    for (s, exit) in scenarios.iter().zip(&exits) {
        let total: Decimal = s.holders.iter().map(|h| h.proceeds).sum();
        assert_eq!(total + s.remaining, *exit);
        assert!(s.remaining.abs() < dec!(0.0001));
        if exit.is_zero() {
            assert!(s.holders.iter().all(|h| h.proceeds.is_zero()));
        }
        // Once every claim is covered, each preferred holder gets the full preference.
        if *exit >= dec!(7000000) {
            for h in s.holders.iter().filter(|h| h.share_class.contains("Preferred")) {
                assert_close(h.preference_proceeds, h.invested);
            }
        }
    }
    // More exit never pays anyone less.
    for pair in scenarios.windows(2) {
        for (lo, hi) in pair[0].holders.iter().zip(&pair[1].holders) {
            assert!(hi.proceeds >= lo.proceeds, "{lo} vs {hi}");
        }
    }
}

#[test]
fn test_round_then_waterfall() {
    let table = fixtures::parse(&fixtures::founders_export()).table;
    let model = RoundModeler::model(
        &table,
        &RoundInput::new("Series A", dec!(2000000), dec!(8000000)),
    )
    .unwrap();
    let s = WaterfallEngine::compute(&model.post_round_table, dec!(10000000)).unwrap();
    let investor = s.holder("Series A Investor").unwrap();
    assert_eq!(investor.preference_proceeds, dec!(2000000));
    assert_eq!(investor.residual_proceeds, dec!(1600000));
    assert_eq!(s.holder("Founder A").unwrap().proceeds, dec!(3840000));
    assert_close(investor.return_multiple.unwrap(), dec!(0.8));
}

#[tokio::test]
async fn test_concurrent_batch_matches_sequential() {
    let table = fixtures::parse(&fixtures::growth_export()).table;
    let exits = vec![dec!(0), dec!(4000000), dec!(37000000), dec!(250000000), dec!(1)];
    let sequential = WaterfallEngine::run_batch(&table, &exits).unwrap();
    let concurrent = run_scenarios(Arc::new(table), &exits).await.unwrap();
    assert_eq!(concurrent, sequential);
}

// ---------------------------------------------------------------------------
// Demo data and documents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_demo_pipeline() {
    let cfg = AppConfig::load(repo_path("config.toml").to_str().unwrap()).unwrap();
    let raw = storage::read_csv(repo_path(cfg.input.path.to_str().unwrap())).unwrap();
    let parsed = CapTableParser::new(cfg.classification.clone())
        .parse(&raw, &cfg.parse_options().unwrap());

    assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
    let table = parsed.table;
    assert_table_invariants(&table);
    assert_eq!(table.total_shares_outstanding, 10_000_000);
    assert_eq!(table.total_shares_authorized, 15_000_000);
    assert_eq!(table.option_pool_pct, dec!(10));
    assert_eq!(summarize(&table).implied_valuation, Some(dec!(10000000)));

    let input = cfg.round_input().unwrap().unwrap();
    let model = RoundModeler::model(&table, &input).unwrap();
    assert_eq!(model.terms.option_pool_increase_shares, 250_000);
    assert!(model.terms.new_shares_issued.abs_diff(2_562_500) <= 1);
    assert_table_invariants(&model.post_round_table);

    let exits = cfg.exit_values().unwrap();
    let post = Arc::new(model.post_round_table.clone());
    let scenarios = run_scenarios(Arc::clone(&post), &exits).await.unwrap();
    assert_eq!(scenarios.len(), exits.len());

    let mut path = std::env::temp_dir();
    path.push(format!("captable_demo_{}.json", uuid::Uuid::new_v4()));
    storage::save_document(
        &RoundDocument {
            round: model,
            generated_at: chrono::Utc::now(),
        },
        &path,
    )
    .unwrap();
    let reloaded = storage::load_cap_table(&path).unwrap();
    assert_eq!(reloaded.total_shares_outstanding, post.total_shares_outstanding);
    assert_eq!(reloaded.holders.len(), post.holders.len());
    std::fs::remove_file(&path).unwrap();
}
