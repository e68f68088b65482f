//! Concurrent exit scenarios.
//!
//! Each exit value runs on tokio's blocking pool against a shared, read-only
//! table. Results come back in the order the exit values were given.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::waterfall::{ExitScenario, WaterfallEngine};
use crate::types::{CapResult, CapTable, CapTableError};

pub async fn run_scenarios(
    table: Arc<CapTable>,
    exit_values: &[Decimal],
) -> CapResult<Vec<ExitScenario>> {
    info!(scenarios = exit_values.len(), "Running exit scenarios");

    let handles = exit_values.iter().map(|&exit| {
        let table = Arc::clone(&table);
        tokio::task::spawn_blocking(move || WaterfallEngine::compute(&table, exit))
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined
                .map_err(|e| CapTableError::Task(e.to_string()))
                .and_then(|scenario| scenario)
        })
        .collect()
}
