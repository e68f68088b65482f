//! Document I/O.
//!
//! Reads tabular cap table exports from CSV and saves/loads the JSON result
//! documents the engine produces (parsed table, round model, exit scenarios).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::round::RoundModel;
use crate::engine::summary::CapTableSummary;
use crate::engine::waterfall::ExitScenario;
use crate::parser::classify::SourceFormat;
use crate::parser::RawTable;
use crate::types::{CapTable, DataQualityWarning};

pub const CAP_TABLE_FILE: &str = "cap_table.json";
pub const ROUND_FILE: &str = "round.json";
pub const WATERFALL_FILE: &str = "waterfall.json";

// ---------------------------------------------------------------------------
// Document envelopes
// ---------------------------------------------------------------------------

/// A parsed cap table with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapTableDocument {
    pub cap_table: CapTable,
    pub summary: CapTableSummary,
    pub format: SourceFormat,
    #[serde(default)]
    pub warnings: Vec<DataQualityWarning>,
    pub parsed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDocument {
    pub round: RoundModel,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallDocument {
    pub scenarios: Vec<ExitScenario>,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CSV input
// ---------------------------------------------------------------------------

/// Read a CSV export into a raw table. Ragged rows are kept as-is.
pub fn read_csv(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open cap table CSV {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header from {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Failed to read CSV record {} in {}", i + 1, path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    info!(path = %path.display(), columns = headers.len(), rows = rows.len(), "CSV loaded");
    Ok(RawTable::new(headers, rows))
}

// ---------------------------------------------------------------------------
// JSON documents
// ---------------------------------------------------------------------------

/// Write any document as pretty JSON, creating parent directories.
pub fn save_document<T: Serialize>(document: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(document).context("Failed to serialise document")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write document to {}", path.display()))?;

    debug!(path = %path.display(), "Document saved");
    Ok(())
}

pub fn load_document<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document from {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse document from {}", path.display()))
}

/// Load a cap table from a parsed-table document, a round document's
/// post-round table, or a bare table.
pub fn load_cap_table(path: impl AsRef<Path>) -> Result<CapTable> {
    let path = path.as_ref();
    let mut value: serde_json::Value = load_document(path)?;

    let (source, inner) = if let Some(t) = value.get_mut("cap_table") {
        ("cap_table", t.take())
    } else if let Some(t) = value
        .get_mut("round")
        .and_then(|r| r.get_mut("post_round_table"))
    {
        ("post_round_table", t.take())
    } else if let Some(t) = value.get_mut("post_round_table") {
        ("post_round_table", t.take())
    } else {
        ("table", value)
    };

    let table: CapTable = serde_json::from_value(inner)
        .with_context(|| format!("No cap table found in {}", path.display()))?;
    info!(path = %path.display(), source, holders = table.holders.len(), "Cap table loaded");
    Ok(table)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
