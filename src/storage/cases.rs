//! JSON seed file for historical reference cases.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::types::HistoricalCase;

/// Read reference cases from a JSON array on disk.
///
/// A missing file is not an error: the replay falls back to synthetic
/// flat cases, so an empty set is returned with a warning.
pub fn load_cases_file(path: &Path) -> Result<Vec<HistoricalCase>> {
    if !path.exists() {
        warn!(path = %path.display(), "No historical case file, replay will use synthetic cases");
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read case file {}", path.display()))?;
    let cases: Vec<HistoricalCase> = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse case file {}", path.display()))?;
    info!(path = %path.display(), count = cases.len(), "Historical cases loaded");
    Ok(cases)
}
