use anyhow::Result;

use crate::corpus::{CorpusSummary, SearchHit};
use crate::sync::SyncReport;

pub fn format_search_results(hits: &[SearchHit]) -> Result<String> {
    Ok(serde_json::to_string_pretty(hits)?)
}

pub fn format_summary(summary: &CorpusSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// The report plus its derived outcome, so scripts need not recompute it.
pub fn format_sync_report(report: &SyncReport) -> Result<String> {
    let mut value = serde_json::to_value(report)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("outcome".to_string(), serde_json::to_value(report.outcome())?);
    }
    Ok(serde_json::to_string_pretty(&value)?)
}
