pub mod json;
pub mod table;

use anyhow::Result;

use crate::corpus::{CorpusSummary, SearchHit};
use crate::sync::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn format_search_results(format: OutputFormat, hits: &[SearchHit]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_search_results(hits)),
        OutputFormat::Json => json::format_search_results(hits),
    }
}

pub fn format_summary(format: OutputFormat, summary: &CorpusSummary) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_summary(summary)),
        OutputFormat::Json => json::format_summary(summary),
    }
}

pub fn format_sync_report(format: OutputFormat, report: &SyncReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_report(report)),
        OutputFormat::Json => json::format_sync_report(report),
    }
}
