//! Read-side of the record store: load the text records a sync produced,
//! scan them for a query, summarize them, and export them as JSON for
//! prompt construction.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{NO_SUBJECT, UNKNOWN_PARTY};
use crate::store::{parse_record, record_file::RECORD_EXTENSION};

const SUBJECT_SCORE: u32 = 10;
const SENDER_SCORE: u32 = 5;
const BODY_SCORE: u32 = 1;
const TOP_SENDERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusRecord {
    pub file_name: String,
    pub path: PathBuf,
    pub from: String,
    pub to: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub folder: String,
    pub body: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: CorpusRecord,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusSummary {
    pub total_records: usize,
    pub total_words: usize,
    pub average_words: f64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub top_senders: Vec<SenderCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmEntry {
    pub id: String,
    pub date: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    pub word_count: usize,
}

/// All records under one mail directory, newest first.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    records: Vec<CorpusRecord>,
}

impl Corpus {
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("mail directory does not exist: {}", dir.display()));
        }
        let dir_str = dir
            .to_str()
            .ok_or_else(|| anyhow!("mail directory is not valid UTF-8: {}", dir.display()))?;
        let pattern = format!("{}/*.{RECORD_EXTENSION}", glob::Pattern::escape(dir_str));

        let now = Utc::now();
        let mut records = Vec::new();
        for entry in glob::glob(&pattern).with_context(|| format!("scan {}", dir.display()))? {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(error = %err, "unreadable corpus entry");
                    continue;
                }
            };
            match load_record(&path, now) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.file_name.cmp(&b.file_name)));
        info!(dir = %dir.display(), records = records.len(), "corpus loaded");
        Ok(Self { records })
    }

    pub fn from_records(mut records: Vec<CorpusRecord>) -> Self {
        records.sort_by(|a, b| b.date.cmp(&a.date));
        Self { records }
    }

    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-insensitive substring scan. Subject hits outrank sender hits,
    /// which outrank body hits; ties keep newest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .records
            .iter()
            .filter_map(|record| {
                let mut score = 0;
                if record.subject.to_lowercase().contains(&needle) {
                    score += SUBJECT_SCORE;
                }
                if record.from.to_lowercase().contains(&needle) {
                    score += SENDER_SCORE;
                }
                if record.body.to_lowercase().contains(&needle) {
                    score += BODY_SCORE;
                }
                (score > 0).then(|| SearchHit {
                    snippet: build_snippet(&record.body, &needle),
                    record: record.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    pub fn summary(&self) -> CorpusSummary {
        let total_records = self.records.len();
        let total_words: usize = self.records.iter().map(|record| record.word_count).sum();

        let mut senders: HashMap<&str, usize> = HashMap::new();
        for record in &self.records {
            *senders.entry(record.from.as_str()).or_default() += 1;
        }
        let mut top_senders: Vec<SenderCount> = senders
            .into_iter()
            .map(|(sender, count)| SenderCount {
                sender: sender.to_string(),
                count,
            })
            .collect();
        top_senders.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sender.cmp(&b.sender)));
        top_senders.truncate(TOP_SENDERS);

        CorpusSummary {
            total_records,
            total_words,
            average_words: if total_records == 0 {
                0.0
            } else {
                total_words as f64 / total_records as f64
            },
            earliest: self.records.iter().map(|record| record.date).min(),
            latest: self.records.iter().map(|record| record.date).max(),
            top_senders,
        }
    }

    pub fn llm_entries(&self, max: usize) -> Vec<LlmEntry> {
        self.records
            .iter()
            .take(max)
            .map(|record| LlmEntry {
                id: record.file_name.clone(),
                date: record.date.to_rfc3339(),
                from: record.from.clone(),
                subject: record.subject.clone(),
                content: record.body.clone(),
                word_count: record.word_count,
            })
            .collect()
    }

    /// Write the newest `max` records as a JSON array and return how many
    /// were written.
    pub fn export_for_llm(&self, path: &Path, max: usize) -> Result<usize> {
        let entries = self.llm_entries(max);
        let payload = serde_json::to_string_pretty(&entries)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create export directory {}", parent.display()))?;
        }
        fs::write(path, payload).with_context(|| format!("write export {}", path.display()))?;
        info!(path = %path.display(), records = entries.len(), "export written");
        Ok(entries.len())
    }
}

fn load_record(path: &Path, now: DateTime<Utc>) -> Result<CorpusRecord> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed = parse_record(&text);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();

    Ok(CorpusRecord {
        file_name,
        path: path.to_path_buf(),
        from: non_empty_or(parsed.from, UNKNOWN_PARTY),
        to: non_empty_or(parsed.to, UNKNOWN_PARTY),
        date: parsed.date.unwrap_or(now),
        subject: non_empty_or(parsed.subject, NO_SUBJECT),
        folder: parsed.folder,
        word_count: parsed.body.split_whitespace().count(),
        body: parsed.body,
    })
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn build_snippet(body: &str, needle: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let lower = body.to_lowercase();
    // Lowercasing can shift byte offsets for some scripts; only trust the
    // position when the lengths still line up.
    if lower.len() == body.len() {
        if let Some(pos) = lower.find(needle) {
            let start = floor_char_boundary(body, pos.saturating_sub(50));
            let end = ceil_char_boundary(body, (pos + needle.len() + 90).min(body.len()));
            return Some(body[start..end].trim().to_string());
        }
    }

    Some(body.chars().take(140).collect())
}

fn floor_char_boundary(value: &str, mut index: usize) -> usize {
    index = index.min(value.len());
    while index > 0 && !value.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(value: &str, mut index: usize) -> usize {
    index = index.min(value.len());
    while index < value.len() && !value.is_char_boundary(index) {
        index += 1;
    }
    index
}
