use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connectors::{Cursor, FolderRef, MailConnector, RawMessage};
use crate::error::{SyncError, SyncResult};
use crate::normalize::normalize;
use crate::store::{AttachmentExtractor, RecordStore};
use crate::sync::dedup::Deduplicator;
use crate::sync::CancelFlag;

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub chunk_size: usize,
    /// Persisted records per folder; 0 means no cap.
    pub max_emails: usize,
    /// Disables `max_emails` while walking folders.
    pub load_all: bool,
    /// Fetched items per folder; 0 means no limit.
    pub max_per_folder: usize,
    /// Upper bound on page requests per folder.
    pub max_pages: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_emails: 100,
            load_all: false,
            max_per_folder: 0,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl FetchLimits {
    fn record_cap(&self) -> Option<usize> {
        (!self.load_all && self.max_emails > 0).then_some(self.max_emails)
    }

    fn fetch_cap(&self) -> Option<usize> {
        (self.max_per_folder > 0).then_some(self.max_per_folder)
    }
}

/// Why a folder's fetch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    AllConsumed,
    CapReached,
    PerFolderLimit,
    SafetyLimit,
    Cancelled,
    /// The backend does not have this folder.
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderReport {
    pub folder: String,
    pub pages: usize,
    pub fetched: usize,
    pub records_written: usize,
    pub attachments_written: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
    pub termination: Termination,
}

impl FolderReport {
    fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            pages: 0,
            fetched: 0,
            records_written: 0,
            attachments_written: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
            termination: Termination::AllConsumed,
        }
    }
}

/// Everything one folder walk needs, borrowed from the orchestrator.
pub struct FetchContext<'a> {
    pub connector: &'a dyn MailConnector,
    pub store: &'a RecordStore,
    pub extractor: &'a AttachmentExtractor,
    pub cancel: &'a CancelFlag,
    pub since: DateTime<Utc>,
    pub limits: FetchLimits,
}

/// Drive one folder to completion.
///
/// Items stream through normalize, dedup, persist and attachment extraction
/// as each page arrives. Only fatal errors (auth, config) are returned; a
/// transport failure ends the folder with [`Termination::Failed`].
pub async fn fetch_folder(
    ctx: &FetchContext<'_>,
    folder: &FolderRef,
    dedup: &mut Deduplicator,
) -> SyncResult<FolderReport> {
    let limits = ctx.limits;
    let mut report = FolderReport::new(&folder.name);
    let mut cursor = Cursor::start();

    let termination = 'pages: loop {
        if ctx.cancel.is_cancelled() {
            break 'pages Termination::Cancelled;
        }
        if report.pages >= limits.max_pages {
            warn!(folder = %folder.name, pages = report.pages, "page ceiling reached, stopping folder");
            break 'pages Termination::SafetyLimit;
        }

        let page = match ctx
            .connector
            .fetch_page(folder, ctx.since, limits.chunk_size, cursor)
            .await
        {
            Ok(page) => page,
            Err(SyncError::NotFound(what)) if report.pages == 0 => {
                info!(folder = %folder.name, %what, "folder not on this mailbox, skipping");
                break 'pages Termination::Missing;
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(folder = %folder.name, offset = cursor.offset, error = %err, "page fetch failed, abandoning folder");
                report.errors.push(format!("folder={} error={err}", folder.name));
                break 'pages Termination::Failed(err.to_string());
            }
        };
        report.pages += 1;

        if page.returned == 0 && page.items.is_empty() {
            break 'pages Termination::AllConsumed;
        }

        for raw in &page.items {
            if ctx.cancel.is_cancelled() {
                break 'pages Termination::Cancelled;
            }
            if limits.fetch_cap().is_some_and(|cap| report.fetched >= cap) {
                break 'pages Termination::PerFolderLimit;
            }
            report.fetched += 1;

            process_item(ctx, folder, raw, dedup, &mut report).await;

            if limits
                .record_cap()
                .is_some_and(|cap| report.records_written >= cap)
            {
                break 'pages Termination::CapReached;
            }
        }

        info!(
            folder = %folder.name,
            page = report.pages,
            offset = cursor.offset,
            returned = page.returned,
            persisted = report.records_written,
            "page processed"
        );

        if limits.fetch_cap().is_some_and(|cap| report.fetched >= cap) {
            break 'pages Termination::PerFolderLimit;
        }
        match page.next {
            Some(next) if page.returned >= limits.chunk_size => cursor = next,
            _ => break 'pages Termination::AllConsumed,
        }
    };

    report.termination = termination;
    info!(
        folder = %folder.name,
        pages = report.pages,
        fetched = report.fetched,
        persisted = report.records_written,
        attachments = report.attachments_written,
        termination = ?report.termination,
        "folder finished"
    );
    Ok(report)
}

async fn process_item(
    ctx: &FetchContext<'_>,
    folder: &FolderRef,
    raw: &RawMessage,
    dedup: &mut Deduplicator,
    report: &mut FolderReport,
) {
    let record = normalize(raw, &folder.name);

    if !dedup.should_persist_message(&record.id) {
        debug!(folder = %folder.name, message_id = %record.id, "duplicate message, skipping");
        report.duplicates_skipped += 1;
        return;
    }

    let path = match ctx.store.persist(&record) {
        Ok(path) => path,
        Err(err) => {
            dedup.release_message(&record.id);
            warn!(folder = %folder.name, message_id = %record.id, error = %err, "record write failed");
            report
                .errors
                .push(format!("message={} error={err}", record.id));
            return;
        }
    };
    dedup.mark_message_persisted(&record.id, &folder.name, &path);
    report.records_written += 1;

    if record.attachment_refs.is_empty() {
        return;
    }
    let outcome = ctx.extractor.extract(ctx.connector, &record, dedup).await;
    report.attachments_written += outcome.written.len();
    report.duplicates_skipped += outcome.duplicates;
    report.errors.extend(outcome.errors);
}
