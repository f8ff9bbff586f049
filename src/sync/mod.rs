pub mod dedup;
pub mod fetch_loop;
pub mod folders;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::connectors::{BackendKind, MailConnector};
use crate::error::{SyncError, SyncResult};
use crate::store::{AttachmentExtractor, RecordStore};

pub use self::dedup::Deduplicator;
pub use self::fetch_loop::{fetch_folder, FetchContext, FetchLimits, FolderReport, Termination};
pub use self::folders::{plan_folders, FolderSelection, WellKnownFolders};

pub const LAST_RUN_KEY: &str = "last_run";
pub const LAST_RUN_ID_KEY: &str = "last_run_id";

/// Cooperative stop signal, checked between pages and between messages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub since: DateTime<Utc>,
    pub limits: FetchLimits,
    pub selection: FolderSelection,
    pub mail_dir: PathBuf,
    pub attachment_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Written,
    /// Every folder was read and nothing new matched.
    NoMatches,
    /// Failures left nothing on disk.
    NothingWritten,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub folders: Vec<FolderReport>,
    pub records_written: usize,
    pub attachments_written: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl SyncReport {
    fn new(backend: BackendKind) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            backend,
            started_at: now,
            finished_at: now,
            folders: Vec::new(),
            records_written: 0,
            attachments_written: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    fn absorb(&mut self, folder: FolderReport) {
        self.records_written += folder.records_written;
        self.attachments_written += folder.attachments_written;
        self.duplicates_skipped += folder.duplicates_skipped;
        self.errors.extend(folder.errors.iter().cloned());
        if folder.termination == Termination::Cancelled {
            self.cancelled = true;
        }
        self.folders.push(folder);
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.records_written > 0 || self.attachments_written > 0 {
            RunOutcome::Written
        } else if self.errors.is_empty() {
            RunOutcome::NoMatches
        } else {
            RunOutcome::NothingWritten
        }
    }
}

/// Runs one sync of a mailbox: authenticate, plan folders, walk each
/// folder in order, disconnect.
pub struct SyncOrchestrator {
    options: SyncOptions,
    store: RecordStore,
    extractor: AttachmentExtractor,
    cancel: CancelFlag,
}

impl SyncOrchestrator {
    pub fn new(options: SyncOptions) -> Self {
        let store = RecordStore::new(&options.mail_dir);
        let extractor = AttachmentExtractor::new(&options.attachment_dir);
        Self {
            options,
            store,
            extractor,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Auth and config failures abort with `Err`. Everything else lands in
    /// the report and the run carries on with the next folder.
    pub async fn run(
        &self,
        connector: &dyn MailConnector,
        dedup: &mut Deduplicator,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(connector.kind());
        info!(
            run_id = %report.run_id,
            backend = %connector.kind(),
            since = %self.options.since,
            mail_dir = %self.store.dir().display(),
            attachment_dir = %self.extractor.dir().display(),
            "sync started"
        );

        if let Err(err) = connector.authenticate().await {
            error!(backend = %connector.kind(), error = %err, "authentication failed");
            return Err(match err {
                SyncError::Auth(_) | SyncError::Config(_) => err,
                other => SyncError::Auth(other.to_string()),
            });
        }

        let listing = match connector.list_folders().await {
            Ok(listing) => listing,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "folder listing failed");
                report.errors.push(format!("folder listing error={err}"));
                Vec::new()
            }
        };

        let ctx = FetchContext {
            connector,
            store: &self.store,
            extractor: &self.extractor,
            cancel: &self.cancel,
            since: self.options.since,
            limits: self.options.limits,
        };

        let well_known = WellKnownFolders::of(connector);
        for folder in &plan_folders(&listing, &well_known, &self.options.selection) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match fetch_folder(&ctx, folder, dedup).await {
                Ok(folder_report) => report.absorb(folder_report),
                Err(err) => {
                    error!(folder = %folder.name, error = %err, "fatal error, aborting run");
                    self.disconnect(connector).await;
                    return Err(err);
                }
            }
        }

        self.disconnect(connector).await;
        report.finished_at = Utc::now();
        if report.cancelled {
            warn!(run_id = %report.run_id, "sync cancelled");
        }

        if let Some(ledger) = dedup.ledger() {
            let stamp = report.finished_at.to_rfc3339();
            if let Err(err) = ledger
                .set_sync_state(LAST_RUN_KEY, &stamp)
                .and_then(|_| ledger.set_sync_state(LAST_RUN_ID_KEY, &report.run_id))
            {
                warn!(error = %err, "failed to record run in ledger");
            }
        }

        info!(
            run_id = %report.run_id,
            folders = report.folders.len(),
            records = report.records_written,
            attachments = report.attachments_written,
            duplicates = report.duplicates_skipped,
            errors = report.errors.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn disconnect(&self, connector: &dyn MailConnector) {
        if let Err(err) = connector.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
    }
}
