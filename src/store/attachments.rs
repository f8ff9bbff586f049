use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connectors::MailConnector;
use crate::models::{AttachmentRef, MessageRecord, ACCEPTED_EXTENSION};
use crate::normalize::sanitize_filename;
use crate::store::record_file::{folder_token, FILE_TIMESTAMP_FORMAT};
use crate::store::{fit_stem, free_path, sha256_hex};
use crate::sync::dedup::Deduplicator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentOutcome {
    pub written: Vec<PathBuf>,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

/// Saves accepted attachments of persisted records, one file per unique content.
#[derive(Debug, Clone)]
pub struct AttachmentExtractor {
    dir: PathBuf,
}

impl AttachmentExtractor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A failure on one attachment is logged and recorded; the rest still run.
    pub async fn extract(
        &self,
        connector: &dyn MailConnector,
        record: &MessageRecord,
        dedup: &mut Deduplicator,
    ) -> AttachmentOutcome {
        let mut outcome = AttachmentOutcome::default();

        for attachment in record.attachment_refs.iter().filter(|a| a.is_accepted()) {
            if !dedup.should_download_attachment(&attachment.id) {
                debug!(attachment = %attachment.name, "attachment already saved, skipping");
                outcome.duplicates += 1;
                continue;
            }

            let bytes = match connector.fetch_attachment(record, attachment).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    dedup.release_attachment(&attachment.id);
                    warn!(attachment = %attachment.name, message_id = %record.id, error = %err, "attachment download failed");
                    outcome
                        .errors
                        .push(format!("attachment={} error={err}", attachment.name));
                    continue;
                }
            };

            let content_sha256 = sha256_hex(&bytes);
            if !dedup.should_write_content(&content_sha256) {
                debug!(attachment = %attachment.name, "identical attachment content already saved");
                outcome.duplicates += 1;
                continue;
            }

            match self.write(record, attachment, &bytes, connector.kind().subject_limit()) {
                Ok(path) => {
                    dedup.mark_attachment_persisted(&attachment.id, &content_sha256, &path);
                    info!(path = %path.display(), bytes = bytes.len(), "attachment saved");
                    outcome.written.push(path);
                }
                Err(err) => {
                    dedup.release_attachment(&attachment.id);
                    dedup.release_content(&content_sha256);
                    warn!(attachment = %attachment.name, error = %err, "attachment write failed");
                    outcome
                        .errors
                        .push(format!("attachment={} error={err}", attachment.name));
                }
            }
        }

        outcome
    }

    fn write(
        &self,
        record: &MessageRecord,
        attachment: &AttachmentRef,
        bytes: &[u8],
        name_limit: usize,
    ) -> crate::error::SyncResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let stem = attachment_file_stem(record, &attachment.name, name_limit);
        let path = free_path(&self.dir, &stem, ACCEPTED_EXTENSION, bytes, &attachment.id)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// `<timestamp>--[<folder>]--<name>` with the accepted extension stripped.
pub fn attachment_file_stem(record: &MessageRecord, original_name: &str, name_limit: usize) -> String {
    let name = original_name.trim();
    let base = match name.rsplit_once('.') {
        Some((base, ext)) if ext.eq_ignore_ascii_case(ACCEPTED_EXTENSION) => base,
        _ => name,
    };
    fit_stem(&format!(
        "{}--[{}]--{}",
        record.received_at.format(FILE_TIMESTAMP_FORMAT),
        folder_token(&record.folder_name),
        sanitize_filename(base, name_limit)
    ))
}
