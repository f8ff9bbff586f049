pub mod attachments;
pub mod record_file;

use std::fs;
use std::path::{Path, PathBuf};

use ring::digest::{digest, SHA256};
use tracing::debug;

use crate::error::SyncResult;
use crate::models::MessageRecord;
use crate::normalize::truncate_to_bytes;

pub use self::attachments::{AttachmentExtractor, AttachmentOutcome};
pub use self::record_file::{parse_record, record_file_stem, render_record, ParsedRecord};

/// Byte budget for a file stem. Leaves room under the usual 255-byte name
/// limit for the `--<hash>-<n>.<ext>` clash suffix.
pub const MAX_STEM_BYTES: usize = 200;

/// Cap a stem to [`MAX_STEM_BYTES`] on a char boundary.
pub(crate) fn fit_stem(stem: &str) -> String {
    truncate_to_bytes(stem, MAX_STEM_BYTES)
        .trim_end_matches([' ', '.'])
        .to_string()
}

/// Writes message records as text files under one directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one record and return where it landed.
    ///
    /// A name clash with identical content overwrites in place. A clash with
    /// different content gets a suffix derived from the message id.
    pub fn persist(&self, record: &MessageRecord) -> SyncResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let stem = record_file_stem(record);
        let content = render_record(record);
        let path = free_path(
            &self.dir,
            &stem,
            record_file::RECORD_EXTENSION,
            content.as_bytes(),
            record.id.as_str(),
        )?;

        fs::write(&path, &content)?;
        debug!(path = %path.display(), "record written");
        Ok(path)
    }
}

/// First of `<stem>.<ext>`, `<stem>--<hash>.<ext>`, `<stem>--<hash>-2.<ext>`, ...
/// that is either absent or already holds exactly `content`.
pub(crate) fn free_path(
    dir: &Path,
    stem: &str,
    extension: &str,
    content: &[u8],
    disambiguator: &str,
) -> SyncResult<PathBuf> {
    let plain = dir.join(format!("{stem}.{extension}"));
    if is_free_for(&plain, content)? {
        return Ok(plain);
    }

    let tag = short_hash(disambiguator);
    let mut attempt = 1usize;
    loop {
        let candidate = if attempt == 1 {
            dir.join(format!("{stem}--{tag}.{extension}"))
        } else {
            dir.join(format!("{stem}--{tag}-{attempt}.{extension}"))
        };
        if is_free_for(&candidate, content)? {
            return Ok(candidate);
        }
        attempt += 1;
    }
}

fn is_free_for(path: &Path, content: &[u8]) -> SyncResult<bool> {
    if !path.exists() {
        return Ok(true);
    }
    Ok(fs::read(path)? == content)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    digest(&SHA256, bytes)
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn short_hash(value: &str) -> String {
    sha256_hex(value.as_bytes())[..8].to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::connectors::BackendKind;
    use crate::models::MessageId;
    use crate::normalize::sanitize_filename;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mailpull-store-{}", Uuid::new_v4()))
    }

    fn record(id: &str, body: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::Native(id.to_string()),
            folder_name: "Inbox".to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            subject: "Status".to_string(),
            subject_token: "Status".to_string(),
            body_text: body.to_string(),
            attachment_refs: Vec::new(),
        }
    }

    #[test]
    fn writes_record_under_expected_name() {
        let dir = temp_dir();
        let store = RecordStore::new(&dir);

        let path = store.persist(&record("m1", "hello")).expect("persist");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("2026-04-01-09-00-00--[Inbox]--Status.txt")
        );
        let text = fs::read_to_string(&path).expect("read back");
        assert!(text.ends_with("\n\nhello\n"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn identical_rewrite_keeps_one_file() {
        let dir = temp_dir();
        let store = RecordStore::new(&dir);

        let first = store.persist(&record("m1", "same")).expect("first");
        let second = store.persist(&record("m1", "same")).expect("second");
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(&dir).expect("list").count(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn different_content_on_same_name_gets_suffix() {
        let dir = temp_dir();
        let store = RecordStore::new(&dir);

        let first = store.persist(&record("m1", "one")).expect("first");
        let second = store.persist(&record("m2", "two")).expect("second");
        assert_ne!(first, second);
        let name = second
            .file_name()
            .and_then(|n| n.to_str())
            .expect("file name")
            .to_string();
        assert!(name.starts_with("2026-04-01-09-00-00--[Inbox]--Status--"));
        assert!(fs::read_to_string(&first).expect("first").contains("one"));
        assert!(fs::read_to_string(&second).expect("second").contains("two"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn multibyte_subject_and_folder_stay_under_name_limit() {
        let dir = temp_dir();
        let store = RecordStore::new(&dir);
        let subject = "会議".repeat(50);
        let mut long = record("m1", "first");
        long.folder_name = "受信トレイ/プロジェクト".repeat(6);
        long.subject_token = sanitize_filename(&subject, BackendKind::Ews.subject_limit());
        long.subject = subject;

        let first = store.persist(&long).expect("persist");
        long.id = MessageId::Native("m2".to_string());
        long.body_text = "second".to_string();
        let clashing = store.persist(&long).expect("persist clash");

        for path in [&first, &clashing] {
            let name = path.file_name().and_then(|n| n.to_str()).expect("utf-8 name");
            assert!(name.len() <= 255, "{} bytes: {name}", name.len());
            assert!(name.starts_with("2026-04-01-09-00-00--["));
        }
        assert_ne!(first, clashing);

        let _ = fs::remove_dir_all(dir);
    }
}
