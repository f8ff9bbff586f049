use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use crate::db::Ledger;
use crate::models::MessageId;

/// Run-scoped duplicate suppression, optionally backed by the persistent ledger.
///
/// Every `should_*` check records its key the first time it answers `true`,
/// so a second call with the same key within the run answers `false`.
#[derive(Default)]
pub struct Deduplicator {
    seen_messages: HashSet<String>,
    seen_attachments: HashSet<String>,
    seen_content: HashSet<String>,
    ledger: Option<Ledger>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::default()
        }
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    pub fn should_persist_message(&mut self, id: &MessageId) -> bool {
        if !self.seen_messages.insert(message_key(id)) {
            return false;
        }
        if !id.is_native() {
            return true;
        }
        match self.ledger.as_ref().map(|ledger| ledger.has_message(id.as_str())) {
            Some(Ok(true)) => false,
            Some(Err(err)) => {
                warn!(message_id = %id, error = %err, "ledger lookup failed, treating message as new");
                true
            }
            Some(Ok(false)) | None => true,
        }
    }

    /// Forget a message whose write failed so another copy can still land.
    pub fn release_message(&mut self, id: &MessageId) {
        self.seen_messages.remove(&message_key(id));
    }

    /// Remember a persisted message across runs. Synthesized ids stay in memory only.
    pub fn mark_message_persisted(&self, id: &MessageId, folder: &str, path: &Path) {
        let (MessageId::Native(native), Some(ledger)) = (id, self.ledger.as_ref()) else {
            return;
        };
        if let Err(err) = ledger.record_message(native, folder, path) {
            warn!(message_id = %native, error = %err, "failed to record message in ledger");
        }
    }

    pub fn should_download_attachment(&mut self, attachment_id: &str) -> bool {
        if !self.seen_attachments.insert(attachment_id.to_string()) {
            return false;
        }
        match self
            .ledger
            .as_ref()
            .map(|ledger| ledger.has_attachment(attachment_id))
        {
            Some(Ok(true)) => false,
            Some(Err(err)) => {
                warn!(attachment_id, error = %err, "ledger lookup failed, treating attachment as new");
                true
            }
            Some(Ok(false)) | None => true,
        }
    }

    /// Forget an attachment id whose download failed so a later copy can retry.
    pub fn release_attachment(&mut self, attachment_id: &str) {
        self.seen_attachments.remove(attachment_id);
    }

    pub fn should_write_content(&mut self, content_sha256: &str) -> bool {
        if !self.seen_content.insert(content_sha256.to_string()) {
            return false;
        }
        match self
            .ledger
            .as_ref()
            .map(|ledger| ledger.has_content_hash(content_sha256))
        {
            Some(Ok(true)) => false,
            Some(Err(err)) => {
                warn!(content_sha256, error = %err, "ledger lookup failed, treating content as new");
                true
            }
            Some(Ok(false)) | None => true,
        }
    }

    /// Forget a content hash whose write failed so the same bytes can land
    /// under another attachment id.
    pub fn release_content(&mut self, content_sha256: &str) {
        self.seen_content.remove(content_sha256);
    }

    pub fn mark_attachment_persisted(&self, attachment_id: &str, content_sha256: &str, path: &Path) {
        let Some(ledger) = self.ledger.as_ref() else {
            return;
        };
        if let Err(err) = ledger.record_attachment(attachment_id, content_sha256, path) {
            warn!(attachment_id, error = %err, "failed to record attachment in ledger");
        }
    }

    pub fn messages_seen(&self) -> usize {
        self.seen_messages.len()
    }
}

fn message_key(id: &MessageId) -> String {
    match id {
        MessageId::Native(value) => format!("n:{value}"),
        MessageId::Synthesized(value) => format!("s:{value}"),
    }
}
