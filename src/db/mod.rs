use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

use self::models::{SeenAttachment, SeenMessage, SyncState};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;

pub const LEDGER_FILE_NAME: &str = ".mailpull.db";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LedgerStats {
    pub messages: i64,
    pub attachments: i64,
}

/// Cross-run memory of persisted message and attachment ids.
///
/// Only native ids are ever recorded. Synthesized ids are unstable across
/// runs and stay in the in-memory sets of a single run.
pub struct Ledger {
    conn: Connection,
    path: PathBuf,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        migrations::migrate(&mut conn)
            .map_err(|e| LedgerError::Config(format!("migration failed: {e:#}")))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)
            .map_err(|e| LedgerError::Config(format!("migration failed: {e:#}")))?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn default_path(mail_dir: &Path) -> PathBuf {
        mail_dir.join(LEDGER_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_message(&self, message_id: &str) -> Result<bool, LedgerError> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_messages WHERE message_id = ?",
            [message_id],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<SeenMessage>, LedgerError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, folder, storage_path, recorded_at
            FROM seen_messages
            WHERE message_id = ?
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query([message_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SeenMessage::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn record_message(
        &self,
        message_id: &str,
        folder: &str,
        storage_path: &Path,
    ) -> Result<(), LedgerError> {
        self.conn.execute(
            r#"
            INSERT INTO seen_messages (message_id, folder, storage_path, recorded_at)
            VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(message_id) DO NOTHING
            "#,
            params![message_id, folder, storage_path.to_string_lossy()],
        )?;
        Ok(())
    }

    pub fn has_attachment(&self, attachment_id: &str) -> Result<bool, LedgerError> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_attachments WHERE attachment_id = ?",
            [attachment_id],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    pub fn has_content_hash(&self, content_sha256: &str) -> Result<bool, LedgerError> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_attachments WHERE content_sha256 = ?",
            [content_sha256],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    pub fn get_attachment(&self, attachment_id: &str) -> Result<Option<SeenAttachment>, LedgerError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT attachment_id, content_sha256, storage_path, recorded_at
            FROM seen_attachments
            WHERE attachment_id = ?
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query([attachment_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SeenAttachment::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn record_attachment(
        &self,
        attachment_id: &str,
        content_sha256: &str,
        storage_path: &Path,
    ) -> Result<(), LedgerError> {
        self.conn.execute(
            r#"
            INSERT INTO seen_attachments (attachment_id, content_sha256, storage_path, recorded_at)
            VALUES (?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(attachment_id) DO NOTHING
            "#,
            params![attachment_id, content_sha256, storage_path.to_string_lossy()],
        )?;
        Ok(())
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, updated_at FROM sync_state WHERE key = ? LIMIT 1")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SyncState::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let messages: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen_messages", [], |row| row.get(0))?;
        let attachments: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM seen_attachments", [], |row| row.get(0))?;
        Ok(LedgerStats {
            messages,
            attachments,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use uuid::Uuid;

    use super::*;

    fn temp_ledger_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("mailpull-ledger-{}", Uuid::new_v4()))
            .join(LEDGER_FILE_NAME)
    }

    #[test]
    fn records_survive_reopen() {
        let path = temp_ledger_path();
        {
            let ledger = Ledger::open(&path).expect("open ledger");
            ledger
                .record_message("AAMk-1", "Inbox", Path::new("mails/a.txt"))
                .expect("record message");
            ledger
                .record_attachment("att-1", "abc123", Path::new("mails/pdf/a.pdf"))
                .expect("record attachment");
        }

        let reopened = Ledger::open(&path).expect("reopen ledger");
        assert!(reopened.has_message("AAMk-1").expect("lookup"));
        assert!(!reopened.has_message("AAMk-2").expect("lookup"));
        assert!(reopened.has_attachment("att-1").expect("lookup"));
        assert!(reopened.has_content_hash("abc123").expect("lookup"));

        let seen = reopened
            .get_message("AAMk-1")
            .expect("get message")
            .expect("message row");
        assert_eq!(seen.folder, "Inbox");
        assert_eq!(seen.storage_path, "mails/a.txt");

        let stats = reopened.stats().expect("stats");
        assert_eq!(
            stats,
            LedgerStats {
                messages: 1,
                attachments: 1
            }
        );

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn first_recording_wins() {
        let ledger = Ledger::open_in_memory().expect("open ledger");
        ledger
            .record_message("m1", "Inbox", Path::new("first.txt"))
            .expect("first");
        ledger
            .record_message("m1", "Archive", Path::new("second.txt"))
            .expect("second");

        let seen = ledger.get_message("m1").expect("get").expect("row");
        assert_eq!(seen.folder, "Inbox");
        assert_eq!(seen.storage_path, "first.txt");
    }

    #[test]
    fn sync_state_upserts() {
        let ledger = Ledger::open_in_memory().expect("open ledger");
        ledger.set_sync_state("last_run:graph", "r1").expect("set");
        ledger.set_sync_state("last_run:graph", "r2").expect("set again");

        let state = ledger
            .get_sync_state("last_run:graph")
            .expect("get")
            .expect("state");
        assert_eq!(state.value.as_deref(), Some("r2"));
    }
}
