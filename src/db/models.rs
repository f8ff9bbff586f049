use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenMessage {
    pub message_id: String,
    pub folder: String,
    pub storage_path: String,
    pub recorded_at: String,
}

impl SeenMessage {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            message_id: row.get("message_id")?,
            folder: row.get("folder")?,
            storage_path: row.get("storage_path")?,
            recorded_at: row.get("recorded_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenAttachment {
    pub attachment_id: String,
    pub content_sha256: String,
    pub storage_path: String,
    pub recorded_at: String,
}

impl SeenAttachment {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            attachment_id: row.get("attachment_id")?,
            content_sha256: row.get("content_sha256")?,
            storage_path: row.get("storage_path")?,
            recorded_at: row.get("recorded_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: String,
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
