use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS seen_messages (
            message_id TEXT PRIMARY KEY,
            folder TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS seen_attachments (
            attachment_id TEXT PRIMARY KEY,
            content_sha256 TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_seen_messages_folder ON seen_messages(folder);
        CREATE INDEX IF NOT EXISTS idx_seen_attachments_sha ON seen_attachments(content_sha256);
        "#,
    )?;

    Ok(())
}
