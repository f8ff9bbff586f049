use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::schema;

const VERSION_KEY: &str = "schema_version";

type Step = fn(&Transaction<'_>) -> Result<()>;

/// Ordered ledger upgrades. Entry `n` moves a ledger from version `n` to `n + 1`.
const STEPS: &[(&str, Step)] = &[("seen ids", create_seen_tables)];

fn create_seen_tables(tx: &Transaction<'_>) -> Result<()> {
    schema::create_schema(tx)
}

pub fn latest_version() -> u32 {
    STEPS.len() as u32
}

/// Bring the ledger up to [`latest_version`], one transaction per step.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );",
    )
    .context("create sync_state")?;

    let found = stored_version(conn)?;
    let latest = latest_version();
    if found > latest {
        bail!("ledger was written by a newer mailpull (schema {found}, this build knows {latest})");
    }

    for (index, (label, step)) in STEPS.iter().enumerate().skip(found as usize) {
        let target = index as u32 + 1;
        let tx = conn.transaction()?;
        step(&tx).with_context(|| format!("ledger step {target} ({label})"))?;
        tx.execute(
            "INSERT INTO sync_state (key, value, updated_at)
             VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![VERSION_KEY, target.to_string()],
        )?;
        tx.commit()?;
    }
    Ok(())
}

fn stored_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    raw.map_or(Ok(0), |value| {
        value
            .parse()
            .with_context(|| format!("unreadable ledger schema version {value:?}"))
    })
}
