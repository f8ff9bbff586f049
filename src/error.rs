use thiserror::Error;

use crate::db::LedgerError;

/// Failure taxonomy shared by every pipeline stage.
///
/// `Auth` and `Config` abort a run. Everything else is scoped to the
/// folder, page, item or attachment that produced it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("item: {0}")]
    Item(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }

    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(format!("{:#}", err.into()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::Item(_) => "item",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
            Self::Ledger(_) => "ledger",
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
