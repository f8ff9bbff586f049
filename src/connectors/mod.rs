use std::fmt::{Display, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::models::{AttachmentRef, MessageRecord};

pub mod ews;
pub mod graph_api;
pub mod pop3;
mod soap;

pub use ews::EwsConnector;
pub use graph_api::GraphApiConnector;
pub use pop3::Pop3Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Graph,
    Ews,
    Pop3,
}

impl BackendKind {
    /// Character cap applied to the subject token in file names.
    pub fn subject_limit(self) -> usize {
        match self {
            Self::Graph => 50,
            Self::Ews | Self::Pop3 => 100,
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Ews => write!(f, "ews"),
            Self::Pop3 => write!(f, "pop3"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graph" | "msgraph" => Ok(Self::Graph),
            "ews" => Ok(Self::Ews),
            "pop3" | "pop" => Ok(Self::Pop3),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Folders every backend can address without knowing their display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderRole {
    Inbox,
    Archive,
}

/// A folder as the backend names it. `backend_ref` is whatever the backend
/// needs to address the folder again (an id, or a well-known name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub name: String,
    pub backend_ref: String,
    /// Set when the backend confirmed this is its inbox or archive,
    /// whatever the mailbox language calls it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<FolderRole>,
}

impl FolderRef {
    pub fn new(name: impl Into<String>, backend_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_ref: backend_ref.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: FolderRole) -> Self {
        self.role = Some(role);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
}

impl Cursor {
    pub fn start() -> Self {
        Self::default()
    }

    pub fn advanced_by(self, count: usize) -> Self {
        Self {
            offset: self.offset + count,
        }
    }
}

/// Backend item as delivered, before normalization.
#[derive(Debug, Clone)]
pub enum RawMessage {
    Graph(graph_api::GraphMessage),
    Ews(ews::EwsMessage),
    Pop3(pop3::Pop3Message),
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RawMessage>,
    /// How many items the server returned for this page. Can exceed
    /// `items.len()` when individual items were dropped while decoding.
    pub returned: usize,
    pub next: Option<Cursor>,
}

impl Page {
    pub fn new(items: Vec<RawMessage>, next: Option<Cursor>) -> Self {
        Self {
            returned: items.len(),
            items,
            next,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// The four operations every mailbox backend provides.
///
/// Pages must come back ordered by received time, newest first. The fetch
/// loop relies on that when it stops at the per-folder cap.
#[async_trait(?Send)]
pub trait MailConnector {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    async fn authenticate(&self) -> SyncResult<()>;

    async fn list_folders(&self) -> SyncResult<Vec<FolderRef>>;

    /// Address of a well-known folder that works without a listing.
    fn well_known_folder(&self, _role: FolderRole) -> Option<FolderRef> {
        None
    }

    async fn fetch_page(
        &self,
        folder: &FolderRef,
        since: DateTime<Utc>,
        chunk_size: usize,
        cursor: Cursor,
    ) -> SyncResult<Page>;

    async fn fetch_attachment(
        &self,
        record: &MessageRecord,
        attachment: &AttachmentRef,
    ) -> SyncResult<Vec<u8>>;

    /// Release any session state held between calls.
    async fn disconnect(&self) -> SyncResult<()> {
        Ok(())
    }
}
