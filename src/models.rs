use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_PARTY: &str = "Unknown";
pub const NO_SUBJECT: &str = "No subject";

/// The single attachment kind the pipeline extracts.
pub const ACCEPTED_CONTENT_TYPE: &str = "application/pdf";
pub const ACCEPTED_EXTENSION: &str = "pdf";

/// Identity used for deduplication.
///
/// Native ids come from the backend. Synthesized ids are derived from
/// header fields for backends without stable ids and are never written
/// to the persistent ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MessageId {
    Native(String),
    Synthesized(String),
}

impl MessageId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Native(value) | Self::Synthesized(value) => value,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(value) => write!(f, "{value}"),
            Self::Synthesized(value) => write!(f, "synthesized:{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub name: String,
    pub content_type: String,
    /// Bytes already delivered with the message, when the backend inlines them.
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
}

impl AttachmentRef {
    pub fn is_accepted(&self) -> bool {
        is_accepted_content_type(&self.content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub folder_name: String,
    pub received_at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Filesystem-safe subject, already capped to the backend's length limit.
    pub subject_token: String,
    pub body_text: String,
    pub attachment_refs: Vec<AttachmentRef>,
}

pub fn is_accepted_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case(ACCEPTED_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_match_ignores_case_and_parameters() {
        assert!(is_accepted_content_type("application/pdf"));
        assert!(is_accepted_content_type("Application/PDF; name=\"q3.pdf\""));
        assert!(!is_accepted_content_type("application/octet-stream"));
        assert!(!is_accepted_content_type("image/png"));
    }

    #[test]
    fn synthesized_ids_are_not_native() {
        let native = MessageId::Native("AAMk".to_string());
        let synthesized = MessageId::Synthesized("hdr-1234".to_string());
        assert!(native.is_native());
        assert!(!synthesized.is_native());
        assert_eq!(synthesized.as_str(), "hdr-1234");
        assert_eq!(synthesized.to_string(), "synthesized:hdr-1234");
    }
}
