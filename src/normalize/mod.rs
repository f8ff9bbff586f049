pub mod text;

use chrono::{DateTime, NaiveDateTime, Utc};
use mail_parser::MessageParser;
use ring::digest::{digest, SHA256};
use tracing::warn;

use crate::connectors::{ews, graph_api, pop3, BackendKind, RawMessage};
use crate::models::{AttachmentRef, MessageId, MessageRecord, NO_SUBJECT, UNKNOWN_PARTY};

pub use self::text::{extract_body_text, sanitize_filename, truncate_to_bytes, BodyKind};

/// Backend-neutral view of one raw message, produced by each connector's
/// field mapper and consumed by [`build_record`].
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub native_id: Option<String>,
    pub received: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<(BodyKind, String)>,
    pub attachments: Vec<AttachmentRef>,
}

/// Map one backend item to a record. Never fails: missing or malformed
/// fields fall back to defaults and are reported as warnings.
pub fn normalize(raw: &RawMessage, folder_name: &str) -> MessageRecord {
    let (kind, fields) = match raw {
        RawMessage::Graph(message) => (BackendKind::Graph, graph_api::raw_fields(message)),
        RawMessage::Ews(message) => (BackendKind::Ews, ews::raw_fields(message)),
        RawMessage::Pop3(message) => (BackendKind::Pop3, pop3::raw_fields(message)),
    };
    build_record(fields, kind, folder_name)
}

pub fn build_record(fields: RawFields, kind: BackendKind, folder_name: &str) -> MessageRecord {
    let received_at = match fields.received.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_received(raw).unwrap_or_else(|| {
            warn!(folder = folder_name, value = raw, "unparseable received date, using now");
            Utc::now()
        }),
        _ => {
            warn!(folder = folder_name, "message without received date, using now");
            Utc::now()
        }
    };

    let from = non_empty(fields.from.as_deref().map(decode_header_value))
        .unwrap_or_else(|| UNKNOWN_PARTY.to_string());
    let to = non_empty(fields.to.as_deref().map(decode_header_value))
        .unwrap_or_else(|| UNKNOWN_PARTY.to_string());
    let subject = non_empty(fields.subject.as_deref().map(decode_header_value))
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let body_text = fields
        .body
        .as_ref()
        .map(|(body_kind, content)| extract_body_text(content, *body_kind))
        .unwrap_or_default();

    let id = match non_empty(fields.native_id) {
        Some(native) => MessageId::Native(native),
        None => MessageId::Synthesized(synthesize_id(folder_name, &received_at, &subject)),
    };

    let attachment_refs = fields
        .attachments
        .into_iter()
        .filter(AttachmentRef::is_accepted)
        .collect();

    MessageRecord {
        id,
        folder_name: folder_name.to_string(),
        received_at,
        from,
        to,
        subject_token: sanitize_filename(&subject, kind.subject_limit()),
        subject,
        body_text,
        attachment_refs,
    }
}

/// Header-derived identity for backends without stable ids.
pub fn synthesize_id(folder_name: &str, received_at: &DateTime<Utc>, subject: &str) -> String {
    let material = format!("{folder_name}\n{}\n{subject}", received_at.to_rfc3339());
    let hash = digest(&SHA256, material.as_bytes());
    let hex: String = hash.as_ref()[..12]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("hdr-{hex}")
}

/// Accepts ISO-8601 (Graph, EWS) and RFC 2822 (MIME) timestamps.
pub fn parse_received(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    let header = format!("Date: {raw}\r\n\r\n");
    let message = MessageParser::default().parse(header.as_bytes())?;
    let date = message.date()?;
    DateTime::parse_from_rfc3339(&date.to_rfc3339())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Decode RFC 2047 encoded-words (`=?utf-8?B?...?=`) left in a header value.
pub fn decode_header_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains("=?") {
        return trimmed.to_string();
    }

    let header = format!("Subject: {trimmed}\r\n\r\n");
    MessageParser::default()
        .parse(header.as_bytes())
        .and_then(|message| message.subject().map(str::to_string))
        .unwrap_or_else(|| trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
