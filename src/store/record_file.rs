//! On-disk layout of one persisted message: a short header block, a blank
//! line, then the plain-text body.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::MessageRecord;
use crate::normalize::sanitize_filename;
use crate::store::fit_stem;

pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
pub const HEADER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const RECORD_EXTENSION: &str = "txt";
const FOLDER_TOKEN_LIMIT: usize = 100;

/// `<timestamp>--[<folder>]--<subject>` without extension, capped to
/// [`MAX_STEM_BYTES`](crate::store::MAX_STEM_BYTES).
pub fn record_file_stem(record: &MessageRecord) -> String {
    fit_stem(&format!(
        "{}--[{}]--{}",
        record.received_at.format(FILE_TIMESTAMP_FORMAT),
        folder_token(&record.folder_name),
        record.subject_token
    ))
}

pub fn folder_token(folder_name: &str) -> String {
    sanitize_filename(folder_name, FOLDER_TOKEN_LIMIT)
}

pub fn render_record(record: &MessageRecord) -> String {
    format!(
        "From: {}\nTo: {}\nDate: {}\nSubject: {}\nFolder: {}\n\n{}\n",
        header_value(&record.from),
        header_value(&record.to),
        record.received_at.format(HEADER_DATE_FORMAT),
        header_value(&record.subject),
        header_value(&record.folder_name),
        record.body_text
    )
}

fn header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecord {
    pub from: String,
    pub to: String,
    pub date: Option<DateTime<Utc>>,
    pub subject: String,
    pub folder: String,
    pub body: String,
}

/// Read a record file back. Tolerates missing headers; a file without a
/// header block is treated as all body.
pub fn parse_record(text: &str) -> ParsedRecord {
    let mut parsed = ParsedRecord::default();
    let mut saw_header = false;
    let mut body_start = 0usize;

    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        offset += line.len();
        if content.is_empty() {
            body_start = if saw_header { offset } else { 0 };
            break;
        }
        let Some((key, value)) = content.split_once(':') else {
            body_start = 0;
            saw_header = false;
            break;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "from" => parsed.from = value,
            "to" => parsed.to = value,
            "subject" => parsed.subject = value,
            "folder" => parsed.folder = value,
            "date" => {
                parsed.date = NaiveDateTime::parse_from_str(&value, HEADER_DATE_FORMAT)
                    .ok()
                    .map(|naive| naive.and_utc())
            }
            _ => {
                body_start = 0;
                saw_header = false;
                break;
            }
        }
        saw_header = true;
        body_start = offset;
    }

    if !saw_header {
        return ParsedRecord {
            body: text.trim().to_string(),
            ..ParsedRecord::default()
        };
    }
    parsed.body = text[body_start.min(text.len())..].trim().to_string();
    parsed
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{MessageId, MessageRecord};

    fn record() -> MessageRecord {
        MessageRecord {
            id: MessageId::Native("AAMk-1".to_string()),
            folder_name: "Projects/Alpha".to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap(),
            from: "Ann <ann@example.com>".to_string(),
            to: "bob@example.com".to_string(),
            subject: "Kickoff\r\nBcc: injected".to_string(),
            subject_token: "Kickoff".to_string(),
            body_text: "Agenda:\nitem one".to_string(),
            attachment_refs: Vec::new(),
        }
    }

    #[test]
    fn stem_combines_timestamp_folder_and_subject() {
        assert_eq!(
            record_file_stem(&record()),
            "2026-03-09-14-05-07--[Projects_Alpha]--Kickoff"
        );
    }

    #[test]
    fn rendered_headers_stay_on_one_line() {
        let text = render_record(&record());
        assert!(text.starts_with(
            "From: Ann <ann@example.com>\nTo: bob@example.com\nDate: 2026-03-09 14:05:07\nSubject: Kickoff Bcc: injected\nFolder: Projects/Alpha\n\nAgenda:\nitem one\n"
        ));
    }

    #[test]
    fn rendered_record_reads_back() {
        let parsed = parse_record(&render_record(&record()));
        assert_eq!(parsed.from, "Ann <ann@example.com>");
        assert_eq!(parsed.folder, "Projects/Alpha");
        assert_eq!(parsed.date, Some(Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap()));
        assert_eq!(parsed.body, "Agenda:\nitem one");
    }

    #[test]
    fn headerless_text_is_all_body() {
        let parsed = parse_record("just some notes\nmore");
        assert_eq!(parsed.body, "just some notes\nmore");
        assert_eq!(parsed.date, None);
        assert!(parsed.subject.is_empty());
    }
}
