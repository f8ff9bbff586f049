use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{Address, Message, MessageParser, MimeHeaders, PartType};
use ring::digest::{digest, SHA256};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::connectors::{
    BackendKind, Cursor, FolderRef, FolderRole, MailConnector, Page, RawMessage,
};
use crate::error::{SyncError, SyncResult};
use crate::models::{AttachmentRef, MessageRecord};
use crate::normalize::{parse_received, BodyKind, RawFields};

pub const DEFAULT_POP3S_PORT: u16 = 995;
const IO_TIMEOUT_SECONDS: u64 = 60;
const INBOX_NAME: &str = "Inbox";

#[derive(Debug, Clone)]
pub struct Pop3Settings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Upper bound on messages retrieved per run; 0 retrieves the whole mailbox.
    pub max_messages: usize,
}

type TlsSession = Pop3Session<BufReader<TlsStream<TcpStream>>>;

/// Retrieval-protocol backend. One folder, no stable ids, one page per run.
pub struct Pop3Connector {
    settings: Pop3Settings,
    session: Mutex<Option<TlsSession>>,
}

impl Pop3Connector {
    pub fn new(settings: Pop3Settings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    async fn connect(&self) -> SyncResult<TlsSession> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| SyncError::Config(format!("pop3 tls setup: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        let server_name = ServerName::try_from(self.settings.host.clone())
            .map_err(|e| SyncError::Config(format!("invalid pop3 host {}: {e}", self.settings.host)))?;

        let address = (self.settings.host.as_str(), self.settings.port);
        let tcp = timeout(io_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| SyncError::Transport(format!("pop3 connect to {} timed out", self.settings.host)))?
            .map_err(|e| SyncError::Transport(format!("pop3 connect to {}: {e}", self.settings.host)))?;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| SyncError::Transport(format!("pop3 tls handshake: {e}")))?;

        let mut session = Pop3Session::new(BufReader::new(tls));
        session.greeting().await?;
        session
            .login(&self.settings.username, &self.settings.password)
            .await?;
        debug!(host = %self.settings.host, "pop3 session opened");
        Ok(session)
    }
}

#[async_trait(?Send)]
impl MailConnector for Pop3Connector {
    fn name(&self) -> &str {
        "pop3"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Pop3
    }

    async fn authenticate(&self) -> SyncResult<()> {
        let session = self.connect().await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    async fn list_folders(&self) -> SyncResult<Vec<FolderRef>> {
        Ok(vec![FolderRef::new(INBOX_NAME, "INBOX").with_role(FolderRole::Inbox)])
    }

    fn well_known_folder(&self, role: FolderRole) -> Option<FolderRef> {
        (role == FolderRole::Inbox).then(|| FolderRef::new(INBOX_NAME, "INBOX").with_role(role))
    }

    async fn fetch_page(
        &self,
        folder: &FolderRef,
        since: DateTime<Utc>,
        _chunk_size: usize,
        cursor: Cursor,
    ) -> SyncResult<Page> {
        if cursor.offset > 0 || !folder.name.eq_ignore_ascii_case(INBOX_NAME) {
            return Ok(Page::empty());
        }

        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(SyncError::Transport("pop3 session unavailable".to_string()));
        };

        let messages = retrieve_newest(session, self.settings.max_messages).await?;
        let retrieved = messages.len();
        let items: Vec<RawMessage> = messages
            .into_iter()
            .filter(|message| message.received_at().map_or(true, |at| at >= since))
            .map(RawMessage::Pop3)
            .collect();
        info!(
            retrieved,
            kept = items.len(),
            "pop3 messages retrieved"
        );

        Ok(Page {
            returned: items.len(),
            items,
            next: None,
        })
    }

    async fn fetch_attachment(
        &self,
        _record: &MessageRecord,
        attachment: &AttachmentRef,
    ) -> SyncResult<Vec<u8>> {
        attachment.payload.clone().ok_or_else(|| {
            SyncError::NotFound(format!("pop3 attachment {} has no inline bytes", attachment.id))
        })
    }

    async fn disconnect(&self) -> SyncResult<()> {
        if let Some(mut session) = self.session.lock().await.take() {
            session.quit().await;
        }
        Ok(())
    }
}

/// RETR the newest `max` messages (all when `max` is 0), newest first.
pub async fn retrieve_newest<S>(session: &mut Pop3Session<S>, max: usize) -> SyncResult<Vec<Pop3Message>>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let (count, _) = session.stat().await?;
    let wanted = if max == 0 { count } else { max.min(count) };

    let mut messages = Vec::with_capacity(wanted);
    for offset in 0..wanted {
        let number = count - offset;
        match session.retr(number).await? {
            Some(raw) => messages.push(Pop3Message { number, raw }),
            None => warn!(number, "pop3 server refused RETR, skipping message"),
        }
    }
    Ok(messages)
}

fn io_timeout() -> StdDuration {
    StdDuration::from_secs(IO_TIMEOUT_SECONDS)
}

/// Line-oriented POP3 session over any buffered duplex stream.
pub struct Pop3Session<S> {
    stream: S,
    line: Vec<u8>,
}

impl<S> Pop3Session<S>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            line: Vec::with_capacity(512),
        }
    }

    async fn read_line(&mut self) -> SyncResult<&[u8]> {
        self.line.clear();
        let read = timeout(io_timeout(), self.stream.read_until(b'\n', &mut self.line))
            .await
            .map_err(|_| SyncError::Transport("pop3 read timed out".to_string()))?
            .map_err(|e| SyncError::Transport(format!("pop3 read: {e}")))?;
        if read == 0 {
            return Err(SyncError::Transport("pop3 connection closed".to_string()));
        }
        let mut end = self.line.len();
        while end > 0 && matches!(self.line[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Ok(&self.line[..end])
    }

    async fn write_line(&mut self, line: &str) -> SyncResult<()> {
        self.send(line)
            .await
            .map_err(|e| SyncError::Transport(format!("pop3 write: {e}")))
    }

    async fn send(&mut self, line: &str) -> std::io::Result<()> {
        let mut framed = Vec::with_capacity(line.len() + 2);
        framed.extend_from_slice(line.as_bytes());
        framed.extend_from_slice(b"\r\n");
        self.stream.write_all(&framed).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn status(&mut self) -> SyncResult<Result<String, String>> {
        let line = String::from_utf8_lossy(self.read_line().await?).into_owned();
        if line.starts_with("+OK") {
            Ok(Ok(line))
        } else {
            Ok(Err(line))
        }
    }

    async fn expect_ok(&mut self, command: &str) -> SyncResult<String> {
        self.status()
            .await?
            .map_err(|line| SyncError::Transport(format!("pop3 {command}: {line}")))
    }

    pub async fn greeting(&mut self) -> SyncResult<()> {
        self.expect_ok("greeting").await.map(|_| ())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> SyncResult<()> {
        self.write_line(&format!("USER {username}")).await?;
        if let Err(line) = self.status().await? {
            return Err(SyncError::Auth(format!("pop3 USER rejected: {line}")));
        }
        self.write_line(&format!("PASS {password}")).await?;
        if let Err(line) = self.status().await? {
            return Err(SyncError::Auth(format!("pop3 PASS rejected: {line}")));
        }
        Ok(())
    }

    /// Message count and mailbox size in octets.
    pub async fn stat(&mut self) -> SyncResult<(usize, u64)> {
        self.write_line("STAT").await?;
        let line = self.expect_ok("STAT").await?;
        let mut parts = line.trim_start_matches("+OK").split_whitespace();
        let count = parts
            .next()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| SyncError::Transport(format!("pop3 STAT unparseable: {line}")))?;
        let size = parts.next().and_then(|value| value.parse().ok()).unwrap_or(0);
        Ok((count, size))
    }

    /// Full message bytes with dot-stuffing removed. `None` when the server
    /// answers `-ERR` for this message; the session stays usable.
    pub async fn retr(&mut self, number: usize) -> SyncResult<Option<Vec<u8>>> {
        self.write_line(&format!("RETR {number}")).await?;
        if let Err(line) = self.status().await? {
            debug!(number, response = %line, "pop3 RETR rejected");
            return Ok(None);
        }

        let mut out = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == b"." {
                break;
            }
            let content = line.strip_prefix(b".").unwrap_or(line);
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        Ok(Some(out))
    }

    pub async fn quit(&mut self) {
        if self.write_line("QUIT").await.is_ok() {
            let _ = self.read_line().await;
        }
    }
}

/// One retrieved message, still in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Message {
    pub number: usize,
    pub raw: Vec<u8>,
}

impl Pop3Message {
    fn received_at(&self) -> Option<DateTime<Utc>> {
        let parsed = MessageParser::default().parse_headers(&self.raw[..])?;
        let date = parsed.date()?;
        parse_received(&date.to_rfc3339())
    }
}

pub fn raw_fields(message: &Pop3Message) -> RawFields {
    let Some(parsed) = MessageParser::default().parse(&message.raw[..]) else {
        warn!(number = message.number, "pop3 message not parseable as MIME, keeping raw text");
        return RawFields {
            body: Some((
                BodyKind::Text,
                String::from_utf8_lossy(&message.raw).into_owned(),
            )),
            ..RawFields::default()
        };
    };

    RawFields {
        native_id: None,
        received: parsed.date().map(|date| date.to_rfc3339()),
        from: parsed.from().and_then(first_address),
        to: parsed.to().map(join_addresses).filter(|joined| !joined.is_empty()),
        subject: parsed.subject().map(str::to_string),
        body: select_body(&parsed),
        attachments: pdf_attachments(&parsed),
    }
}

/// Prefer a real text/html part, otherwise the first text/plain part.
fn select_body(message: &Message<'_>) -> Option<(BodyKind, String)> {
    let html = message.html_part(0).and_then(|part| match &part.body {
        PartType::Html(html) if !html.trim().is_empty() => Some(html.to_string()),
        _ => None,
    });
    if let Some(html) = html {
        return Some((BodyKind::Html, html));
    }

    message
        .text_part(0)
        .and_then(|part| part.text_contents())
        .map(|text| (BodyKind::Text, text.to_string()))
}

fn pdf_attachments(message: &Message<'_>) -> Vec<AttachmentRef> {
    message
        .attachments()
        .filter_map(|part| {
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_default();
            let name = part.attachment_name().unwrap_or("attachment.pdf").to_string();
            let is_pdf = crate::models::is_accepted_content_type(&content_type)
                || (content_type.eq_ignore_ascii_case("application/octet-stream")
                    && name.to_ascii_lowercase().ends_with(".pdf"));
            if !is_pdf {
                return None;
            }

            let bytes = part.contents().to_vec();
            Some(AttachmentRef {
                id: format!("sha256:{}", hex_digest(&bytes)),
                name,
                content_type: crate::models::ACCEPTED_CONTENT_TYPE.to_string(),
                payload: Some(bytes),
            })
        })
        .collect()
}

fn first_address(address: &Address<'_>) -> Option<String> {
    address.first().and_then(|addr| format_addr(addr.name(), addr.address()))
}

fn join_addresses(address: &Address<'_>) -> String {
    let formatted: Vec<String> = match address {
        Address::List(list) => list
            .iter()
            .filter_map(|addr| format_addr(addr.name(), addr.address()))
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(|addr| format_addr(addr.name(), addr.address()))
            .collect(),
    };
    formatted.join(", ")
}

fn format_addr(name: Option<&str>, address: Option<&str>) -> Option<String> {
    let name = name.map(str::trim).filter(|value| !value.is_empty());
    let address = address.map(str::trim).filter(|value| !value.is_empty());
    match (name, address) {
        (Some(name), Some(address)) if !name.eq_ignore_ascii_case(address) => {
            Some(format!("{name} <{address}>"))
        }
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    digest(&SHA256, bytes)
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
