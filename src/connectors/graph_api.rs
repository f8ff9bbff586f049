use std::sync::Mutex;
use std::time::Duration as StdDuration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::connectors::{
    BackendKind, Cursor, FolderRef, FolderRole, MailConnector, Page, RawMessage,
};
use crate::error::{SyncError, SyncResult};
use crate::models::{AttachmentRef, MessageId, MessageRecord};
use crate::normalize::{BodyKind, RawFields};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const CACHE_SKEW_SECONDS: i64 = 60;
/// Longest token lifetime we trust; Entra issues one hour.
const MAX_TOKEN_LIFETIME_SECONDS: u64 = 86_400;
const MAX_RATE_LIMIT_RETRIES: usize = 5;
const FOLDER_PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT_SECONDS: u64 = 120;
const REDACTED_BODY_MAX_LEN: usize = 200;
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

const MESSAGE_SELECT_FIELDS: &str =
    "id,subject,from,toRecipients,receivedDateTime,body,bodyPreview,hasAttachments";

/// Server-side folders that never hold user mail.
const SYSTEM_FOLDER_NAMES: &[&str] = &[
    "searchfolders",
    "sync issues",
    "conflicts",
    "local failures",
    "server failures",
];

fn is_system_folder(display_name: &str) -> bool {
    let lower = display_name.trim().to_lowercase();
    SYSTEM_FOLDER_NAMES.iter().any(|&name| lower == name)
}

#[derive(Debug, Clone)]
pub struct GraphCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
pub struct GraphApiConnector {
    client: Client,
    mailbox: String,
    credentials: GraphCredentials,
    api_base: String,
    token_url: String,
    token: Mutex<Option<CachedAccessToken>>,
}

impl GraphApiConnector {
    pub fn new(mailbox: impl Into<String>, credentials: GraphCredentials) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| SyncError::Config(format!("build graph http client: {e}")))?;
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            credentials.tenant_id
        );

        Ok(Self {
            client,
            mailbox: mailbox.into(),
            credentials,
            api_base: GRAPH_API_BASE.to_string(),
            token_url,
            token: Mutex::new(None),
        })
    }

    /// Point the connector at another deployment (national clouds, local stubs).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    async fn access_token(&self) -> SyncResult<String> {
        if let Some(cached) = self.cached_token() {
            return Ok(cached);
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(fresh);
        Ok(access_token)
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|token| !token.is_expired())
            .map(|token| token.access_token.clone())
    }

    fn drop_cached_token(&self) {
        *self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    async fn fetch_token(&self) -> SyncResult<CachedAccessToken> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .with_context(|| format!("request graph oauth token from {}", self.token_url))
            .map_err(SyncError::transport)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("read graph token response")
            .map_err(SyncError::transport)?;
        if status.is_client_error() {
            return Err(SyncError::Auth(format!(
                "graph token request rejected: status={} body={}",
                status,
                redact_response_body(&body)
            )));
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "graph token request failed: status={} body={}",
                status,
                redact_response_body(&body)
            )));
        }

        let payload: OAuthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| SyncError::Auth(format!("decode graph token response: {e}")))?;
        debug!(expires_in = payload.expires_in, "graph token acquired");

        Ok(CachedAccessToken::from_response(payload, Utc::now()))
    }

    /// GET with bearer auth, retrying 429/503 with Retry-After or doubling
    /// backoff. A 401 gets one fresh token before it counts as an auth failure.
    async fn get_with_retry(&self, url: &str, what: &str) -> SyncResult<Response> {
        let mut backoff_seconds = 1u64;
        let mut attempt = 0usize;
        let mut refreshed = false;

        loop {
            let token = self.access_token().await?;
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .header("accept", "application/json")
                .send()
                .await
                .with_context(|| format!("request graph {what}"))
                .map_err(SyncError::transport)?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    let body = response.text().await.unwrap_or_default();
                    return Err(SyncError::Transport(format!(
                        "graph {what} request exhausted retries: {}",
                        redact_response_body(&body)
                    )));
                }

                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                attempt += 1;
                warn!(
                    request = what,
                    attempt,
                    retry_after_seconds,
                    "graph throttled, backing off"
                );
                sleep(StdDuration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                self.drop_cached_token();
                if !refreshed {
                    refreshed = true;
                    warn!(request = what, "graph rejected the cached token, refreshing");
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::Auth(format!(
                    "graph {what} rejected a fresh token: {}",
                    redact_response_body(&body)
                )));
            }

            if status == StatusCode::NOT_FOUND {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::NotFound(format!(
                    "graph {what}: {}",
                    redact_response_body(&body)
                )));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::Transport(format!(
                    "graph {what} request failed: status={} body={}",
                    status,
                    redact_response_body(&body)
                )));
            }

            return Ok(response);
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, what: &str) -> SyncResult<T> {
        let body = self
            .get_with_retry(url, what)
            .await?
            .text()
            .await
            .with_context(|| format!("read graph {what} response body"))
            .map_err(SyncError::transport)?;
        serde_json::from_str(&body)
            .with_context(|| format!("decode graph {what} JSON"))
            .map_err(SyncError::transport)
    }

    fn user_url(&self, suffix: &str) -> String {
        format!("{}/users/{}/{}", self.api_base, self.mailbox, suffix)
    }

    pub fn messages_url(
        &self,
        folder: &FolderRef,
        since: DateTime<Utc>,
        chunk_size: usize,
        cursor: Cursor,
    ) -> SyncResult<Url> {
        let base = self.user_url(&format!("mailFolders/{}/messages", folder.backend_ref));
        let mut url = Url::parse(&base)
            .map_err(|e| SyncError::Config(format!("invalid graph messages url {base}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("$top", &chunk_size.to_string())
            .append_pair("$skip", &cursor.offset.to_string())
            .append_pair("$orderby", "receivedDateTime desc")
            .append_pair(
                "$filter",
                &format!(
                    "receivedDateTime ge {}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            )
            .append_pair("$select", MESSAGE_SELECT_FIELDS)
            .append_pair("$expand", "attachments");
        Ok(url)
    }

    async fn discover_folders(&self) -> SyncResult<Vec<FolderRef>> {
        let mut folders = Vec::new();
        let mut pending_parents: Vec<(String, String)> = Vec::new();

        let mut url = self.user_url(&format!(
            "mailFolders?includeHiddenFolders=true&$top={FOLDER_PAGE_SIZE}"
        ));
        loop {
            let page: GraphMailFolderPage = self.get_json(&url, "mailFolders").await?;
            for folder in page.value {
                if is_system_folder(&folder.display_name) {
                    continue;
                }
                if folder.child_folder_count.unwrap_or(0) > 0 {
                    pending_parents.push((folder.id.clone(), folder.display_name.clone()));
                }
                folders.push(FolderRef::new(folder.display_name, folder.id));
            }

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        while let Some((parent_id, parent_name)) = pending_parents.pop() {
            let mut child_url = self.user_url(&format!(
                "mailFolders/{parent_id}/childFolders?includeHiddenFolders=true&$top={FOLDER_PAGE_SIZE}"
            ));

            loop {
                let page: GraphMailFolderPage = match self.get_json(&child_url, "childFolders").await {
                    Ok(page) => page,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(folder = %parent_name, error = %err, "child folder listing failed, skipping subtree");
                        break;
                    }
                };
                for child in page.value {
                    if is_system_folder(&child.display_name) {
                        continue;
                    }
                    let name = format!("{}/{}", parent_name, child.display_name);
                    if child.child_folder_count.unwrap_or(0) > 0 {
                        pending_parents.push((child.id.clone(), name.clone()));
                    }
                    folders.push(FolderRef::new(name, child.id));
                }

                match page.next_link {
                    Some(next) => child_url = next,
                    None => break,
                }
            }
        }

        for role in [FolderRole::Inbox, FolderRole::Archive] {
            if let Some(id) = self.well_known_id(role).await {
                tag_role(&mut folders, &id, role);
            }
        }
        Ok(folders)
    }

    /// Resolve a well-known folder name to the id the listing uses.
    async fn well_known_id(&self, role: FolderRole) -> Option<String> {
        let url = self.user_url(&format!("mailFolders/{}?$select=id", well_known_name(role)));
        match self.get_json::<GraphFolderId>(&url, "well-known folder").await {
            Ok(folder) => Some(folder.id),
            Err(err) => {
                debug!(?role, error = %err, "well-known folder not resolved");
                None
            }
        }
    }
}

/// Graph accepts these names anywhere a folder id goes.
fn well_known_name(role: FolderRole) -> &'static str {
    match role {
        FolderRole::Inbox => "inbox",
        FolderRole::Archive => "archive",
    }
}

fn tag_role(folders: &mut [FolderRef], id: &str, role: FolderRole) {
    if let Some(folder) = folders.iter_mut().find(|folder| folder.backend_ref == id) {
        folder.role = Some(role);
    }
}

#[async_trait(?Send)]
impl MailConnector for GraphApiConnector {
    fn name(&self) -> &str {
        "graph"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn authenticate(&self) -> SyncResult<()> {
        self.drop_cached_token();
        self.access_token().await.map(|_| ())
    }

    async fn list_folders(&self) -> SyncResult<Vec<FolderRef>> {
        let folders = self.discover_folders().await?;
        info!(mailbox = %self.mailbox, count = folders.len(), "graph folders discovered");
        Ok(folders)
    }

    fn well_known_folder(&self, role: FolderRole) -> Option<FolderRef> {
        let name = match role {
            FolderRole::Inbox => "Inbox",
            FolderRole::Archive => "Archive",
        };
        Some(FolderRef::new(name, well_known_name(role)).with_role(role))
    }

    async fn fetch_page(
        &self,
        folder: &FolderRef,
        since: DateTime<Utc>,
        chunk_size: usize,
        cursor: Cursor,
    ) -> SyncResult<Page> {
        let url = self.messages_url(folder, since, chunk_size, cursor)?;
        let page: GraphMessagesPage = self.get_json(url.as_str(), "messages").await?;
        Ok(decode_messages_page(page, &folder.name, chunk_size, cursor))
    }

    async fn fetch_attachment(
        &self,
        record: &MessageRecord,
        attachment: &AttachmentRef,
    ) -> SyncResult<Vec<u8>> {
        if let Some(bytes) = &attachment.payload {
            return Ok(bytes.clone());
        }
        let MessageId::Native(message_id) = &record.id else {
            return Err(SyncError::Item(format!(
                "attachment {} belongs to a message without a graph id",
                attachment.id
            )));
        };

        let url = self.user_url(&format!(
            "messages/{message_id}/attachments/{}/$value",
            attachment.id
        ));
        let bytes = self
            .get_with_retry(&url, "attachment content")
            .await?
            .bytes()
            .await
            .context("read graph attachment bytes")
            .map_err(SyncError::transport)?;
        Ok(bytes.to_vec())
    }
}

fn decode_messages_page(
    page: GraphMessagesPage,
    folder_name: &str,
    chunk_size: usize,
    cursor: Cursor,
) -> Page {
    let returned = page.value.len();
    let mut messages = Vec::with_capacity(returned);
    for value in page.value {
        match serde_json::from_value::<GraphMessage>(value) {
            Ok(message) => messages.push(message),
            Err(err) => warn!(folder = folder_name, error = %err, "skipping undecodable graph message"),
        }
    }
    messages.sort_by(|a, b| b.received_date_time.cmp(&a.received_date_time));

    let next = (returned >= chunk_size && returned > 0).then(|| cursor.advanced_by(returned));
    Page {
        items: messages.into_iter().map(RawMessage::Graph).collect(),
        returned,
        next,
    }
}

/// Field mapping for the normalizer.
pub fn raw_fields(message: &GraphMessage) -> RawFields {
    let from = message.from.as_ref().and_then(GraphRecipient::display);
    let to = message
        .to_recipients
        .as_deref()
        .map(|recipients| {
            recipients
                .iter()
                .filter_map(GraphRecipient::display)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|joined| !joined.is_empty());

    let body = message
        .body
        .as_ref()
        .and_then(|body| {
            let content = body.content.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
            let kind = if body
                .content_type
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case("html"))
            {
                BodyKind::Html
            } else {
                BodyKind::Text
            };
            Some((kind, content.to_string()))
        })
        .or_else(|| {
            message
                .body_preview
                .as_deref()
                .map(str::trim)
                .filter(|preview| !preview.is_empty())
                .map(|preview| (BodyKind::Text, preview.to_string()))
        });

    let attachments = message
        .attachments
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|attachment| {
            attachment
                .odata_type
                .as_deref()
                .map_or(true, |kind| kind == FILE_ATTACHMENT_TYPE)
        })
        .filter_map(GraphAttachment::to_ref)
        .collect();

    RawFields {
        native_id: message.id.clone(),
        received: message.received_date_time.clone(),
        from,
        to,
        subject: message.subject.clone(),
        body,
        attachments,
    }
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }
    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: u64,
    ext_expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedAccessToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    fn from_response(payload: OAuthTokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = payload.expires_in.min(MAX_TOKEN_LIFETIME_SECONDS) as i64;
        Self {
            access_token: payload.access_token,
            expires_at: now + Duration::seconds((lifetime - CACHE_SKEW_SECONDS).max(0)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphMailFolder {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "childFolderCount")]
    child_folder_count: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphFolderId {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphMailFolderPage {
    value: Vec<GraphMailFolder>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphMessagesPage {
    value: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients")]
    to_recipients: Option<Vec<GraphRecipient>>,
    body: Option<GraphBody>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    attachments: Option<Vec<GraphAttachment>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    fn display(&self) -> Option<String> {
        let email = self.email_address.as_ref()?;
        let name = email.name.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let address = email.address.as_deref().map(str::trim).filter(|v| !v.is_empty());
        match (name, address) {
            (Some(name), Some(address)) if !name.eq_ignore_ascii_case(address) => {
                Some(format!("{name} <{address}>"))
            }
            (_, Some(address)) => Some(address.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphAttachment {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "contentBytes")]
    content_bytes: Option<String>,
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
}

impl GraphAttachment {
    fn to_ref(&self) -> Option<AttachmentRef> {
        let id = self.id.clone()?;
        let payload = self.content_bytes.as_deref().and_then(|encoded| {
            BASE64
                .decode(encoded.trim())
                .map_err(|err| warn!(attachment = %id, error = %err, "bad inline attachment bytes, will refetch"))
                .ok()
        });
        Some(AttachmentRef {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            content_type: self.content_type.clone().unwrap_or_default(),
            id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::TimeZone;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    fn connector() -> GraphApiConnector {
        GraphApiConnector::new(
            "owner@example.com",
            GraphCredentials {
                tenant_id: "tenant-a".to_string(),
                client_id: "client-a".to_string(),
                client_secret: "secret-a".to_string(),
            },
        )
        .expect("build connector")
    }

    #[test]
    fn oauth_token_response_deserializes() {
        let payload = r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600}"#;
        let decoded: OAuthTokenResponse =
            serde_json::from_str(payload).expect("decode oauth token response");
        assert_eq!(decoded.access_token, "abc");
        assert_eq!(decoded.expires_in, 3600);
    }

    #[test]
    fn cached_token_expires_one_minute_early() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let token = CachedAccessToken::from_response(
            OAuthTokenResponse {
                access_token: "t".to_string(),
                token_type: None,
                expires_in: 3600,
                ext_expires_in: None,
            },
            now,
        );
        assert_eq!(token.expires_at, now + Duration::seconds(3540));

        let stale = CachedAccessToken {
            access_token: "old".to_string(),
            expires_at: Utc::now() - Duration::seconds(1),
        };
        assert!(stale.is_expired());
    }

    #[test]
    fn absurd_token_lifetime_is_clamped() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let token = CachedAccessToken::from_response(
            OAuthTokenResponse {
                access_token: "t".to_string(),
                token_type: None,
                expires_in: u64::MAX,
                ext_expires_in: None,
            },
            now,
        );
        assert_eq!(token.expires_at, now + Duration::seconds(86_400 - 60));
    }

    #[test]
    fn messages_url_carries_paging_and_filter() {
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let url = connector()
            .messages_url(
                &FolderRef::new("Inbox", "AAMkInbox"),
                since,
                50,
                Cursor { offset: 100 },
            )
            .expect("url");

        assert!(url
            .path()
            .ends_with("/users/owner@example.com/mailFolders/AAMkInbox/messages"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("$top".to_string(), "50".to_string())));
        assert!(pairs.contains(&("$skip".to_string(), "100".to_string())));
        assert!(pairs.contains(&("$orderby".to_string(), "receivedDateTime desc".to_string())));
        assert!(pairs.contains(&(
            "$filter".to_string(),
            "receivedDateTime ge 2026-01-01T00:00:00Z".to_string()
        )));
        assert!(pairs.contains(&("$expand".to_string(), "attachments".to_string())));
    }

    #[test]
    fn page_decoding_orders_newest_first_and_sets_cursor() {
        let page: GraphMessagesPage = serde_json::from_value(json!({
            "value": [
                {"id": "old", "receivedDateTime": "2026-01-01T00:00:00Z"},
                {"id": "new", "receivedDateTime": "2026-01-03T00:00:00Z"},
                {"id": 42}
            ]
        }))
        .expect("decode page");

        let decoded = decode_messages_page(page, "Inbox", 3, Cursor::start());
        assert_eq!(decoded.returned, 3);
        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.next, Some(Cursor { offset: 3 }));
        let RawMessage::Graph(first) = &decoded.items[0] else {
            panic!("expected graph message");
        };
        assert_eq!(first.id.as_deref(), Some("new"));
    }

    #[test]
    fn short_page_has_no_next_cursor() {
        let page: GraphMessagesPage =
            serde_json::from_value(json!({"value": [{"id": "a"}]})).expect("decode page");
        let decoded = decode_messages_page(page, "Inbox", 50, Cursor { offset: 50 });
        assert_eq!(decoded.next, None);
    }

    #[test]
    fn graph_message_maps_fields_for_normalizer() {
        let message: GraphMessage = serde_json::from_value(json!({
            "id": "AAMk-1",
            "subject": "Invoice",
            "receivedDateTime": "2026-02-10T08:00:00Z",
            "from": {"emailAddress": {"name": "Billing", "address": "billing@example.com"}},
            "toRecipients": [
                {"emailAddress": {"address": "a@example.com"}},
                {"emailAddress": {"name": "B", "address": "b@example.com"}}
            ],
            "body": {"contentType": "html", "content": "<p>Paid</p>"},
            "attachments": [
                {
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "id": "att-1",
                    "name": "invoice.pdf",
                    "contentType": "application/pdf",
                    "contentBytes": "JVBERi0xLjQ="
                },
                {
                    "@odata.type": "#microsoft.graph.itemAttachment",
                    "id": "att-2",
                    "name": "forwarded",
                    "contentType": "application/pdf"
                }
            ]
        }))
        .expect("decode graph message");

        let fields = raw_fields(&message);
        assert_eq!(fields.native_id.as_deref(), Some("AAMk-1"));
        assert_eq!(fields.from.as_deref(), Some("Billing <billing@example.com>"));
        assert_eq!(fields.to.as_deref(), Some("a@example.com, B <b@example.com>"));
        assert_eq!(fields.body, Some((BodyKind::Html, "<p>Paid</p>".to_string())));
        assert_eq!(fields.attachments.len(), 1);
        assert_eq!(fields.attachments[0].payload.as_deref(), Some(&b"%PDF-1.4"[..]));
    }

    #[test]
    fn empty_body_falls_back_to_preview() {
        let message: GraphMessage = serde_json::from_value(json!({
            "id": "AAMk-2",
            "body": {"contentType": "text", "content": "  "},
            "bodyPreview": "short preview"
        }))
        .expect("decode graph message");

        let fields = raw_fields(&message);
        assert_eq!(fields.body, Some((BodyKind::Text, "short preview".to_string())));
    }

    #[test]
    fn system_folders_are_filtered() {
        assert!(is_system_folder("Sync Issues"));
        assert!(is_system_folder(" SearchFolders "));
        assert!(!is_system_folder("Projects"));
    }

    #[test]
    fn redaction_truncates_long_bodies() {
        let long = "x".repeat(500);
        let redacted = redact_response_body(&long);
        assert!(redacted.starts_with(&"x".repeat(200)));
        assert!(redacted.ends_with("[truncated 500 bytes]"));
    }

    #[test]
    fn well_known_ids_tag_localized_folders() {
        let mut folders = vec![
            FolderRef::new("Posteingang", "AAMk-1"),
            FolderRef::new("Projekte", "AAMk-2"),
        ];
        tag_role(&mut folders, "AAMk-1", FolderRole::Inbox);
        tag_role(&mut folders, "AAMk-9", FolderRole::Archive);
        assert_eq!(folders[0].role, Some(FolderRole::Inbox));
        assert_eq!(folders[1].role, None);
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.trim().eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Local stand-in for the token and Graph endpoints. Tokens are issued
    /// as `token-1`, `token-2`, ...; the first `rejected_tokens` get a 401.
    async fn spawn_graph_stub(rejected_tokens: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub address");
        let issued = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&issued);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let (status, body) = if request.starts_with("POST /token") {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        "200 OK",
                        format!(r#"{{"access_token":"token-{n}","token_type":"Bearer","expires_in":3600}}"#),
                    )
                } else {
                    let presented = request
                        .split("Bearer token-")
                        .nth(1)
                        .and_then(|rest| rest.split("\r\n").next())
                        .and_then(|n| n.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if presented <= rejected_tokens {
                        (
                            "401 Unauthorized",
                            r#"{"error":{"code":"InvalidAuthenticationToken"}}"#.to_string(),
                        )
                    } else {
                        ("200 OK", r#"{"value":[]}"#.to_string())
                    }
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), issued)
    }

    fn stubbed_connector(base: &str) -> GraphApiConnector {
        connector().with_endpoints(format!("{base}/v1.0"), format!("{base}/token"))
    }

    #[tokio::test]
    async fn unauthorized_page_gets_one_token_refresh() {
        let (base, issued) = spawn_graph_stub(1).await;
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let page = stubbed_connector(&base)
            .fetch_page(&FolderRef::new("Inbox", "inbox"), since, 10, Cursor::start())
            .await
            .expect("page after refresh");

        assert_eq!(page.returned, 0);
        assert_eq!(issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_unauthorized_is_an_auth_error() {
        let (base, issued) = spawn_graph_stub(99).await;
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let err = stubbed_connector(&base)
            .fetch_page(&FolderRef::new("Inbox", "inbox"), since, 10, Cursor::start())
            .await
            .expect_err("second 401 must fail");

        assert!(matches!(err, SyncError::Auth(_)));
        assert_eq!(issued.load(Ordering::SeqCst), 2);
    }
}
