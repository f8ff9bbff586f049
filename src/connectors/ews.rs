use std::time::Duration as StdDuration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::connectors::soap::{self, XmlNode};
use crate::connectors::{
    BackendKind, Cursor, FolderRef, FolderRole, MailConnector, Page, RawMessage,
};
use crate::error::{SyncError, SyncResult};
use crate::models::{AttachmentRef, MessageRecord};
use crate::normalize::{BodyKind, RawFields};

const REQUEST_TIMEOUT_SECONDS: u64 = 120;
const MAX_BUSY_RETRIES: usize = 3;
const FOLDER_PAGE_SIZE: usize = 500;
const DISTINGUISHED_PREFIX: &str = "distinguished:";
const MAIL_FOLDER_CLASS: &str = "IPF.Note";
const FOLDER_NOT_FOUND_CODE: &str = "ErrorFolderNotFound";

#[derive(Debug, Clone)]
pub struct EwsSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl EwsSettings {
    /// Accept either a bare host (`outlook.office365.com`) or a full URL.
    pub fn endpoint_for_server(server: &str) -> String {
        let server = server.trim().trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{server}/EWS/Exchange.asmx")
        }
    }
}

/// SOAP client for the legacy Exchange Web Services endpoint.
#[derive(Debug)]
pub struct EwsConnector {
    client: Client,
    settings: EwsSettings,
}

impl EwsConnector {
    pub fn new(settings: EwsSettings) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| SyncError::Config(format!("build ews http client: {e}")))?;
        Ok(Self { client, settings })
    }

    async fn call(&self, body: &str, operation: &str) -> SyncResult<XmlNode> {
        let payload = soap::envelope(body);
        let mut backoff_seconds = 2u64;

        for attempt in 0..=MAX_BUSY_RETRIES {
            let response = self
                .client
                .post(&self.settings.endpoint)
                .basic_auth(&self.settings.username, Some(&self.settings.password))
                .header("content-type", "text/xml; charset=utf-8")
                .body(payload.clone())
                .send()
                .await
                .with_context(|| format!("send ews {operation}"))
                .map_err(SyncError::transport)?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(SyncError::Auth(format!(
                    "ews {operation} rejected credentials for {} (status={status})",
                    self.settings.username
                )));
            }
            if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_BUSY_RETRIES {
                    return Err(SyncError::Transport(format!(
                        "ews {operation} still throttled after {MAX_BUSY_RETRIES} retries"
                    )));
                }
                warn!(operation, attempt = attempt + 1, backoff_seconds, "ews busy, backing off");
                sleep(StdDuration::from_secs(backoff_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                continue;
            }

            let text = response
                .text()
                .await
                .with_context(|| format!("read ews {operation} response"))
                .map_err(SyncError::transport)?;

            // Faults come back as HTTP 500 with a SOAP body; prefer the fault text.
            let parsed = XmlNode::parse(&text);
            if let Ok(root) = &parsed {
                if let Some(message) = soap::response_error(root) {
                    if message.starts_with(FOLDER_NOT_FOUND_CODE) {
                        return Err(SyncError::NotFound(format!("ews {operation}: {message}")));
                    }
                    return Err(SyncError::Transport(format!("ews {operation}: {message}")));
                }
            }
            if !status.is_success() {
                return Err(SyncError::Transport(format!(
                    "ews {operation} failed: status={status}"
                )));
            }
            return parsed
                .with_context(|| format!("decode ews {operation} response"))
                .map_err(SyncError::transport);
        }

        Err(SyncError::Transport(format!(
            "ews {operation} failed without response"
        )))
    }

    async fn distinguished_id(&self, role: FolderRole) -> Option<String> {
        match self
            .call(&get_folder_request(distinguished_name(role)), "GetFolder")
            .await
        {
            Ok(root) => root
                .find("FolderId")
                .and_then(|id| id.attr("Id"))
                .map(str::to_string),
            Err(err) => {
                debug!(?role, error = %err, "distinguished folder not resolved");
                None
            }
        }
    }

    async fn folder_children(&self, parent: &str) -> SyncResult<Vec<EwsFolder>> {
        let mut folders = Vec::new();
        let mut offset = 0usize;
        loop {
            let root = self
                .call(&find_folder_request(parent, offset), "FindFolder")
                .await?;
            let (page, includes_last) = parse_folders(&root);
            let count = page.len();
            folders.extend(page);
            if includes_last || count == 0 {
                break;
            }
            offset += count;
        }
        Ok(folders)
    }
}

#[async_trait(?Send)]
impl MailConnector for EwsConnector {
    fn name(&self) -> &str {
        "ews"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ews
    }

    async fn authenticate(&self) -> SyncResult<()> {
        let root = self.call(&get_folder_request("inbox"), "GetFolder").await?;
        if root.find("Folder").is_none() {
            return Err(SyncError::Auth(
                "ews GetFolder(inbox) returned no folder".to_string(),
            ));
        }
        debug!(endpoint = %self.settings.endpoint, "ews session verified");
        Ok(())
    }

    async fn list_folders(&self) -> SyncResult<Vec<FolderRef>> {
        let mut folders = Vec::new();
        let mut pending: Vec<(String, Option<String>)> =
            vec![(format!("{DISTINGUISHED_PREFIX}msgfolderroot"), None)];

        while let Some((parent_ref, parent_name)) = pending.pop() {
            let children = match (self.folder_children(&parent_ref).await, &parent_name) {
                (Ok(children), _) => children,
                (Err(err), Some(parent)) if !err.is_fatal() => {
                    warn!(folder = %parent, error = %err, "child folder listing failed, skipping subtree");
                    continue;
                }
                (Err(err), _) => return Err(err),
            };
            for folder in children {
                if !folder.is_mail_folder() {
                    continue;
                }
                let name = match &parent_name {
                    Some(parent) => format!("{parent}/{}", folder.display_name),
                    None => folder.display_name.clone(),
                };
                if folder.child_count > 0 {
                    pending.push((folder.id.clone(), Some(name.clone())));
                }
                folders.push(FolderRef::new(name, folder.id));
            }
        }

        for role in [FolderRole::Inbox, FolderRole::Archive] {
            if let Some(id) = self.distinguished_id(role).await {
                if let Some(folder) = folders.iter_mut().find(|folder| folder.backend_ref == id) {
                    folder.role = Some(role);
                }
            }
        }
        info!(count = folders.len(), "ews folders discovered");
        Ok(folders)
    }

    fn well_known_folder(&self, role: FolderRole) -> Option<FolderRef> {
        let name = match role {
            FolderRole::Inbox => "Inbox",
            FolderRole::Archive => "Archive",
        };
        Some(
            FolderRef::new(name, format!("{DISTINGUISHED_PREFIX}{}", distinguished_name(role)))
                .with_role(role),
        )
    }

    async fn fetch_page(
        &self,
        folder: &FolderRef,
        since: DateTime<Utc>,
        chunk_size: usize,
        cursor: Cursor,
    ) -> SyncResult<Page> {
        let root = self
            .call(
                &find_item_request(&folder.backend_ref, since, chunk_size, cursor.offset),
                "FindItem",
            )
            .await?;
        let listing = parse_find_item(&root);
        if listing.item_ids.is_empty() {
            return Ok(Page::empty());
        }

        let root = self
            .call(&get_item_request(&listing.item_ids), "GetItem")
            .await?;
        let mut messages = parse_messages(&root);
        messages.sort_by(|a, b| b.received.cmp(&a.received));

        let returned = listing.item_ids.len();
        let next = (!listing.includes_last).then(|| cursor.advanced_by(returned));
        Ok(Page {
            items: messages.into_iter().map(RawMessage::Ews).collect(),
            returned,
            next,
        })
    }

    async fn fetch_attachment(
        &self,
        _record: &MessageRecord,
        attachment: &AttachmentRef,
    ) -> SyncResult<Vec<u8>> {
        if let Some(bytes) = &attachment.payload {
            return Ok(bytes.clone());
        }
        let root = self
            .call(&get_attachment_request(&attachment.id), "GetAttachment")
            .await?;
        parse_attachment_content(&root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EwsFolder {
    id: String,
    display_name: String,
    folder_class: Option<String>,
    child_count: u32,
}

impl EwsFolder {
    fn is_mail_folder(&self) -> bool {
        self.folder_class
            .as_deref()
            .map_or(true, |class| class.starts_with(MAIL_FOLDER_CLASS))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ItemListing {
    item_ids: Vec<String>,
    includes_last: bool,
}

/// One message as returned by GetItem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EwsMessage {
    pub item_id: String,
    pub subject: Option<String>,
    pub received: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub body: Option<(BodyKind, String)>,
    pub attachments: Vec<AttachmentRef>,
}

pub fn raw_fields(message: &EwsMessage) -> RawFields {
    RawFields {
        native_id: Some(message.item_id.clone()),
        received: message.received.clone(),
        from: message.from.clone(),
        to: (!message.to.is_empty()).then(|| message.to.join(", ")),
        subject: message.subject.clone(),
        body: message.body.clone(),
        attachments: message.attachments.clone(),
    }
}

fn distinguished_name(role: FolderRole) -> &'static str {
    match role {
        FolderRole::Inbox => "inbox",
        FolderRole::Archive => "archive",
    }
}

fn folder_id_xml(backend_ref: &str) -> String {
    match backend_ref.strip_prefix(DISTINGUISHED_PREFIX) {
        Some(name) => format!(r#"<t:DistinguishedFolderId Id="{}"/>"#, soap::escape(name)),
        None => format!(r#"<t:FolderId Id="{}"/>"#, soap::escape(backend_ref)),
    }
}

fn get_folder_request(distinguished: &str) -> String {
    format!(
        concat!(
            "<m:GetFolder>",
            "<m:FolderShape><t:BaseShape>IdOnly</t:BaseShape></m:FolderShape>",
            "<m:FolderIds>{}</m:FolderIds>",
            "</m:GetFolder>"
        ),
        folder_id_xml(&format!("{DISTINGUISHED_PREFIX}{distinguished}"))
    )
}

fn find_folder_request(parent_ref: &str, offset: usize) -> String {
    format!(
        concat!(
            r#"<m:FindFolder Traversal="Shallow">"#,
            "<m:FolderShape><t:BaseShape>Default</t:BaseShape>",
            "<t:AdditionalProperties>",
            r#"<t:FieldURI FieldURI="folder:FolderClass"/>"#,
            r#"<t:FieldURI FieldURI="folder:ChildFolderCount"/>"#,
            "</t:AdditionalProperties></m:FolderShape>",
            r#"<m:IndexedPageFolderView MaxEntriesReturned="{}" Offset="{}" BasePoint="Beginning"/>"#,
            "<m:ParentFolderIds>{}</m:ParentFolderIds>",
            "</m:FindFolder>"
        ),
        FOLDER_PAGE_SIZE,
        offset,
        folder_id_xml(parent_ref)
    )
}

fn find_item_request(
    folder_ref: &str,
    since: DateTime<Utc>,
    chunk_size: usize,
    offset: usize,
) -> String {
    format!(
        concat!(
            r#"<m:FindItem Traversal="Shallow">"#,
            "<m:ItemShape><t:BaseShape>IdOnly</t:BaseShape></m:ItemShape>",
            r#"<m:IndexedPageItemView MaxEntriesReturned="{}" Offset="{}" BasePoint="Beginning"/>"#,
            "<m:Restriction><t:IsGreaterThanOrEqualTo>",
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            r#"<t:FieldURIOrConstant><t:Constant Value="{}"/></t:FieldURIOrConstant>"#,
            "</t:IsGreaterThanOrEqualTo></m:Restriction>",
            r#"<m:SortOrder><t:FieldOrder Order="Descending">"#,
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            "</t:FieldOrder></m:SortOrder>",
            "<m:ParentFolderIds>{}</m:ParentFolderIds>",
            "</m:FindItem>"
        ),
        chunk_size,
        offset,
        since.to_rfc3339_opts(SecondsFormat::Secs, true),
        folder_id_xml(folder_ref)
    )
}

fn get_item_request(item_ids: &[String]) -> String {
    let ids: String = item_ids
        .iter()
        .map(|id| format!(r#"<t:ItemId Id="{}"/>"#, soap::escape(id)))
        .collect();
    format!(
        concat!(
            "<m:GetItem><m:ItemShape>",
            "<t:BaseShape>IdOnly</t:BaseShape>",
            "<t:BodyType>Best</t:BodyType>",
            "<t:AdditionalProperties>",
            r#"<t:FieldURI FieldURI="item:Subject"/>"#,
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            r#"<t:FieldURI FieldURI="item:Body"/>"#,
            r#"<t:FieldURI FieldURI="item:Attachments"/>"#,
            r#"<t:FieldURI FieldURI="message:From"/>"#,
            r#"<t:FieldURI FieldURI="message:ToRecipients"/>"#,
            "</t:AdditionalProperties>",
            "</m:ItemShape><m:ItemIds>{}</m:ItemIds></m:GetItem>"
        ),
        ids
    )
}

fn get_attachment_request(attachment_id: &str) -> String {
    format!(
        r#"<m:GetAttachment><m:AttachmentIds><t:AttachmentId Id="{}"/></m:AttachmentIds></m:GetAttachment>"#,
        soap::escape(attachment_id)
    )
}

fn parse_folders(root: &XmlNode) -> (Vec<EwsFolder>, bool) {
    let Some(root_folder) = root.find("RootFolder") else {
        return (Vec::new(), true);
    };
    let includes_last = root_folder
        .attr("IncludesLastItemInRange")
        .map_or(true, |value| value.eq_ignore_ascii_case("true"));

    let folders = root_folder
        .child("Folders")
        .map(|container| {
            container
                .children
                .iter()
                .filter_map(|folder| {
                    let id = folder.child("FolderId")?.attr("Id")?.to_string();
                    let display_name = folder.text_at(&["DisplayName"])?.to_string();
                    Some(EwsFolder {
                        id,
                        display_name,
                        folder_class: folder.text_at(&["FolderClass"]).map(str::to_string),
                        child_count: folder
                            .text_at(&["ChildFolderCount"])
                            .and_then(|count| count.parse().ok())
                            .unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    (folders, includes_last)
}

fn parse_find_item(root: &XmlNode) -> ItemListing {
    let Some(root_folder) = root.find("RootFolder") else {
        return ItemListing {
            item_ids: Vec::new(),
            includes_last: true,
        };
    };

    let item_ids = root_folder
        .child("Items")
        .map(|items| {
            items
                .children
                .iter()
                .filter_map(|item| item.child("ItemId")?.attr("Id").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    ItemListing {
        item_ids,
        includes_last: root_folder
            .attr("IncludesLastItemInRange")
            .map_or(true, |value| value.eq_ignore_ascii_case("true")),
    }
}

fn parse_messages(root: &XmlNode) -> Vec<EwsMessage> {
    let mut responses = Vec::new();
    root.find_all("GetItemResponseMessage", &mut responses);

    let mut messages = Vec::new();
    for response in responses {
        if response.attr("ResponseClass") == Some("Error") {
            warn!(
                code = response.text_at(&["ResponseCode"]).unwrap_or("unknown"),
                "ews GetItem skipped one item"
            );
            continue;
        }
        let Some(items) = response.child("Items") else {
            continue;
        };
        messages.extend(items.children.iter().filter_map(parse_message));
    }
    messages
}

fn parse_message(item: &XmlNode) -> Option<EwsMessage> {
    let item_id = item.child("ItemId")?.attr("Id")?.to_string();

    let body = item.child("Body").and_then(|body| {
        let content = body.text.trim();
        if content.is_empty() {
            return None;
        }
        let kind = match body.attr("BodyType") {
            Some(kind) if kind.eq_ignore_ascii_case("html") => BodyKind::Html,
            _ => BodyKind::Text,
        };
        Some((kind, content.to_string()))
    });

    let to = item
        .child("ToRecipients")
        .map(|recipients| {
            recipients
                .children_named("Mailbox")
                .filter_map(mailbox_display)
                .collect()
        })
        .unwrap_or_default();

    let attachments = item
        .child("Attachments")
        .map(|container| {
            container
                .children_named("FileAttachment")
                .filter_map(|attachment| {
                    let id = attachment.child("AttachmentId")?.attr("Id")?.to_string();
                    Some(AttachmentRef {
                        name: attachment
                            .text_at(&["Name"])
                            .map(str::to_string)
                            .unwrap_or_else(|| id.clone()),
                        content_type: attachment
                            .text_at(&["ContentType"])
                            .unwrap_or_default()
                            .to_string(),
                        id,
                        payload: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(EwsMessage {
        item_id,
        subject: item.text_at(&["Subject"]).map(str::to_string),
        received: item.text_at(&["DateTimeReceived"]).map(str::to_string),
        from: item
            .path(&["From", "Mailbox"])
            .and_then(mailbox_display),
        to,
        body,
        attachments,
    })
}

fn mailbox_display(mailbox: &XmlNode) -> Option<String> {
    let name = mailbox.text_at(&["Name"]);
    let address = mailbox.text_at(&["EmailAddress"]);
    match (name, address) {
        (Some(name), Some(address)) if !name.eq_ignore_ascii_case(address) => {
            Some(format!("{name} <{address}>"))
        }
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

fn parse_attachment_content(root: &XmlNode) -> SyncResult<Vec<u8>> {
    let content = root
        .find("FileAttachment")
        .and_then(|attachment| attachment.text_at(&["Content"]))
        .ok_or_else(|| SyncError::NotFound("ews attachment has no content".to_string()))?;
    BASE64
        .decode(content)
        .map_err(|e| SyncError::Item(format!("ews attachment content is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn parse(xml: &str) -> XmlNode {
        XmlNode::parse(xml).expect("parse xml")
    }

    #[test]
    fn endpoint_accepts_host_or_url() {
        assert_eq!(
            EwsSettings::endpoint_for_server("outlook.office365.com"),
            "https://outlook.office365.com/EWS/Exchange.asmx"
        );
        assert_eq!(
            EwsSettings::endpoint_for_server("https://mail.example.com/EWS/Exchange.asmx/"),
            "https://mail.example.com/EWS/Exchange.asmx"
        );
    }

    #[test]
    fn well_known_archive_uses_distinguished_id() {
        let connector = EwsConnector::new(EwsSettings {
            endpoint: "https://mail.example.com/EWS/Exchange.asmx".to_string(),
            username: "me".to_string(),
            password: "pw".to_string(),
        })
        .expect("connector");
        let archive = connector
            .well_known_folder(FolderRole::Archive)
            .expect("archive");
        assert_eq!(archive.role, Some(FolderRole::Archive));

        let since = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let request = find_item_request(&archive.backend_ref, since, 50, 0);
        assert!(request.contains(r#"<t:DistinguishedFolderId Id="archive"/>"#));
    }

    #[test]
    fn find_item_request_pages_and_filters() {
        let since = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let request = find_item_request("AQMk=", since, 50, 100);

        assert!(request.contains(r#"MaxEntriesReturned="50" Offset="100""#));
        assert!(request.contains(r#"<t:Constant Value="2026-01-15T00:00:00Z"/>"#));
        assert!(request.contains(r#"Order="Descending""#));
        assert!(request.contains(r#"<t:FolderId Id="AQMk="/>"#));
        parse(&soap::envelope(&request));
    }

    #[test]
    fn distinguished_refs_use_distinguished_ids() {
        assert_eq!(
            folder_id_xml("distinguished:inbox"),
            r#"<t:DistinguishedFolderId Id="inbox"/>"#
        );
        assert!(get_folder_request("inbox").contains(r#"DistinguishedFolderId Id="inbox""#));
    }

    #[test]
    fn parses_folder_listing() {
        let root = parse(
            r#"<Envelope><Body><FindFolderResponse><ResponseMessages>
            <FindFolderResponseMessage ResponseClass="Success"><ResponseCode>NoError</ResponseCode>
            <RootFolder TotalItemsInView="3" IncludesLastItemInRange="true"><Folders>
              <Folder><FolderId Id="f-inbox"/><FolderClass>IPF.Note</FolderClass><DisplayName>Inbox</DisplayName><ChildFolderCount>1</ChildFolderCount></Folder>
              <Folder><FolderId Id="f-cal"/><FolderClass>IPF.Appointment</FolderClass><DisplayName>Calendar</DisplayName><ChildFolderCount>0</ChildFolderCount></Folder>
              <Folder><FolderId Id="f-arch"/><DisplayName>Archive</DisplayName></Folder>
            </Folders></RootFolder>
            </FindFolderResponseMessage></ResponseMessages></FindFolderResponse></Body></Envelope>"#,
        );

        let (folders, includes_last) = parse_folders(&root);
        assert!(includes_last);
        assert_eq!(folders.len(), 3);
        assert_eq!(folders[0].child_count, 1);
        assert!(folders[0].is_mail_folder());
        assert!(!folders[1].is_mail_folder());
        assert!(folders[2].is_mail_folder());
    }

    #[test]
    fn parses_find_item_page() {
        let root = parse(
            r#"<Envelope><Body><FindItemResponse><ResponseMessages><FindItemResponseMessage ResponseClass="Success">
            <RootFolder IndexedPagingOffset="2" TotalItemsInView="5" IncludesLastItemInRange="false"><Items>
              <Message><ItemId Id="i1" ChangeKey="c"/></Message>
              <MeetingRequest><ItemId Id="i2" ChangeKey="c"/></MeetingRequest>
            </Items></RootFolder>
            </FindItemResponseMessage></ResponseMessages></FindItemResponse></Body></Envelope>"#,
        );

        let listing = parse_find_item(&root);
        assert_eq!(listing.item_ids, vec!["i1".to_string(), "i2".to_string()]);
        assert!(!listing.includes_last);
    }

    #[test]
    fn parses_get_item_messages_and_skips_errors() {
        let root = parse(
            r#"<Envelope><Body><GetItemResponse><ResponseMessages>
            <GetItemResponseMessage ResponseClass="Success"><Items><Message>
              <ItemId Id="i1"/>
              <Subject>Contract &amp; terms</Subject>
              <Body BodyType="HTML">&lt;p&gt;Signed&lt;/p&gt;</Body>
              <Attachments>
                <FileAttachment><AttachmentId Id="a1"/><Name>contract.pdf</Name><ContentType>application/pdf</ContentType></FileAttachment>
                <ItemAttachment><AttachmentId Id="a2"/><Name>fwd</Name></ItemAttachment>
              </Attachments>
              <DateTimeReceived>2026-02-01T09:00:00Z</DateTimeReceived>
              <ToRecipients><Mailbox><Name>Bob</Name><EmailAddress>bob@example.com</EmailAddress></Mailbox></ToRecipients>
              <From><Mailbox><Name>Ann</Name><EmailAddress>ann@example.com</EmailAddress></Mailbox></From>
            </Message></Items></GetItemResponseMessage>
            <GetItemResponseMessage ResponseClass="Error"><ResponseCode>ErrorItemNotFound</ResponseCode></GetItemResponseMessage>
            </ResponseMessages></GetItemResponse></Body></Envelope>"#,
        );

        let messages = parse_messages(&root);
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.subject.as_deref(), Some("Contract & terms"));
        assert_eq!(message.from.as_deref(), Some("Ann <ann@example.com>"));
        assert_eq!(message.to, vec!["Bob <bob@example.com>".to_string()]);
        assert_eq!(message.body, Some((BodyKind::Html, "<p>Signed</p>".to_string())));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].id, "a1");

        let fields = raw_fields(message);
        assert_eq!(fields.native_id.as_deref(), Some("i1"));
        assert_eq!(fields.to.as_deref(), Some("Bob <bob@example.com>"));
    }

    #[test]
    fn decodes_attachment_content() {
        let root = parse(
            r#"<Envelope><Body><GetAttachmentResponse><ResponseMessages><GetAttachmentResponseMessage ResponseClass="Success">
            <Attachments><FileAttachment><AttachmentId Id="a1"/><Name>x.pdf</Name><Content>JVBERi0xLjQ=</Content></FileAttachment></Attachments>
            </GetAttachmentResponseMessage></ResponseMessages></GetAttachmentResponse></Body></Envelope>"#,
        );
        assert_eq!(parse_attachment_content(&root).expect("content"), b"%PDF-1.4");
    }
}
