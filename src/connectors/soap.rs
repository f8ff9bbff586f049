//! Minimal SOAP plumbing for the EWS connector: envelope building and a
//! namespace-agnostic element tree over quick-xml events.

use anyhow::{anyhow, bail, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" "#,
    r#"xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types" "#,
    r#"xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">"#,
    r#"<soap:Header><t:RequestServerVersion Version="Exchange2013_SP1"/></soap:Header>"#,
    r#"<soap:Body>"#,
);
const ENVELOPE_CLOSE: &str = "</soap:Body></soap:Envelope>";

pub fn envelope(body: &str) -> String {
    format!("{ENVELOPE_OPEN}{body}{ENVELOPE_CLOSE}")
}

pub fn escape(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

/// Element keyed by local name; namespace prefixes are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn parse(xml: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack = vec![XmlNode::default()];
        loop {
            match reader.read_event() {
                Err(e) => bail!("xml parse error at {}: {e}", reader.buffer_position()),
                Ok(Event::Eof) => break,
                Ok(Event::Start(start)) => stack.push(node_from_start(&start)?),
                Ok(Event::Empty(start)) => {
                    let node = node_from_start(&start)?;
                    stack
                        .last_mut()
                        .ok_or_else(|| anyhow!("xml element outside document"))?
                        .children
                        .push(node);
                }
                Ok(Event::End(_)) => {
                    let node = stack.pop().ok_or_else(|| anyhow!("unbalanced xml end tag"))?;
                    stack
                        .last_mut()
                        .ok_or_else(|| anyhow!("unbalanced xml end tag"))?
                        .children
                        .push(node);
                }
                Ok(Event::Text(text)) => {
                    let text = text.unescape()?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    let bytes = data.into_inner();
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&bytes));
                    }
                }
                Ok(_) => {}
            }
        }

        if stack.len() != 1 {
            bail!("xml document ended with {} unclosed elements", stack.len() - 1);
        }
        let mut document = stack.pop().unwrap_or_default();
        match document.children.len() {
            1 => Ok(document.children.remove(0)),
            0 => bail!("empty xml document"),
            n => bail!("xml document has {n} root elements"),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Walk a chain of child names from this node.
    pub fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    pub fn text_at(&self, names: &[&str]) -> Option<&str> {
        self.path(names)
            .map(|node| node.text.trim())
            .filter(|text| !text.is_empty())
    }

    /// Depth-first search for the first descendant with this name.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.find_all(name, out);
        }
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(XmlNode {
        name,
        attrs,
        ..XmlNode::default()
    })
}

/// Surface a SOAP fault, or a response whose every message has
/// `ResponseClass="Error"`, as text. Batches with some successful messages
/// are left to the caller to sift item by item.
pub fn response_error(root: &XmlNode) -> Option<String> {
    if let Some(fault) = root.find("Fault") {
        let reason = fault
            .text_at(&["faultstring"])
            .or_else(|| fault.find("Text").map(|node| node.text.trim()))
            .unwrap_or("unspecified fault");
        return Some(format!("soap fault: {reason}"));
    }

    let mut containers = Vec::new();
    root.find_all("ResponseMessages", &mut containers);
    let messages: Vec<&XmlNode> = containers
        .iter()
        .flat_map(|container| container.children.iter())
        .collect();
    let is_error = |message: &&XmlNode| message.attr("ResponseClass") == Some("Error");
    if messages.is_empty() || !messages.iter().all(is_error) {
        return None;
    }
    let failed = messages.first()?;
    let code = failed.text_at(&["ResponseCode"]).unwrap_or("UnknownError");
    let text = failed.text_at(&["MessageText"]).unwrap_or("");
    Some(format!("{code}: {text}").trim_end_matches([':', ' ']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_elements_by_local_name() {
        let xml = r#"<s:Envelope xmlns:s="x" xmlns:t="y"><s:Body>
            <t:Folder><t:FolderId Id="abc" ChangeKey="ck"/><t:DisplayName>Q&amp;A</t:DisplayName></t:Folder>
        </s:Body></s:Envelope>"#;

        let root = XmlNode::parse(xml).expect("parse");
        assert_eq!(root.name, "Envelope");
        let folder = root.find("Folder").expect("folder");
        assert_eq!(folder.text_at(&["DisplayName"]), Some("Q&A"));
        assert_eq!(folder.child("FolderId").and_then(|id| id.attr("Id")), Some("abc"));
    }

    #[test]
    fn collects_all_matches_in_document_order() {
        let xml = "<a><b n='1'/><c><b n='2'/></c><b n='3'/></a>";
        let root = XmlNode::parse(xml).expect("parse");
        let mut found = Vec::new();
        root.find_all("b", &mut found);
        let order: Vec<_> = found.iter().filter_map(|node| node.attr("n")).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(XmlNode::parse("<a><b></b>").is_err());
        assert!(XmlNode::parse("").is_err());
    }

    #[test]
    fn envelope_wraps_and_escapes() {
        let body = format!("<m:Probe>{}</m:Probe>", escape("a<b & c"));
        let wrapped = envelope(&body);
        assert!(wrapped.contains("<m:Probe>a&lt;b &amp; c</m:Probe>"));
        let root = XmlNode::parse(&wrapped).expect("parse envelope");
        assert_eq!(root.text_at(&["Body", "Probe"]), Some("a<b & c"));
    }

    #[test]
    fn reports_error_response_class() {
        let xml = r#"<Envelope><Body><FindItemResponse><ResponseMessages>
            <FindItemResponseMessage ResponseClass="Error">
              <MessageText>The specified folder could not be found.</MessageText>
              <ResponseCode>ErrorFolderNotFound</ResponseCode>
            </FindItemResponseMessage>
        </ResponseMessages></FindItemResponse></Body></Envelope>"#;
        let root = XmlNode::parse(xml).expect("parse");
        assert_eq!(
            response_error(&root).as_deref(),
            Some("ErrorFolderNotFound: The specified folder could not be found.")
        );
    }

    #[test]
    fn partial_batch_errors_are_not_fatal() {
        let xml = r#"<Envelope><Body><GetItemResponse><ResponseMessages>
            <GetItemResponseMessage ResponseClass="Success"><Items/></GetItemResponseMessage>
            <GetItemResponseMessage ResponseClass="Error"><ResponseCode>ErrorItemNotFound</ResponseCode></GetItemResponseMessage>
        </ResponseMessages></GetItemResponse></Body></Envelope>"#;
        let root = XmlNode::parse(xml).expect("parse");
        assert_eq!(response_error(&root), None);
    }

    #[test]
    fn reports_soap_faults() {
        let xml = "<Envelope><Body><Fault><faultcode>a:ErrorSchemaValidation</faultcode><faultstring>bad request</faultstring></Fault></Body></Envelope>";
        let root = XmlNode::parse(xml).expect("parse");
        assert_eq!(response_error(&root).as_deref(), Some("soap fault: bad request"));
    }
}
