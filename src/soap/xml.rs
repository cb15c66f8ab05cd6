//! XML tree parsing for SOAP payloads.
//!
//! quick-xml events are folded into a plain element tree with namespace
//! prefixes stripped, so `tds:GetServicesResponse` and
//! `GetServicesResponse` resolve to the same name. quick-xml does not
//! expand entities, so the tree is safe against XXE payloads.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One parsed XML element with prefix-stripped name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// Direct child by prefix-stripped name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First matching descendant, depth-first
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// All matching descendants, document order
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        if self.name == name {
            out.push(self);
        }
        for child in &self.children {
            child.find_all(name, out);
        }
    }

    /// Descendants collected into a fresh vector
    pub fn collect(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.find_all(name, &mut out);
        out
    }

    /// Trimmed text content of this element
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Text of the first matching descendant
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.find(name).map(|e| e.text().to_string()).filter(|t| !t.is_empty())
    }

    /// Attribute by prefix-stripped key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse raw bytes into an element tree rooted at the document element.
pub fn parse(data: &[u8]) -> Result<Element> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| Error::Parse(format!("Invalid UTF-8: {}", e)))?;

    let mut reader = Reader::from_str(xml_str);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from_start(e));
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from_start(e);
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::Parse("Unbalanced closing tag".to_string()))?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::Parse(format!("Text decode: {}", e)))?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::Parse("Unclosed element at end of document".to_string()));
    }

    root.ok_or_else(|| Error::Parse("Empty document".to_string()))
}

fn element_from_start(e: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        if let Ok(value) = attr.unescape_value() {
            attributes.push((key, value.into_owned()));
        }
    }
    Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_stripped() {
        let tree = parse(
            br#"<tds:Envelope xmlns:tds="urn:x"><tds:Body attr="v"><Inner>hello</Inner></tds:Body></tds:Envelope>"#,
        )
        .unwrap();
        assert_eq!(tree.name, "Envelope");
        let body = tree.child("Body").unwrap();
        assert_eq!(body.attribute("attr"), Some("v"));
        assert_eq!(body.child("Inner").unwrap().text(), "hello");
    }

    #[test]
    fn test_find_descendant() {
        let tree = parse(b"<a><b><c>deep</c></b></a>").unwrap();
        assert_eq!(tree.find("c").unwrap().text(), "deep");
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn test_self_closing_and_collect() {
        let tree = parse(b"<a><item/><item>x</item></a>").unwrap();
        assert_eq!(tree.collect("item").len(), 2);
    }

    #[test]
    fn test_malformed_is_parse_error() {
        assert!(matches!(parse(b"<a><b></a>"), Err(Error::Parse(_))));
        assert!(matches!(parse(b"not xml at all"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_entities_unescaped() {
        let tree = parse(b"<a>x &amp; y</a>").unwrap();
        assert_eq!(tree.text(), "x & y");
    }
}
