//! SOAP envelope construction and response parsing
//!
//! ## Responsibilities
//!
//! - Wrap method bodies in the ONVIF envelope skeleton (namespaces,
//!   WS-Addressing routing, WS-Security block)
//! - Parse inbound envelopes into a normalized result or a typed fault
//! - Pass MIME multipart payloads through untouched

pub mod xml;

pub use xml::Element;

use crate::auth::{security_header, Credentials};
use crate::error::{Error, Result};
use crate::events::SubscriptionId;

/// SOAP 1.2 envelope namespace
pub const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// WS-Addressing namespace
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
/// ONVIF common schema namespace
pub const ONVIF_SCHEMA_NS: &str = "http://www.onvif.org/ver10/schema";
/// ONVIF device management namespace
pub const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";

/// Namespace declarations every envelope carries
const BASE_NAMESPACES: &[(&str, &str)] = &[
    ("s", SOAP_ENV_NS),
    ("wsa", WSA_NS),
    ("tt", ONVIF_SCHEMA_NS),
    ("tds", DEVICE_NS),
];

/// Per-request envelope options
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOptions {
    /// Capability-group namespace declarations, `(prefix, uri)`
    pub namespaces: Vec<(String, String)>,
    /// Routing target for WS-Eventing pulls aimed at a subscription
    /// endpoint rather than the service root
    pub subscription: Option<SubscriptionId>,
    /// Clock offset applied to the security timestamp, milliseconds
    pub clock_offset_ms: i64,
}

/// Build a complete request envelope around a capability-specific body
/// fragment. The security block is appended only when credentials are
/// present; namespace declarations already in the base set are not
/// duplicated.
pub fn build_envelope(
    body: &str,
    credentials: Option<&Credentials>,
    options: &EnvelopeOptions,
) -> String {
    let mut declarations = String::new();
    let mut seen: Vec<&str> = Vec::new();
    for (prefix, uri) in BASE_NAMESPACES {
        declarations.push_str(&format!(r#" xmlns:{}="{}""#, prefix, uri));
        seen.push(uri);
    }
    for (prefix, uri) in &options.namespaces {
        if seen.iter().any(|known| known == uri) {
            continue;
        }
        declarations.push_str(&format!(r#" xmlns:{}="{}""#, prefix, uri));
        seen.push(uri);
    }

    let mut header = String::new();
    if let Some(subscription) = &options.subscription {
        header.push_str(&format!(
            "<wsa:To>{}</wsa:To>",
            crate::auth::xml_escape(&subscription.address)
        ));
        if let Some(params) = &subscription.reference_parameters {
            header.push_str(params);
        }
    }
    if let Some(credentials) = credentials {
        header.push_str(&security_header(options.clock_offset_ms, credentials));
    }

    let envelope = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s:Envelope{declarations}><s:Header>{header}</s:Header><s:Body>{body}</s:Body></s:Envelope>"#,
    );

    collapse_whitespace(&envelope)
}

/// Drop whitespace-only text between tags so caller-supplied body fragments
/// with pretty-printed indentation do not produce spurious text nodes.
pub fn collapse_whitespace(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut pending = String::new();
    let mut between_tags = false;
    for c in xml.chars() {
        match c {
            '>' => {
                out.push(c);
                between_tags = true;
                pending.clear();
            }
            '<' => {
                between_tags = false;
                pending.clear();
                out.push(c);
            }
            c if between_tags && c.is_whitespace() => pending.push(c),
            c => {
                if !pending.is_empty() {
                    out.push_str(&pending);
                    pending.clear();
                }
                between_tags = false;
                out.push(c);
            }
        }
    }
    out
}

/// Parsed response payload
#[derive(Debug, Clone)]
pub enum SoapResponse {
    /// Normalized `<Method>Response` subtree
    Body(Element),
    /// MIME multipart payload, returned verbatim
    Raw(Vec<u8>),
}

impl SoapResponse {
    pub fn into_body(self) -> Result<Element> {
        match self {
            SoapResponse::Body(element) => Ok(element),
            SoapResponse::Raw(_) => Err(Error::Parse(
                "Expected envelope body, got multipart payload".to_string(),
            )),
        }
    }
}

/// Parse raw response bytes for `method`.
///
/// A payload opening with a MIME boundary marker is returned raw. A `Fault`
/// body becomes [`Error::Fault`]; a missing `<Method>Response` node becomes
/// [`Error::UnsupportedOperation`].
pub fn parse_response(data: &[u8], method: &str) -> Result<SoapResponse> {
    let head: Vec<u8> = data
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(2)
        .collect();
    if head == b"--" {
        return Ok(SoapResponse::Raw(data.to_vec()));
    }

    let tree = xml::parse(data)?;

    if let Some(fault) = tree.find("Fault") {
        return Err(extract_fault(fault));
    }

    let response_name = format!("{}Response", method);
    match tree.find(&response_name) {
        Some(body) => Ok(SoapResponse::Body(body.clone())),
        None => Err(Error::UnsupportedOperation(method.to_string())),
    }
}

/// Pull `{reason, code, detail}` out of a Fault node. Namespace-aware
/// parsers wrap text nodes one level deeper (`Reason/Text`), plain parsers
/// put text directly on the node; both shapes are accepted.
fn extract_fault(fault: &Element) -> Error {
    let reason = fault
        .find("Reason")
        .map(wrapped_text)
        .filter(|t| !t.is_empty())
        .or_else(|| fault.find_text("faultstring"))
        .unwrap_or_else(|| "Unknown fault".to_string());

    let code = fault
        .find("Code")
        .map(|code| {
            let mut parts = Vec::new();
            collect_code_values(code, &mut parts);
            parts.join("/")
        })
        .filter(|c| !c.is_empty())
        .or_else(|| fault.find_text("faultcode"))
        .unwrap_or_default();

    let detail = fault
        .find("Detail")
        .map(wrapped_text)
        .or_else(|| fault.find_text("detail"))
        .unwrap_or_default();

    Error::Fault {
        reason,
        code,
        detail,
    }
}

fn wrapped_text(element: &Element) -> String {
    if let Some(text) = element.child("Text") {
        return text.text().to_string();
    }
    if !element.text().is_empty() {
        return element.text().to_string();
    }
    // Fall back to the first non-empty descendant text
    fn first_text(element: &Element) -> Option<String> {
        if !element.text().is_empty() {
            return Some(element.text().to_string());
        }
        element.children.iter().find_map(first_text)
    }
    first_text(element).unwrap_or_default()
}

fn collect_code_values(code: &Element, out: &mut Vec<String>) {
    if let Some(value) = code.child("Value") {
        out.push(value.text().to_string());
    }
    if let Some(subcode) = code.child("Subcode") {
        collect_code_values(subcode, out);
    }
}
