//! Discovery data model

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::soap::Element;

/// One device found by a WS-Discovery probe. Identity key is `urn`;
/// records are immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeMatch {
    /// Endpoint reference address, the device identity
    pub urn: String,
    /// Human-readable name from the name scope, underscores restored to spaces
    pub name: Option<String>,
    /// Source address the probe match arrived from
    pub address: String,
    /// Resolved service endpoint, the XAddr reachable from this host
    pub service: Option<String>,
    pub hardware: Option<String>,
    pub location: Option<String>,
    pub types: Vec<String>,
    pub xaddrs: Vec<String>,
    pub scopes: Vec<String>,
}

const SCOPE_HARDWARE: &str = "onvif://www.onvif.org/hardware/";
const SCOPE_LOCATION: &str = "onvif://www.onvif.org/location/";
const SCOPE_NAME: &str = "onvif://www.onvif.org/name/";

/// Suffix of a scope URI under a fixed prefix, if it matches.
pub fn scope_suffix<'a>(scope: &'a str, prefix: &str) -> Option<&'a str> {
    scope
        .strip_prefix(prefix)
        .filter(|suffix| !suffix.is_empty())
}

impl ProbeMatch {
    /// Build a record from a parsed `ProbeMatch` element and the datagram's
    /// source address. Returns `None` when the endpoint urn is missing.
    pub fn from_element(element: &Element, source: IpAddr) -> Option<Self> {
        let urn = element
            .find("EndpointReference")
            .and_then(|r| r.find_text("Address"))?;

        let xaddrs: Vec<String> = element
            .find_text("XAddrs")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let types: Vec<String> = element
            .find_text("Types")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let scopes: Vec<String> = element
            .find_text("Scopes")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // Devices advertise several candidate addresses; the one whose host
        // matches the responding socket is the one reachable from here.
        let service = select_xaddr(&xaddrs, source);

        let mut name = None;
        let mut hardware = None;
        let mut location = None;
        for scope in &scopes {
            if let Some(value) = scope_suffix(scope, SCOPE_NAME) {
                name = Some(value.replace('_', " "));
            } else if let Some(value) = scope_suffix(scope, SCOPE_HARDWARE) {
                hardware = Some(value.to_string());
            } else if let Some(value) = scope_suffix(scope, SCOPE_LOCATION) {
                location = Some(value.to_string());
            }
        }

        Some(Self {
            urn,
            name,
            address: source.to_string(),
            service,
            hardware,
            location,
            types,
            xaddrs,
            scopes,
        })
    }
}

fn select_xaddr(xaddrs: &[String], source: IpAddr) -> Option<String> {
    if xaddrs.len() > 1 {
        let source_host = source.to_string();
        for xaddr in xaddrs {
            if let Ok(parsed) = url::Url::parse(xaddr) {
                if parsed.host_str() == Some(source_host.as_str()) {
                    return Some(xaddr.clone());
                }
            }
        }
    }
    xaddrs.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::xml;

    fn probe_match_payload() -> &'static [u8] {
        br#"<Envelope><Body><ProbeMatches><ProbeMatch>
            <EndpointReference><Address>urn:uuid:1419d68a-1dd2-11b2-a105-000000000000</Address></EndpointReference>
            <Types>dn:NetworkVideoTransmitter</Types>
            <Scopes>onvif://www.onvif.org/name/Front_Door onvif://www.onvif.org/hardware/IPC-1000 onvif://www.onvif.org/location/lobby</Scopes>
            <XAddrs>http://192.168.0.5/onvif/device_service http://10.0.0.5/onvif/device_service</XAddrs>
        </ProbeMatch></ProbeMatches></Body></Envelope>"#
    }

    #[test]
    fn test_probe_match_fields() {
        let tree = xml::parse(probe_match_payload()).unwrap();
        let element = tree.find("ProbeMatch").unwrap();
        let record = ProbeMatch::from_element(element, "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(record.urn, "urn:uuid:1419d68a-1dd2-11b2-a105-000000000000");
        assert_eq!(record.name.as_deref(), Some("Front Door"));
        assert_eq!(record.hardware.as_deref(), Some("IPC-1000"));
        assert_eq!(record.location.as_deref(), Some("lobby"));
        assert_eq!(record.xaddrs.len(), 2);
        assert_eq!(record.types, vec!["dn:NetworkVideoTransmitter"]);
    }

    #[test]
    fn test_xaddr_selected_by_source_host() {
        let tree = xml::parse(probe_match_payload()).unwrap();
        let element = tree.find("ProbeMatch").unwrap();
        let record = ProbeMatch::from_element(element, "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(
            record.service.as_deref(),
            Some("http://10.0.0.5/onvif/device_service")
        );

        // Unknown source host falls back to the first advertised address
        let record = ProbeMatch::from_element(element, "172.16.0.9".parse().unwrap()).unwrap();
        assert_eq!(
            record.service.as_deref(),
            Some("http://192.168.0.5/onvif/device_service")
        );
    }

    #[test]
    fn test_missing_urn_is_rejected() {
        let tree = xml::parse(b"<ProbeMatch><XAddrs>http://x/</XAddrs></ProbeMatch>").unwrap();
        assert!(ProbeMatch::from_element(&tree, "10.0.0.5".parse().unwrap()).is_none());
    }
}
