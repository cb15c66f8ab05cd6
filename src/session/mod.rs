//! Device session and bootstrap orchestration
//!
//! ## Responsibilities
//!
//! - Own the per-device `SessionContext` (clock offset, enabled capability
//!   modules, device info, media profiles)
//! - Drive the ordered negotiation sequence that must complete before the
//!   session is usable: time sync, service enumeration, capability parsing,
//!   device info, profiles, stream/snapshot URIs, scopes
//! - Rewrite device-reported endpoint addresses when the device sits behind
//!   a different network path than the one used to reach it
//!
//! Steps 1-5 are fatal; stream/snapshot/scope resolution is best-effort
//! per item. Two sessions bootstrap independently with no shared state.

pub mod services;
pub mod types;

pub use services::{lookup, ServiceKind, SERVICE_REGISTRY};
pub use types::{
    CapabilityFlags, DeviceInfo, MediaProfile, ServiceEndpoint, ServiceModule, SessionContext,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use url::Url;

use crate::auth::Credentials;
use crate::discovery::scope_suffix;
use crate::error::{Error, Result};
use crate::soap::{self, Element, EnvelopeOptions};
use crate::transport::{HttpTransport, Transport};

/// Stream protocol preference order. Every protocol is attempted for every
/// profile; a later success overwrites the stored URI.
const STREAM_PROTOCOLS: &[&str] = &["UDP", "HTTP", "RTSP"];

/// Connection parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub address: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub service_path: String,
    /// Per-session request timeout; `None` disables it
    pub timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: 80,
            credentials: None,
            service_path: "/onvif/device_service".to_string(),
            timeout: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An authenticated device session
pub struct Session {
    context: SessionContext,
    credentials: Option<Credentials>,
    transport: Arc<dyn Transport>,
    connected: bool,
}

impl Session {
    /// Validate the configuration and prepare an unconnected session.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(Error::Validation("Device address is required".to_string()));
        }
        let root_address = format!("http://{}:{}", config.address, config.port);
        Url::parse(&root_address)
            .map_err(|e| Error::Validation(format!("Invalid device address: {}", e)))?;
        let service_address = format!("{}{}", root_address, config.service_path);

        let context = SessionContext {
            root_address,
            service_address,
            ..Default::default()
        };

        Ok(Self {
            context,
            credentials: config.credentials,
            transport,
            connected: false,
        })
    }

    /// Prepare a session over the live HTTP transport, with the config's
    /// credentials and request timeout applied to every request.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.credentials.clone(), config.timeout)?;
        Self::new(config, Arc::new(transport))
    }

    /// Run the full bootstrap sequence. Resolves with the device info once
    /// all fatal steps have succeeded.
    pub async fn connect(&mut self) -> Result<DeviceInfo> {
        // Fatal steps: any failure aborts, the session stays unconnected.
        self.sync_time().await?;
        self.enumerate_services().await?;
        self.parse_capabilities().await?;
        self.fetch_device_info().await?;
        self.fetch_profiles().await?;

        self.connected = true;

        // Best-effort steps: per-item failures are logged and skipped.
        self.resolve_stream_uris().await;
        self.resolve_snapshot_uris().await;
        self.apply_scopes().await;

        tracing::info!(
            address = %self.context.root_address,
            services = self.context.services.len(),
            profiles = self.context.profiles.len(),
            "Session connected"
        );

        Ok(self.context.device_info.clone().unwrap_or_default())
    }

    /// Deep copy of the stored device info, `None` before connect
    pub fn get_information(&self) -> Option<DeviceInfo> {
        self.context.device_info.clone()
    }

    /// Profiles in device enumeration order
    pub fn get_profiles(&self) -> &[MediaProfile] {
        &self.context.profiles
    }

    /// The first profile recorded during bootstrap
    pub fn get_default_profile(&self) -> Option<&MediaProfile> {
        let token = self.context.default_profile.as_deref()?;
        self.context.profiles.iter().find(|p| p.token == token)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Rotate credentials; the only context mutation allowed after connect
    pub fn set_credentials(&mut self, username: impl Into<String>, password: Option<String>) {
        self.credentials = Some(Credentials::new(username, password));
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceModule> {
        self.context.services.get(&kind)
    }

    /// Measured device-clock offset, milliseconds
    pub fn time_diff_ms(&self) -> i64 {
        self.context.time_diff_ms
    }

    // --- request plumbing -------------------------------------------------

    async fn call(
        &self,
        kind: ServiceKind,
        method: &str,
        body: String,
        authenticated: bool,
    ) -> Result<Element> {
        let endpoint = self
            .context
            .services
            .get(&kind)
            .map(|module| module.endpoint.xaddr.clone())
            .unwrap_or_else(|| self.context.service_address.clone());

        let options = EnvelopeOptions {
            namespaces: vec![(kind.prefix().to_string(), kind.namespace().to_string())],
            subscription: None,
            clock_offset_ms: self.context.time_diff_ms,
        };
        let credentials = if authenticated {
            self.credentials.as_ref()
        } else {
            None
        };
        let envelope = soap::build_envelope(&body, credentials, &options);
        let raw = self
            .transport
            .send(kind.name(), &endpoint, method, &envelope)
            .await?;
        soap::parse_response(&raw, method)?.into_body()
    }

    fn register_service(&mut self, kind: ServiceKind, endpoint: ServiceEndpoint) {
        if self.context.services.contains_key(&kind) {
            return;
        }
        tracing::debug!(service = kind.name(), xaddr = %endpoint.xaddr, "Capability module enabled");
        self.context
            .services
            .insert(kind, ServiceModule::new(kind, endpoint));
    }

    // --- bootstrap steps --------------------------------------------------

    /// Step 1: measure the device clock offset. Must complete before any
    /// signed request is issued; the digest timestamp derives from it.
    async fn sync_time(&mut self) -> Result<()> {
        let body = "<tds:GetSystemDateAndTime/>".to_string();
        let response = self
            .call(ServiceKind::Device, "GetSystemDateAndTime", body, false)
            .await?;
        let device_time = parse_device_time(&response)?;
        let local_time = Utc::now();
        self.context.time_diff_ms =
            device_time.timestamp_millis() - local_time.timestamp_millis();
        tracing::info!(
            time_diff_ms = self.context.time_diff_ms,
            "Device clock offset measured"
        );
        Ok(())
    }

    /// Step 2: enumerate advertised services and enable recognized modules
    async fn enumerate_services(&mut self) -> Result<()> {
        let body =
            "<tds:GetServices><tds:IncludeCapability>true</tds:IncludeCapability></tds:GetServices>"
                .to_string();
        let response = self
            .call(ServiceKind::Device, "GetServices", body, true)
            .await?;

        let root = Url::parse(&self.context.root_address)
            .map_err(|e| Error::Parse(format!("Root address: {}", e)))?;

        for service in response.collect("Service") {
            let Some(namespace) = service.find_text("Namespace") else {
                continue;
            };
            let Some(xaddr) = service.find_text("XAddr") else {
                continue;
            };
            let corrected = correct_address(&xaddr, &root);
            let version = service.find("Version").map(|v| {
                format!(
                    "{}.{}",
                    v.find_text("Major").unwrap_or_default(),
                    v.find_text("Minor").unwrap_or_default()
                )
            });

            match lookup(&namespace) {
                Some(kind) => {
                    self.register_service(
                        kind,
                        ServiceEndpoint {
                            namespace,
                            xaddr: corrected,
                            version,
                        },
                    );
                }
                None => {
                    tracing::debug!(namespace = %namespace, "Unrecognized service namespace skipped");
                }
            }
        }
        Ok(())
    }

    /// Step 3: fill capability gaps left by service enumeration and pick up
    /// incidental flags
    async fn parse_capabilities(&mut self) -> Result<()> {
        let body =
            "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>"
                .to_string();
        let response = self
            .call(ServiceKind::Device, "GetCapabilities", body, true)
            .await?;

        let root = Url::parse(&self.context.root_address)
            .map_err(|e| Error::Parse(format!("Root address: {}", e)))?;

        for (_, kind) in SERVICE_REGISTRY {
            let Some(group) = response.find(kind.capability_element()) else {
                continue;
            };
            if self.context.services.contains_key(kind) {
                continue;
            }
            let Some(xaddr) = group.find_text("XAddr") else {
                continue;
            };
            self.register_service(
                *kind,
                ServiceEndpoint {
                    namespace: kind.namespace().to_string(),
                    xaddr: correct_address(&xaddr, &root),
                    version: None,
                },
            );
        }

        // Incidental flags. Pull-point support is recorded on the analytics
        // module, matching the observed wiring of the device fleet.
        let mut flags = CapabilityFlags::new();
        if let Some(events) = response.find("Events") {
            for flag in ["WSPullPointSupport", "WSSubscriptionPolicySupport"] {
                if let Some(value) = events.find_text(flag) {
                    flags.insert(
                        flag.to_string(),
                        serde_json::Value::Bool(value.eq_ignore_ascii_case("true")),
                    );
                }
            }
        }
        if let Some(analytics) = response.find("Analytics") {
            for flag in ["RuleSupport", "AnalyticsModuleSupport"] {
                if let Some(value) = analytics.find_text(flag) {
                    flags.insert(
                        flag.to_string(),
                        serde_json::Value::Bool(value.eq_ignore_ascii_case("true")),
                    );
                }
            }
        }
        if !flags.is_empty() {
            if let Some(module) = self.context.services.get_mut(&ServiceKind::Analytics) {
                module.flags.extend(flags);
            }
        }
        Ok(())
    }

    /// Step 4: store device identity verbatim
    async fn fetch_device_info(&mut self) -> Result<()> {
        let body = "<tds:GetDeviceInformation/>".to_string();
        let response = self
            .call(ServiceKind::Device, "GetDeviceInformation", body, true)
            .await?;
        self.context.device_info = Some(DeviceInfo {
            manufacturer: response.find_text("Manufacturer"),
            model: response.find_text("Model"),
            firmware_version: response.find_text("FirmwareVersion"),
            serial_number: response.find_text("SerialNumber"),
            hardware_id: response.find_text("HardwareId"),
            extras: Default::default(),
        });
        Ok(())
    }

    /// Step 5: record media profiles in device order
    async fn fetch_profiles(&mut self) -> Result<()> {
        let body = "<trt:GetProfiles/>".to_string();
        let response = self
            .call(ServiceKind::Media, "GetProfiles", body, true)
            .await?;
        // A single-profile device answers with one Profiles node; collect()
        // normalizes either shape into a list.
        let tokens: Vec<String> = response
            .collect("Profiles")
            .iter()
            .filter_map(|p| p.attribute("token").map(str::to_string))
            .collect();
        self.record_profiles(tokens);
        Ok(())
    }

    fn record_profiles(&mut self, tokens: Vec<String>) {
        for token in tokens {
            self.context.profiles.push(MediaProfile {
                token: token.clone(),
                stream_uri: None,
                snapshot_uri: None,
            });
            // First profile ever recorded becomes the default, exactly once
            if self.context.default_profile.is_none() {
                self.context.default_profile = Some(token.clone());
                if let Some(ptz) = self.context.services.get_mut(&ServiceKind::Ptz) {
                    ptz.default_profile_token = Some(token.clone());
                }
                tracing::debug!(token = %token, "Default profile selected");
            }
        }
    }

    /// Step 6: resolve stream URIs, every protocol for every profile
    async fn resolve_stream_uris(&mut self) {
        for index in 0..self.context.profiles.len() {
            let token = self.context.profiles[index].token.clone();
            for protocol in STREAM_PROTOCOLS {
                let body = format!(
                    concat!(
                        "<trt:GetStreamUri>",
                        "<trt:StreamSetup>",
                        "<tt:Stream>RTP-Unicast</tt:Stream>",
                        "<tt:Transport><tt:Protocol>{protocol}</tt:Protocol></tt:Transport>",
                        "</trt:StreamSetup>",
                        "<trt:ProfileToken>{token}</trt:ProfileToken>",
                        "</trt:GetStreamUri>",
                    ),
                    protocol = protocol,
                    token = crate::auth::xml_escape(&token),
                );
                match self.call(ServiceKind::Media, "GetStreamUri", body, true).await {
                    Ok(response) => {
                        if let Some(uri) = response.find_text("Uri") {
                            self.context.profiles[index].stream_uri = Some(uri);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(token = %token, protocol = %protocol, error = %e, "Stream URI resolution failed");
                    }
                }
            }
        }
    }

    /// Step 7: resolve snapshot URIs per profile
    async fn resolve_snapshot_uris(&mut self) {
        let root = match Url::parse(&self.context.root_address) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(error = %e, "Root address unparsable, skipping snapshot URIs");
                return;
            }
        };
        for index in 0..self.context.profiles.len() {
            let token = self.context.profiles[index].token.clone();
            let body = format!(
                "<trt:GetSnapshotUri><trt:ProfileToken>{}</trt:ProfileToken></trt:GetSnapshotUri>",
                crate::auth::xml_escape(&token)
            );
            match self.call(ServiceKind::Media, "GetSnapshotUri", body, true).await {
                Ok(response) => {
                    if let Some(uri) = response.find_text("Uri") {
                        self.context.profiles[index].snapshot_uri =
                            Some(correct_address(&uri, &root));
                    }
                }
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "Snapshot URI resolution failed");
                }
            }
        }
    }

    /// Step 8: derive flat facts from device scopes onto the device info
    async fn apply_scopes(&mut self) {
        let body = "<tds:GetScopes/>".to_string();
        let response = match self.call(ServiceKind::Device, "GetScopes", body, true).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Scope query failed");
                return;
            }
        };
        let scopes: Vec<String> = response
            .collect("ScopeItem")
            .iter()
            .map(|item| item.text().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        if let Some(info) = self.context.device_info.as_mut() {
            apply_scope_facts(info, &scopes);
        }
    }
}

/// Caller-owned collection of sessions keyed by device address. Replaces
/// any notion of a process-global session table; two registries are fully
/// independent.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: std::collections::HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session under its address, replacing any previous one.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions
            .insert(session.context.root_address.clone(), session)
    }

    pub fn get(&self, address: &str) -> Option<&Session> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Session> {
        self.sessions.get_mut(address)
    }

    pub fn remove(&mut self, address: &str) -> Option<Session> {
        self.sessions.remove(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Rewrite a device-reported endpoint when its host differs from the
/// address the caller actually used: path and query are preserved, the root
/// scheme/host/port substituted. A matching host is left unchanged.
pub fn correct_address(xaddr: &str, root: &Url) -> String {
    let Ok(reported) = Url::parse(xaddr) else {
        return xaddr.to_string();
    };
    if reported.host_str() == root.host_str() {
        return xaddr.to_string();
    }
    let mut corrected = root.clone();
    corrected.set_path(reported.path());
    corrected.set_query(reported.query());
    corrected.to_string()
}

/// Parse the UTC timestamp out of a GetSystemDateAndTime response
pub fn parse_device_time(response: &Element) -> Result<DateTime<Utc>> {
    let utc = response
        .find("UTCDateTime")
        .ok_or_else(|| Error::Parse("Response lacks UTCDateTime".to_string()))?;

    let field = |parent: &str, name: &str| -> Result<u32> {
        utc.find(parent)
            .and_then(|p| p.find_text(name))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Parse(format!("UTCDateTime missing {}/{}", parent, name)))
    };

    let year = field("Date", "Year")? as i32;
    let month = field("Date", "Month")?;
    let day = field("Date", "Day")?;
    let hour = field("Time", "Hour")?;
    let minute = field("Time", "Minute")?;
    let second = field("Time", "Second")?;

    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| Error::Parse("UTCDateTime out of range".to_string()))
}

fn apply_scope_facts(info: &mut DeviceInfo, scopes: &[String]) {
    use serde_json::Value;

    for scope in scopes {
        if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/hardware/") {
            info.extras
                .insert("hardware".to_string(), Value::String(value.to_string()));
        } else if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/Profile/") {
            info.extras
                .insert(format!("profile_{}", value.to_lowercase()), Value::Bool(true));
        } else if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/type/") {
            info.extras
                .insert(value.to_lowercase(), Value::Bool(true));
        } else if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/location/country/") {
            info.extras
                .insert("country".to_string(), Value::String(value.to_string()));
        } else if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/location/city/") {
            info.extras
                .insert("city".to_string(), Value::String(value.to_string()));
        } else if let Some(value) = scope_suffix(scope, "onvif://www.onvif.org/name/") {
            info.extras.insert(
                "name".to_string(),
                Value::String(value.replace('_', " ")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::xml;

    #[test]
    fn test_correct_address_differing_host() {
        let root = Url::parse("http://203.0.113.7:8899").unwrap();
        let corrected =
            correct_address("http://192.168.0.10:80/onvif/media_service?x=1", &root);
        assert_eq!(corrected, "http://203.0.113.7:8899/onvif/media_service?x=1");
    }

    #[test]
    fn test_correct_address_matching_host_unchanged() {
        let root = Url::parse("http://192.168.0.10:80").unwrap();
        let xaddr = "http://192.168.0.10/onvif/media_service";
        assert_eq!(correct_address(xaddr, &root), xaddr);
    }

    #[test]
    fn test_correct_address_unparsable_passthrough() {
        let root = Url::parse("http://192.168.0.10").unwrap();
        assert_eq!(correct_address("not a url", &root), "not a url");
    }

    #[test]
    fn test_parse_device_time() {
        let response = xml::parse(
            br#"<GetSystemDateAndTimeResponse><SystemDateAndTime><UTCDateTime>
                <Time><Hour>14</Hour><Minute>30</Minute><Second>7</Second></Time>
                <Date><Year>2024</Year><Month>6</Month><Day>15</Day></Date>
            </UTCDateTime></SystemDateAndTime></GetSystemDateAndTimeResponse>"#,
        )
        .unwrap();
        let ts = parse_device_time(&response).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-06-15T14:30:07+00:00");
    }

    #[test]
    fn test_parse_device_time_missing_fields() {
        let response = xml::parse(b"<GetSystemDateAndTimeResponse/>").unwrap();
        assert!(parse_device_time(&response).is_err());
    }

    #[test]
    fn test_default_profile_set_exactly_once() {
        let transport: Arc<dyn Transport> =
            Arc::new(crate::transport::FixtureTransport::new("/nonexistent", "none"));
        let mut session =
            Session::new(SessionConfig::new("192.168.0.10"), transport).unwrap();

        session.record_profiles(vec!["P1".to_string(), "P2".to_string()]);
        assert_eq!(session.context().default_profile.as_deref(), Some("P1"));

        // Re-running profile parsing must not reassign the default
        session.record_profiles(vec!["P3".to_string()]);
        assert_eq!(session.context().default_profile.as_deref(), Some("P1"));
        assert_eq!(session.get_profiles().len(), 3);
        assert_eq!(session.get_default_profile().unwrap().token, "P1");
    }

    #[test]
    fn test_open_honors_config_timeout() {
        let session = Session::open(
            SessionConfig::new("192.168.0.10")
                .credentials("admin", Some("pw".to_string()))
                .timeout(Duration::from_millis(250)),
        )
        .unwrap();
        assert!(!session.is_connected());

        assert!(matches!(
            Session::open(SessionConfig::new("")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_empty_address_rejected() {
        let transport: Arc<dyn Transport> =
            Arc::new(crate::transport::FixtureTransport::new("/nonexistent", "none"));
        assert!(matches!(
            Session::new(SessionConfig::new("  "), transport),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_registry_keyed_by_address() {
        let transport: Arc<dyn Transport> =
            Arc::new(crate::transport::FixtureTransport::new("/nonexistent", "none"));
        let mut registry = SessionRegistry::new();
        let session =
            Session::new(SessionConfig::new("192.168.0.10"), transport.clone()).unwrap();
        registry.insert(session);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("http://192.168.0.10:80").is_some());

        // Same address replaces, different address adds
        let again = Session::new(SessionConfig::new("192.168.0.10"), transport.clone()).unwrap();
        registry.insert(again);
        let other = Session::new(SessionConfig::new("192.168.0.11"), transport).unwrap();
        registry.insert(other);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("http://192.168.0.10:80").is_some());
        assert_eq!(registry.addresses().count(), 1);
    }

    #[test]
    fn test_scope_facts() {
        let mut info = DeviceInfo::default();
        apply_scope_facts(
            &mut info,
            &[
                "onvif://www.onvif.org/hardware/IPC-1000".to_string(),
                "onvif://www.onvif.org/Profile/Streaming".to_string(),
                "onvif://www.onvif.org/type/ptz".to_string(),
                "onvif://www.onvif.org/type/video_encoder".to_string(),
                "onvif://www.onvif.org/location/country/japan".to_string(),
                "onvif://www.onvif.org/location/city/osaka".to_string(),
                "onvif://www.onvif.org/name/Dome_Camera_3".to_string(),
            ],
        );
        assert_eq!(info.extras["hardware"], "IPC-1000");
        assert_eq!(info.extras["profile_streaming"], true);
        assert_eq!(info.extras["ptz"], true);
        assert_eq!(info.extras["video_encoder"], true);
        assert_eq!(info.extras["country"], "japan");
        assert_eq!(info.extras["city"], "osaka");
        assert_eq!(info.extras["name"], "Dome Camera 3");
    }
}
