//! Session data model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::services::ServiceKind;

/// One capability-group endpoint advertised by the device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub namespace: String,
    /// Endpoint URL, already address-proxy corrected
    pub xaddr: String,
    pub version: Option<String>,
}

/// Free-form boolean/string facts picked up while parsing capabilities
pub type CapabilityFlags = BTreeMap<String, serde_json::Value>;

/// A capability module enabled for this session
#[derive(Debug, Clone)]
pub struct ServiceModule {
    pub kind: ServiceKind,
    pub endpoint: ServiceEndpoint,
    pub flags: CapabilityFlags,
    /// Default media profile token, told to the PTZ module when the first
    /// profile is recorded
    pub default_profile_token: Option<String>,
}

impl ServiceModule {
    pub fn new(kind: ServiceKind, endpoint: ServiceEndpoint) -> Self {
        Self {
            kind,
            endpoint,
            flags: CapabilityFlags::new(),
            default_profile_token: None,
        }
    }
}

/// Device identity returned by GetDeviceInformation, stored verbatim,
/// extended with scope-derived facts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_id: Option<String>,
    /// Flat facts derived from device scopes (conformance profiles, PTZ
    /// capability, location, display name)
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

/// One media profile; order of discovery is part of the public contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProfile {
    pub token: String,
    pub stream_uri: Option<String>,
    pub snapshot_uri: Option<String>,
}

/// Per-session state, populated by the bootstrap sequence and read-only
/// afterward except for credential rotation
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Scheme/host/port actually used to reach the device; the proxy
    /// correction target for reported XAddrs
    pub root_address: String,
    /// Device service endpoint URL
    pub service_address: String,
    /// Device clock minus local clock, milliseconds. Written once by time
    /// sync, read by every signed request afterward.
    pub time_diff_ms: i64,
    pub services: BTreeMap<ServiceKind, ServiceModule>,
    pub device_info: Option<DeviceInfo>,
    pub profiles: Vec<MediaProfile>,
    /// Token of the first profile ever recorded; set exactly once
    pub default_profile: Option<String>,
}
