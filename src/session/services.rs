//! Static capability-group registry
//!
//! Maps each recognized ONVIF service namespace to its module kind. The
//! bootstrap enables only the modules whose namespaces the device actually
//! advertises; nothing is resolved through runtime string reflection.

/// Recognized capability groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    Device,
    Media,
    Events,
    Ptz,
    Imaging,
    DeviceIo,
    Analytics,
}

/// Namespace constants for the recognized groups
pub const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const EVENTS_NS: &str = "http://www.onvif.org/ver10/events/wsdl";
pub const PTZ_NS: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const IMAGING_NS: &str = "http://www.onvif.org/ver20/imaging/wsdl";
pub const DEVICE_IO_NS: &str = "http://www.onvif.org/ver10/deviceIO/wsdl";
pub const ANALYTICS_NS: &str = "http://www.onvif.org/ver20/analytics/wsdl";

/// Namespace -> module kind table
pub const SERVICE_REGISTRY: &[(&str, ServiceKind)] = &[
    (DEVICE_NS, ServiceKind::Device),
    (MEDIA_NS, ServiceKind::Media),
    (EVENTS_NS, ServiceKind::Events),
    (PTZ_NS, ServiceKind::Ptz),
    (IMAGING_NS, ServiceKind::Imaging),
    (DEVICE_IO_NS, ServiceKind::DeviceIo),
    (ANALYTICS_NS, ServiceKind::Analytics),
];

/// Resolve a namespace to a module kind, if recognized
pub fn lookup(namespace: &str) -> Option<ServiceKind> {
    SERVICE_REGISTRY
        .iter()
        .find(|(ns, _)| *ns == namespace)
        .map(|(_, kind)| *kind)
}

impl ServiceKind {
    /// Capability-group name used for fixture resolution and capture naming
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Device => "device",
            ServiceKind::Media => "media",
            ServiceKind::Events => "events",
            ServiceKind::Ptz => "ptz",
            ServiceKind::Imaging => "imaging",
            ServiceKind::DeviceIo => "deviceio",
            ServiceKind::Analytics => "analytics",
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            ServiceKind::Device => DEVICE_NS,
            ServiceKind::Media => MEDIA_NS,
            ServiceKind::Events => EVENTS_NS,
            ServiceKind::Ptz => PTZ_NS,
            ServiceKind::Imaging => IMAGING_NS,
            ServiceKind::DeviceIo => DEVICE_IO_NS,
            ServiceKind::Analytics => ANALYTICS_NS,
        }
    }

    /// Namespace prefix declared when building envelopes for this group
    pub fn prefix(&self) -> &'static str {
        match self {
            ServiceKind::Device => "tds",
            ServiceKind::Media => "trt",
            ServiceKind::Events => "tev",
            ServiceKind::Ptz => "tptz",
            ServiceKind::Imaging => "timg",
            ServiceKind::DeviceIo => "tmd",
            ServiceKind::Analytics => "tan",
        }
    }

    /// Element name carrying this group in a GetCapabilities response
    pub fn capability_element(&self) -> &'static str {
        match self {
            ServiceKind::Device => "Device",
            ServiceKind::Media => "Media",
            ServiceKind::Events => "Events",
            ServiceKind::Ptz => "PTZ",
            ServiceKind::Imaging => "Imaging",
            ServiceKind::DeviceIo => "DeviceIO",
            ServiceKind::Analytics => "Analytics",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_recognized() {
        assert_eq!(lookup(MEDIA_NS), Some(ServiceKind::Media));
        assert_eq!(lookup(PTZ_NS), Some(ServiceKind::Ptz));
        assert_eq!(lookup("http://example.com/unknown/wsdl"), None);
    }

    #[test]
    fn test_registry_covers_all_kinds() {
        for (ns, kind) in SERVICE_REGISTRY {
            assert_eq!(kind.namespace(), *ns);
        }
    }
}
