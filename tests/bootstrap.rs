//! End-to-end bootstrap against recorded device fixtures.
//!
//! The fixture transport replays captured SOAP responses from
//! `tests/fixtures/<camera_type>/`, so the whole negotiation sequence runs
//! without a live device.

use std::sync::Arc;

use chrono::TimeZone;
use onvif_client::{
    Error, FixtureTransport, ServiceKind, Session, SessionConfig, Transport,
};

fn fixture_session(camera_type: &str) -> Session {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let transport: Arc<dyn Transport> =
        Arc::new(FixtureTransport::new("tests/fixtures", camera_type));
    let config = SessionConfig::new("192.168.0.10")
        .port(80)
        .credentials("admin", Some("secret".to_string()));
    Session::new(config, transport).unwrap()
}

#[tokio::test]
async fn test_bootstrap_happy_path() {
    let mut session = fixture_session("ipc-a1");
    assert!(session.get_information().is_none());

    let info = session.connect().await.unwrap();
    assert!(session.is_connected());
    assert_eq!(info.manufacturer.as_deref(), Some("Acme Vision"));
    assert_eq!(info.model.as_deref(), Some("IPC-A1"));
    assert_eq!(info.serial_number.as_deref(), Some("AV0012345678"));

    // Scope-derived facts land on the device info
    assert_eq!(info.extras["profile_streaming"], true);
    assert_eq!(info.extras["ptz"], true);
    assert_eq!(info.extras["hardware"], "IPC-A1");
    assert_eq!(info.extras["city"], "osaka");
    assert_eq!(info.extras["name"], "Front Gate");

    // Device clock in the fixture is fixed in the past
    assert!(session.time_diff_ms() < 0);

    // Local time shifted by the offset must land on the fixture's clock
    let device_time = chrono::Utc
        .with_ymd_and_hms(2024, 6, 15, 10, 30, 15)
        .unwrap()
        .timestamp_millis();
    let shifted = chrono::Utc::now().timestamp_millis() + session.time_diff_ms();
    assert!((shifted - device_time).abs() < 1000);
}

#[tokio::test]
async fn test_bootstrap_services_and_capabilities() {
    let mut session = fixture_session("ipc-a1");
    session.connect().await.unwrap();

    // Enumerated services plus capability-only groups
    for kind in [
        ServiceKind::Device,
        ServiceKind::Media,
        ServiceKind::Events,
        ServiceKind::Ptz,
        ServiceKind::Analytics,
    ] {
        assert!(session.service(kind).is_some(), "{} missing", kind.name());
    }
    assert!(session.service(ServiceKind::Imaging).is_none());

    // Reported XAddrs point at a host behind NAT; endpoints must be
    // rewritten onto the address actually used to reach the device.
    let media = session.service(ServiceKind::Media).unwrap();
    assert_eq!(media.endpoint.xaddr, "http://192.168.0.10/onvif/media_service");
    assert_eq!(media.endpoint.version.as_deref(), Some("2.60"));

    let analytics = session.service(ServiceKind::Analytics).unwrap();
    assert_eq!(analytics.flags["WSPullPointSupport"], true);
    assert_eq!(analytics.flags["RuleSupport"], true);
}

#[tokio::test]
async fn test_bootstrap_profiles_and_uris() {
    let mut session = fixture_session("ipc-a1");
    session.connect().await.unwrap();

    let profiles = session.get_profiles();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].token, "Profile1");
    assert_eq!(session.get_default_profile().unwrap().token, "Profile1");

    assert_eq!(
        profiles[0].stream_uri.as_deref(),
        Some("rtsp://192.168.0.10:554/cam/realmonitor?channel=1&subtype=0")
    );
    // Snapshot URI goes through the same address rewrite as service XAddrs
    assert_eq!(
        profiles[0].snapshot_uri.as_deref(),
        Some("http://192.168.0.10/onvifsnapshot/media_service/snapshot?channel=1")
    );

    // PTZ module learned the default profile token
    assert_eq!(
        session
            .service(ServiceKind::Ptz)
            .unwrap()
            .default_profile_token
            .as_deref(),
        Some("Profile1")
    );
}

#[tokio::test]
async fn test_bootstrap_rejected_by_fault() {
    let mut session = fixture_session("locked");
    let err = session.connect().await.unwrap_err();
    assert!(!session.is_connected());
    match err {
        Error::Fault { reason, code, .. } => {
            assert_eq!(reason, "Sender not authorized");
            assert_eq!(code, "env:Sender/ter:NotAuthorized");
        }
        other => panic!("Expected fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bootstrap_unknown_camera_type_fails() {
    let mut session = fixture_session("nonexistent");
    assert!(matches!(
        session.connect().await,
        Err(Error::Network(_))
    ));
}
