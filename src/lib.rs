//! ONVIF device-control client
//!
//! Talks to ONVIF-conformant network video devices over SOAP: finds them
//! with WS-Discovery multicast probes, authenticates with WS-Security
//! UsernameToken digests, and bootstraps a per-device session that exposes
//! capability modules, media profiles, and stream/snapshot endpoints.
//!
//! ## Layout
//!
//! - [`discovery`]: multicast probe engine, runs without a session
//! - [`session`]: per-device bootstrap and state
//! - [`soap`]: envelope construction and response parsing
//! - [`auth`]: WS-Security digest header
//! - [`transport`]: injected request backend, live HTTP or fixture replay
//! - [`events`]: pull-point subscription polling

pub mod auth;
pub mod discovery;
pub mod error;
pub mod events;
pub mod session;
pub mod soap;
pub mod transport;

pub use auth::Credentials;
pub use discovery::{Discovery, DiscoveryConfig, ProbeMatch, ProbeState};
pub use error::{Error, Result};
pub use events::{PullLoop, PullOutcome, SubscriptionId};
pub use session::{
    DeviceInfo, MediaProfile, ServiceKind, Session, SessionConfig, SessionRegistry,
};
pub use transport::{Capture, FixtureTransport, HttpTransport, Transport};
