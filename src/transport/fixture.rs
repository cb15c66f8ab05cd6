//! Fixture-replay transport for tests

use std::path::PathBuf;

use async_trait::async_trait;

use super::{Capture, Transport};
use crate::error::{Error, Result};

/// Replays recorded responses from
/// `<root>/<camera_type>/<service>/<Method>.Response.xml`, falling back to
/// `<Method>.Error.xml`. Drives the full stack without a live device.
pub struct FixtureTransport {
    root: PathBuf,
    camera_type: String,
    capture: Capture,
}

impl FixtureTransport {
    pub fn new(root: impl Into<PathBuf>, camera_type: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            camera_type: camera_type.into(),
            capture: Capture::disabled(),
        }
    }

    pub fn with_capture(mut self, capture: Capture) -> Self {
        self.capture = capture;
        self
    }

    fn resolve(&self, service: &str, method: &str, suffix: &str) -> PathBuf {
        self.root
            .join(&self.camera_type)
            .join(service)
            .join(format!("{}.{}.xml", method, suffix))
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn send(
        &self,
        service: &str,
        _endpoint: &str,
        method: &str,
        envelope: &str,
    ) -> Result<Vec<u8>> {
        let response_path = self.resolve(service, method, "Response");
        let error_path = self.resolve(service, method, "Error");

        let bytes = match tokio::fs::read(&response_path).await {
            Ok(bytes) => bytes,
            Err(_) => tokio::fs::read(&error_path).await.map_err(|_| {
                Error::Network(format!(
                    "No fixture for {}/{}/{}",
                    self.camera_type, service, method
                ))
            })?,
        };

        self.capture.record(service, method, envelope, &bytes).await;
        Ok(bytes)
    }
}
