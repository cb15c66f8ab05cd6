//! Request transport
//!
//! One trait, two backends: live HTTP POST for real devices, fixture replay
//! for deterministic tests. The backend is injected into the session, never
//! toggled through global state. Both backends share the optional capture
//! side-channel that persists request/response pairs for diagnostics.

mod fixture;
mod http;

pub use fixture::FixtureTransport;
pub use http::HttpTransport;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Sends an envelope to an endpoint, returns raw response bytes.
///
/// `service` is the capability-group name (`device`, `media`, ...), used by
/// the fixture backend for resolution and by capture for file naming.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        service: &str,
        endpoint: &str,
        method: &str,
        envelope: &str,
    ) -> Result<Vec<u8>>;
}

/// Diagnostic capture of request/response pairs. No-op unless a directory
/// is configured; capture failures are logged, never propagated.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    dir: Option<PathBuf>,
}

impl Capture {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub async fn record(&self, service: &str, method: &str, request: &str, response: &[u8]) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = self.write_pair(dir, service, method, request, response).await {
            tracing::warn!(error = %e, service = %service, method = %method, "Capture write failed");
        }
    }

    async fn write_pair(
        &self,
        dir: &Path,
        service: &str,
        method: &str,
        request: &str,
        response: &[u8],
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = format!("{}.{}", service, method);
        tokio::fs::write(dir.join(format!("{}.request.xml", stem)), request).await?;
        tokio::fs::write(dir.join(format!("{}.response.xml", stem)), response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_disabled_is_noop() {
        // Must not create anything or fail
        Capture::disabled()
            .record("device", "GetServices", "<xml/>", b"<xml/>")
            .await;
    }

    #[tokio::test]
    async fn test_capture_writes_pair() {
        let dir = std::env::temp_dir().join(format!("onvif-capture-{}", uuid::Uuid::new_v4()));
        let capture = Capture::to_dir(&dir);
        capture
            .record("device", "GetServices", "<req/>", b"<resp/>")
            .await;
        let request = tokio::fs::read_to_string(dir.join("device.GetServices.request.xml"))
            .await
            .unwrap();
        let response = tokio::fs::read_to_string(dir.join("device.GetServices.response.xml"))
            .await
            .unwrap();
        assert_eq!(request, "<req/>");
        assert_eq!(response, "<resp/>");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
