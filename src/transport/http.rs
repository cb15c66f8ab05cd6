//! Live HTTP transport

use std::time::Duration;

use async_trait::async_trait;

use super::{Capture, Transport};
use crate::auth::Credentials;
use crate::error::{Error, Result};

/// HTTP POST backend for live devices.
///
/// HTTP Basic credentials are deferred: the first attempt carries no
/// Authorization header, and only an authentication challenge triggers a
/// single retry with credentials. Devices that authenticate via WS-Security
/// alone reject requests that arrive with eager Basic headers.
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    timeout: Option<Duration>,
    capture: Capture,
}

impl HttpTransport {
    pub fn new(credentials: Option<Credentials>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::Http)?;
        Ok(Self {
            client,
            credentials,
            timeout,
            capture: Capture::disabled(),
        })
    }

    pub fn with_capture(mut self, capture: Capture) -> Self {
        self.capture = capture;
        self
    }

    /// Configured per-request timeout, `None` when unlimited
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn post(
        &self,
        endpoint: &str,
        envelope: &str,
        with_basic: bool,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope.to_string());
        if with_basic {
            if let Some(creds) = &self.credentials {
                request = request.basic_auth(&creds.username, creds.password.as_deref());
            }
        }
        request.send().await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        service: &str,
        endpoint: &str,
        method: &str,
        envelope: &str,
    ) -> Result<Vec<u8>> {
        let response = self.post(endpoint, envelope, false).await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0))
            } else {
                Error::Network(format!("{}: {}", endpoint, e))
            }
        })?;

        // Retry once with Basic credentials only on an auth challenge
        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED
            && self.credentials.is_some()
        {
            tracing::debug!(endpoint = %endpoint, method = %method, "Auth challenge, retrying with Basic credentials");
            self.post(endpoint, envelope, true)
                .await
                .map_err(|e| Error::Network(format!("{}: {}", endpoint, e)))?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: endpoint.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(Error::Http)?.to_vec();
        self.capture.record(service, method, envelope, &bytes).await;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_stored() {
        let transport = HttpTransport::new(None, Some(Duration::from_millis(250))).unwrap();
        assert_eq!(transport.timeout(), Some(Duration::from_millis(250)));

        let unlimited = HttpTransport::new(None, None).unwrap();
        assert_eq!(unlimited.timeout(), None);
    }
}
