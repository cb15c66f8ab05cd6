//! WS-Eventing pull-point support
//!
//! A subscription handed back by the device routes follow-up pulls to a
//! dedicated endpoint, carried in the envelope `To` header. The pull loop is
//! an explicit cancellable task: messages and errors arrive on a channel,
//! `stop()` cancels the timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::Credentials;
use crate::error::Result;
use crate::soap::{self, Element, EnvelopeOptions};
use crate::transport::Transport;

/// ONVIF events namespace
pub const EVENTS_NS: &str = "http://www.onvif.org/ver10/events/wsdl";

/// Opaque addressing token returned by subscription setup
#[derive(Debug, Clone)]
pub struct SubscriptionId {
    /// Endpoint the pull requests must be routed to
    pub address: String,
    /// Raw reference-parameter fragment echoed back in every pull header
    pub reference_parameters: Option<String>,
}

impl SubscriptionId {
    /// Extract the subscription token from a
    /// `CreatePullPointSubscriptionResponse` body.
    pub fn from_response(body: &Element) -> Result<Self> {
        let address = body
            .find("SubscriptionReference")
            .and_then(|r| r.find_text("Address"))
            .ok_or_else(|| {
                crate::error::Error::Parse(
                    "Subscription response lacks SubscriptionReference/Address".to_string(),
                )
            })?;
        // Reference parameters are opaque; keep the subtree's text as-is when
        // a device sends a bare token, callers may also set raw XML directly.
        let reference_parameters = body
            .find("ReferenceParameters")
            .map(|p| p.text().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self {
            address,
            reference_parameters,
        })
    }
}

/// One pull iteration outcome
#[derive(Debug)]
pub enum PullOutcome {
    /// `PullMessagesResponse` subtree
    Messages(Element),
    /// Failed pull; the loop keeps running
    Error(crate::error::Error),
}

/// Repeating PullMessages task against one subscription
pub struct PullLoop {
    transport: Arc<dyn Transport>,
    subscription: SubscriptionId,
    credentials: Option<Credentials>,
    clock_offset_ms: i64,
    handle: Option<JoinHandle<()>>,
}

impl PullLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        subscription: SubscriptionId,
        credentials: Option<Credentials>,
        clock_offset_ms: i64,
    ) -> Self {
        Self {
            transport,
            subscription,
            credentials,
            clock_offset_ms,
            handle: None,
        }
    }

    /// Spawn the polling task. Each tick issues one `PullMessages` with the
    /// given per-pull timeout and message limit; outcomes arrive on the
    /// returned channel until `stop()` or receiver drop.
    pub fn start(&mut self, interval: Duration, timeout: Duration, limit: u32) -> mpsc::Receiver<PullOutcome> {
        // Restarting replaces the previous task
        self.stop();

        let (tx, rx) = mpsc::channel(16);
        let transport = self.transport.clone();
        let subscription = self.subscription.clone();
        let credentials = self.credentials.clone();
        let clock_offset_ms = self.clock_offset_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let outcome = pull_once(
                    transport.as_ref(),
                    &subscription,
                    credentials.as_ref(),
                    clock_offset_ms,
                    timeout,
                    limit,
                )
                .await;
                let outcome = match outcome {
                    Ok(messages) => PullOutcome::Messages(messages),
                    Err(e) => {
                        tracing::warn!(error = %e, "PullMessages failed");
                        PullOutcome::Error(e)
                    }
                };
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
        });
        self.handle = Some(handle);
        rx
    }

    /// Cancel the polling task. Safe to call twice.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PullLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pull_once(
    transport: &dyn Transport,
    subscription: &SubscriptionId,
    credentials: Option<&Credentials>,
    clock_offset_ms: i64,
    timeout: Duration,
    limit: u32,
) -> Result<Element> {
    let body = format!(
        "<tev:PullMessages><tev:Timeout>PT{}S</tev:Timeout><tev:MessageLimit>{}</tev:MessageLimit></tev:PullMessages>",
        timeout.as_secs().max(1),
        limit
    );
    let options = EnvelopeOptions {
        namespaces: vec![("tev".to_string(), EVENTS_NS.to_string())],
        subscription: Some(subscription.clone()),
        clock_offset_ms,
    };
    let envelope = soap::build_envelope(&body, credentials, &options);
    let raw = transport
        .send("events", &subscription.address, "PullMessages", &envelope)
        .await?;
    soap::parse_response(&raw, "PullMessages")?.into_body()
}
