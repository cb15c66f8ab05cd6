//! WS-Discovery probe engine
//!
//! ## Responsibilities
//!
//! - Multicast Probe envelopes for the three ONVIF device kinds, paced on a
//!   fixed interval to avoid multicast storms on constrained networks
//! - Collect ProbeMatch responses for a bounded window, deduplicated by urn
//! - One UDP socket per probe run, always released before results are
//!   handed back
//!
//! Runs independently of any device session.

mod types;

pub use types::{scope_suffix, ProbeMatch};

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::soap::xml;

/// WS-Discovery multicast group
pub const MULTICAST_ADDR: &str = "239.255.255.250:3702";

/// Probe retransmissions per device kind
pub const RETRY_MAX: u32 = 3;

/// Target device kinds probed per retransmission round
const PROBE_TYPES: &[&str] = &[
    "tds:Device",
    "dn:NetworkVideoTransmitter",
    "dn:NetworkVideoDisplay",
];

/// Probe engine settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Full retransmission rounds of the 3-message probe set
    pub retry_max: u32,
    /// Pacing between individual sends
    pub send_interval: Duration,
    /// Collection window bounding the whole run
    pub window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            retry_max: RETRY_MAX,
            send_interval: Duration::from_millis(150),
            window: Duration::from_millis(3000),
        }
    }
}

/// Engine state, `Idle -> Probing -> Collecting -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    /// Send queue still draining
    Probing,
    /// All probes sent, waiting out the collection window
    Collecting,
}

/// WS-Discovery engine. One probe run at a time; callers serialize via
/// stop-then-start.
pub struct Discovery {
    config: DiscoveryConfig,
    state: Mutex<ProbeState>,
    stop_tx: watch::Sender<u32>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        let (stop_tx, _) = watch::channel(0);
        Self {
            config,
            state: Mutex::new(ProbeState::Idle),
            stop_tx,
        }
    }

    pub fn state(&self) -> ProbeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one probe/collect cycle and return the devices found, in
    /// first-response order. The socket is closed and the engine returned to
    /// `Idle` on every exit path, including early stop.
    pub async fn start_probe(&self) -> Result<Vec<ProbeMatch>> {
        // Subscribe before the state flip: once a caller observes the engine
        // as non-idle, its stop_probe is guaranteed to land on this run.
        let mut stop_rx = self.stop_tx.subscribe();
        let _ = stop_rx.borrow_and_update();

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ProbeState::Idle {
                return Err(Error::Validation(
                    "Probe already in flight; call stop_probe first".to_string(),
                ));
            }
            *state = ProbeState::Probing;
        }

        let result = self.run_probe(stop_rx).await;
        self.set_state(ProbeState::Idle);
        result
    }

    /// Cancel an in-flight probe run. Idempotent; safe to call from a
    /// timeout handler or an external caller, and a no-op when idle.
    pub fn stop_probe(&self) {
        self.stop_tx.send_modify(|generation| *generation += 1);
    }

    fn set_state(&self, state: ProbeState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn run_probe(&self, mut stop_rx: watch::Receiver<u32>) -> Result<Vec<ProbeMatch>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Network(format!("Discovery socket bind: {}", e)))?;
        // Probes stay on the local segment; responses come back unicast
        if let Err(e) = socket.set_multicast_ttl_v4(1) {
            tracing::warn!(error = %e, "Multicast TTL not set");
        }
        let target: SocketAddr = MULTICAST_ADDR
            .parse()
            .map_err(|e| Error::Validation(format!("Multicast address: {}", e)))?;

        // Flat send queue: the 3-type probe set repeated retry_max times,
        // every envelope with a fresh message id.
        let mut queue: Vec<String> = Vec::new();
        for _ in 0..self.config.retry_max {
            for probe_type in PROBE_TYPES {
                queue.push(probe_envelope(probe_type));
            }
        }
        queue.reverse(); // drain via pop

        tracing::info!(
            probes = queue.len(),
            window_ms = self.config.window.as_millis() as u64,
            "Starting discovery probe"
        );

        let mut ticker = tokio::time::interval(self.config.send_interval);
        let deadline = tokio::time::sleep(self.config.window);
        tokio::pin!(deadline);

        let mut seen: HashSet<String> = HashSet::new();
        let mut matches: Vec<ProbeMatch> = Vec::new();
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!(devices = matches.len(), "Collection window expired");
                    break;
                }
                changed = stop_rx.changed() => {
                    if changed.is_ok() {
                        tracing::debug!(devices = matches.len(), "Probe stopped early");
                    }
                    break;
                }
                _ = ticker.tick(), if !queue.is_empty() => {
                    let envelope = queue.pop().unwrap_or_default();
                    if let Err(e) = socket.send_to(envelope.as_bytes(), target).await {
                        tracing::warn!(error = %e, "Probe send failed");
                    }
                    if queue.is_empty() {
                        self.set_state(ProbeState::Collecting);
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, source)) => {
                            self.handle_datagram(&buf[..len], source, &mut seen, &mut matches);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Discovery receive failed");
                        }
                    }
                }
            }
        }

        // Socket dropped here; pending timers die with the select loop.
        tracing::info!(devices = matches.len(), "Discovery complete");
        Ok(matches)
    }

    fn handle_datagram(
        &self,
        data: &[u8],
        source: SocketAddr,
        seen: &mut HashSet<String>,
        matches: &mut Vec<ProbeMatch>,
    ) {
        let tree = match xml::parse(data) {
            Ok(tree) => tree,
            Err(e) => {
                // Malformed datagram: discard, keep collecting
                tracing::debug!(source = %source, error = %e, "Discarding malformed datagram");
                return;
            }
        };

        for element in tree.collect("ProbeMatch") {
            let Some(record) = ProbeMatch::from_element(element, source.ip()) else {
                continue;
            };
            // First match for a urn wins; a device answering more than one
            // probe type must not overwrite its earlier record.
            if !seen.insert(record.urn.clone()) {
                tracing::debug!(urn = %record.urn, "Duplicate probe match dropped");
                continue;
            }
            tracing::info!(urn = %record.urn, name = ?record.name, source = %source, "Device discovered");
            matches.push(record);
        }
    }
}

fn probe_envelope(probe_type: &str) -> String {
    let message_id = uuid::Uuid::new_v4();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope""#,
            r#" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing""#,
            r#" xmlns:wsd="http://schemas.xmlsoap.org/ws/2005/04/discovery""#,
            r#" xmlns:tds="http://www.onvif.org/ver10/device/wsdl""#,
            r#" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">"#,
            "<s:Header>",
            "<wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>",
            "<wsa:MessageID>uuid:{message_id}</wsa:MessageID>",
            "<wsa:ReplyTo><wsa:Address>http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</wsa:Address></wsa:ReplyTo>",
            "<wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>",
            "</s:Header>",
            "<s:Body><wsd:Probe><wsd:Types>{probe_type}</wsd:Types></wsd:Probe></s:Body>",
            "</s:Envelope>",
        ),
        message_id = message_id,
        probe_type = probe_type,
    )
}
