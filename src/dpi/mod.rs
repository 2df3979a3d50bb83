//! Deep-packet-inspection engine: flow tracking, per-flow verdict caching,
//! and ordered rule evaluation.
//!
//! The engine owns a table of flow records keyed by the symmetric flow hash.
//! The first rule that matches a packet of a flow produces a [`DpiPolicy`]
//! that is cached on the flow and applied to every later packet of the same
//! flow. Flows that stay unmatched for more than a bounded number of packets
//! are never inspected again. Idle records are replaced lazily on the next
//! lookup rather than by a janitor task.

pub mod rules;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::{FLOW_IDLE_TIMEOUT, MAX_PACKETS_PER_FLOW};
use crate::frame::FrameFlags;
use crate::packet::{self, DissectedPacket, TransportProtocol};

/// Which way a packet is traveling relative to the flow's initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiDirection {
    ClientToServer,
    ServerToClient,
}

/// The verdict a matched rule attaches to a flow.
#[derive(Debug, Clone, Default)]
pub struct DpiPolicy {
    /// Extra one-way delay added to affected frames at transmit time.
    pub delay: Duration,

    /// Extra loss probability added to the link PLR for affected frames.
    pub plr: f64,

    /// Flags ORed into affected frames.
    pub flags: FrameFlags,

    /// Ready-to-send datagrams the router must inject.
    pub spoofed: Vec<Vec<u8>>,
}

/// A single policy rule. Rules are an open set; the engine holds them as
/// trait objects and evaluates them in insertion order.
pub trait DpiRule: Send + Sync {
    /// Returns the policy when this rule matches the packet.
    fn filter(&self, direction: DpiDirection, packet: &DissectedPacket) -> Option<DpiPolicy>;
}

/// Per-flow inspection state.
struct FlowRecord {
    client_addr: IpAddr,
    client_port: u16,
    server_addr: IpAddr,
    server_port: u16,
    protocol: TransportProtocol,
    packets_seen: u64,
    policy: Option<DpiPolicy>,
    last_updated: Instant,
}

impl FlowRecord {
    /// Seeds a record from the first observed packet of a flow. The link
    /// direction of that packet orients the client/server tuple.
    fn seeded_from(pkt: &DissectedPacket, direction: DpiDirection) -> FlowRecord {
        let (client, server) = match direction {
            DpiDirection::ClientToServer => (
                (pkt.src_addr(), pkt.src_port()),
                (pkt.dst_addr(), pkt.dst_port()),
            ),
            DpiDirection::ServerToClient => (
                (pkt.dst_addr(), pkt.dst_port()),
                (pkt.src_addr(), pkt.src_port()),
            ),
        };
        FlowRecord {
            client_addr: client.0,
            client_port: client.1,
            server_addr: server.0,
            server_port: server.1,
            protocol: pkt.transport_protocol(),
            packets_seen: 0,
            policy: None,
            last_updated: Instant::now(),
        }
    }

    /// Classifies `pkt` against the recorded client tuple.
    fn direction_of(&self, pkt: &DissectedPacket) -> DpiDirection {
        if pkt.src_addr() == self.client_addr && pkt.src_port() == self.client_port {
            DpiDirection::ClientToServer
        } else {
            DpiDirection::ServerToClient
        }
    }
}

/// The DPI engine shared by the pipelines of a link.
#[derive(Default)]
pub struct DpiEngine {
    rules: Mutex<Vec<Arc<dyn DpiRule>>>,
    flows: DashMap<u64, Arc<Mutex<FlowRecord>>>,
}

impl DpiEngine {
    pub fn new() -> DpiEngine {
        DpiEngine::default()
    }

    /// Appends a rule. Rules are evaluated in insertion order; the first
    /// match wins.
    pub fn add_rule(&self, rule: Arc<dyn DpiRule>) {
        self.rules.lock().unwrap().push(rule);
    }

    /// Inspects one datagram traveling in `direction` and returns the policy
    /// applying to it, if any. Never fails: unparseable input is unmatched.
    pub fn inspect(&self, payload: &[u8], direction: DpiDirection) -> Option<DpiPolicy> {
        let pkt = match packet::dissect(payload) {
            Ok(pkt) => pkt,
            Err(err) => {
                tracing::debug!("dpi: undissectable packet ignored: {err}");
                return None;
            }
        };

        let record = self.lookup_or_seed(&pkt, direction);
        let mut record = record.lock().unwrap();
        record.packets_seen += 1;
        record.last_updated = Instant::now();

        if let Some(policy) = &record.policy {
            return Some(policy.clone());
        }
        if record.packets_seen > MAX_PACKETS_PER_FLOW {
            // Enough unmatched packets: this flow is permanently uninteresting.
            return None;
        }

        let packet_direction = record.direction_of(&pkt);
        let rules: Vec<Arc<dyn DpiRule>> = self.rules.lock().unwrap().clone();
        for rule in rules {
            if let Some(policy) = rule.filter(packet_direction, &pkt) {
                tracing::debug!(flow = %record.flow_label(), "dpi: rule matched, caching policy");
                record.policy = Some(policy.clone());
                return Some(policy);
            }
        }
        None
    }

    /// Fetches the live record for the packet's flow, replacing records that
    /// idled past the flow timeout.
    fn lookup_or_seed(
        &self,
        pkt: &DissectedPacket,
        direction: DpiDirection,
    ) -> Arc<Mutex<FlowRecord>> {
        let hash = pkt.flow_hash();
        match self.flows.entry(hash) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let stale = entry.get().lock().unwrap().last_updated.elapsed() > FLOW_IDLE_TIMEOUT;
                if stale {
                    let fresh = Arc::new(Mutex::new(FlowRecord::seeded_from(pkt, direction)));
                    *entry.get_mut() = Arc::clone(&fresh);
                    fresh
                } else {
                    Arc::clone(entry.get())
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let fresh = Arc::new(Mutex::new(FlowRecord::seeded_from(pkt, direction)));
                entry.insert(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// Number of tracked flows, stale records included.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

impl FlowRecord {
    fn flow_label(&self) -> String {
        format!(
            "{:?} {}:{} -> {}:{}",
            self.protocol, self.client_addr, self.client_port, self.server_addr, self.server_port
        )
    }
}
