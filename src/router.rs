//! The hub of a star topology.
//!
//! Each host link terminates at a [`RouterPort`], which presents the NIC
//! surface to the link. Frames written into a port go straight through the
//! router's routing function: dissect, enforce TTL, look up the egress port
//! by destination address, refresh checksums, and enqueue. Spoofed
//! datagrams attached by the DPI engine are injected in the same pass, each
//! routed by its own destination address.
//!
//! Ports hold a weak back-reference to the router; the router (via the
//! topology) owns the strong side, so dropping the router unplugs every
//! port.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::config::ROUTER_PORT_QUEUE_SLOTS;
use crate::error::NicError;
use crate::frame::{Frame, FrameFlags};
use crate::nic::{Nic, NicState};
use crate::packet;

struct RouterInner {
    table: Mutex<HashMap<Ipv4Addr, Arc<RouterPort>>>,
}

impl RouterInner {
    /// Routes one datagram. Returns `PacketDropped` for anything that does
    /// not reach an egress queue; the reason is logged, never propagated
    /// further.
    fn try_route(&self, payload: &[u8], flags: FrameFlags) -> Result<(), NicError> {
        let mut pkt = match packet::dissect(payload) {
            Ok(pkt) => pkt,
            Err(err) => {
                tracing::debug!("router: dropping undissectable packet: {err}");
                return Err(NicError::PacketDropped);
            }
        };

        if pkt.ttl() == 0 {
            tracing::debug!(dest = %pkt.dst_addr(), "router: TTL exceeded");
            return Err(NicError::PacketDropped);
        }
        pkt.decrement_ttl();

        if flags.contains(FrameFlags::SPOOF_RST) {
            // Best effort: a failed reflection never fails the original.
            match packet::reflect_tcp_with_rst(&pkt) {
                Ok(rst) => {
                    let _ = self.try_route(&rst, FrameFlags::empty());
                }
                Err(err) => tracing::debug!("router: cannot reflect RST: {err}"),
            }
        }

        let dest = match pkt.dst_addr() {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(addr) => {
                tracing::debug!(dest = %addr, "router: no route to host");
                return Err(NicError::PacketDropped);
            }
        };
        let port = self.table.lock().unwrap().get(&dest).cloned();
        let Some(port) = port else {
            tracing::debug!(dest = %dest, "router: no route to host");
            return Err(NicError::PacketDropped);
        };

        port.enqueue_outbound(Frame::new(pkt.serialize()))
            .map_err(|err| {
                tracing::debug!(port = port.name.as_str(), "router: egress refused frame: {err}");
                NicError::PacketDropped
            })
    }

    /// Full inbound pass for one frame: the original datagram plus any
    /// spoofed cargo the DPI engine attached.
    fn route_frame(&self, frame: Frame) -> Result<(), NicError> {
        let routed = self.try_route(&frame.payload, frame.flags);
        if frame.flags.contains(FrameFlags::SPOOF) {
            for spoofed in &frame.spoofed {
                if let Err(err) = self.try_route(spoofed, FrameFlags::empty()) {
                    tracing::debug!("router: spoofed datagram not routed: {err}");
                }
            }
        }
        routed
    }
}

/// The star-topology packet switch.
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}

impl Router {
    pub fn new() -> Router {
        Router {
            inner: Arc::new(RouterInner {
                table: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a port facing the host reachable at `addr`.
    pub fn new_port(&self, name: impl Into<String>, addr: IpAddr) -> Arc<RouterPort> {
        Arc::new(RouterPort {
            state: NicState::default(),
            outbound: Mutex::new(VecDeque::new()),
            router: Arc::downgrade(&self.inner),
            addr,
            name: name.into(),
        })
    }

    /// Maps `dest` to `port`. Re-adding an address replaces the mapping;
    /// uniqueness is the topology's responsibility.
    pub fn add_route(&self, dest: Ipv4Addr, port: &Arc<RouterPort>) {
        self.inner.table.lock().unwrap().insert(dest, Arc::clone(port));
        tracing::debug!(dest = %dest, port = port.name.as_str(), "route added");
    }
}

/// One router attachment point, NIC-shaped. The outbound side is a bounded
/// FIFO drained by the link pipeline; the inbound side feeds the router.
pub struct RouterPort {
    state: NicState,
    outbound: Mutex<VecDeque<Frame>>,
    router: Weak<RouterInner>,
    addr: IpAddr,
    name: String,
}

impl RouterPort {
    fn enqueue_outbound(&self, frame: Frame) -> Result<(), NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        {
            let mut outbound = self.outbound.lock().unwrap();
            if outbound.len() >= ROUTER_PORT_QUEUE_SLOTS {
                tracing::debug!(port = self.name.as_str(), "outbound queue full, dropping");
                return Err(NicError::PacketDropped);
            }
            outbound.push_back(frame);
        }
        self.state.available.notify_one();
        Ok(())
    }
}

impl Nic for RouterPort {
    fn frame_available(&self) -> &Notify {
        &self.state.available
    }

    fn stack_closed(&self) -> &Notify {
        &self.state.closed_signal
    }

    fn read_frame(&self) -> Result<Frame, NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        self.outbound
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(NicError::NoPacket)
    }

    fn write_frame(&self, frame: Frame) -> Result<(), NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        let Some(router) = self.router.upgrade() else {
            return Err(NicError::StackClosed);
        };
        router.route_frame(frame)
    }

    fn close(&self) {
        self.state.close();
    }

    fn ip_addr(&self) -> IpAddr {
        self.addr
    }

    fn name(&self) -> &str {
        &self.name
    }
}
