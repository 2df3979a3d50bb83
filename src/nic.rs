//! The NIC capability surface and the static NICs used to exercise it.
//!
//! Every endpoint of the fabric — user-space host stacks, router ports, and
//! pass-through decorators — presents the same [`Nic`] trait: a
//! frame-available signal, a stack-closed signal, a non-blocking read, a
//! write, close, and identity accessors. Forwarding loops read until
//! `NoPacket`, then suspend on the signals; `StackClosed` is terminal.
//!
//! The signals are `tokio::sync::Notify` handles driven with `notify_one`,
//! which stores a permit when nobody is waiting. Each NIC side has exactly
//! one consumer (its forwarding task), so a signal raised between polls is
//! never lost.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::config::ROUTER_PORT_QUEUE_SLOTS;
use crate::error::NicError;
use crate::frame::Frame;

/// Polymorphic capability set of a network interface.
pub trait Nic: Send + Sync {
    /// Signal raised whenever at least one frame becomes readable.
    fn frame_available(&self) -> &Notify;

    /// Signal raised when the stack behind this NIC closes. Terminal.
    fn stack_closed(&self) -> &Notify;

    /// Non-blocking read of the next frame.
    fn read_frame(&self) -> Result<Frame, NicError>;

    /// Delivers a frame into this NIC.
    fn write_frame(&self, frame: Frame) -> Result<(), NicError>;

    /// Closes the NIC and wakes both signals. Idempotent.
    fn close(&self);

    /// IP address assigned to this interface.
    fn ip_addr(&self) -> IpAddr;

    /// Interface name, for logs and PCAP files.
    fn name(&self) -> &str;
}

/// A NIC wrapper capability: PCAP dumpers and similar pass-through
/// decorators implement this to interpose on a link's endpoint.
pub type NicWrapper = Box<dyn FnOnce(std::sync::Arc<dyn Nic>) -> std::sync::Arc<dyn Nic> + Send>;

/// Close/signal bookkeeping shared by the concrete NICs in this crate.
#[derive(Debug, Default)]
pub(crate) struct NicState {
    pub(crate) available: Notify,
    pub(crate) closed_signal: Notify,
    closed: AtomicBool,
}

impl NicState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.closed_signal.notify_one();
            // Wake a reader parked on frame-available so it observes the
            // closed state on its next read.
            self.available.notify_one();
        }
    }
}

/// A NIC preloaded with frames to read. Reads drain the list, then yield
/// `NoPacket` until the NIC is closed. Writes are refused: this endpoint
/// models a read-only traffic source.
pub struct StaticReadableNic {
    state: NicState,
    frames: Mutex<VecDeque<Frame>>,
    addr: IpAddr,
    name: String,
}

impl StaticReadableNic {
    pub fn new(name: impl Into<String>, addr: IpAddr, frames: Vec<Frame>) -> StaticReadableNic {
        let nic = StaticReadableNic {
            state: NicState::default(),
            frames: Mutex::new(frames.into()),
            addr,
            name: name.into(),
        };
        nic.state.available.notify_one();
        nic
    }
}

impl Nic for StaticReadableNic {
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
        self.frames
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(NicError::NoPacket)
    }

    fn write_frame(&self, _frame: Frame) -> Result<(), NicError> {
        Err(NicError::StackClosed)
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

/// A NIC that swallows and records every frame written to it. Reads always
/// yield `NoPacket`; tests inspect the collected frames.
pub struct SinkNic {
    state: NicState,
    written: Mutex<Vec<Frame>>,
    addr: IpAddr,
    name: String,
}

impl SinkNic {
    pub fn new(name: impl Into<String>, addr: IpAddr) -> SinkNic {
        SinkNic {
            state: NicState::default(),
            written: Mutex::new(Vec::new()),
            addr,
            name: name.into(),
        }
    }

    /// Frames delivered so far, in arrival order.
    pub fn collected(&self) -> Vec<Frame> {
        self.written.lock().unwrap().clone()
    }

    pub fn collected_count(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

impl Nic for SinkNic {
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
        Err(NicError::NoPacket)
    }

    fn write_frame(&self, frame: Frame) -> Result<(), NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        self.written.lock().unwrap().push(frame);
        self.state.available.notify_one();
        Ok(())
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

/// A full-duplex in-memory endpoint standing in for a user-space host
/// stack: the fabric reads what the host sends and delivers what the host
/// receives.
///
/// The [`Nic`] impl is the fabric-facing side. The host-facing side is
/// [`QueueNic::send`] / [`QueueNic::recv`] plus the `delivered` signal.
#[derive(Debug)]
pub struct QueueNic {
    state: NicState,
    /// Frames the host has sent, awaiting pickup by the fabric.
    egress: Mutex<VecDeque<Frame>>,
    /// Frames the fabric has delivered, awaiting pickup by the host.
    ingress: Mutex<VecDeque<Frame>>,
    delivered: Notify,
    addr: IpAddr,
    name: String,
}

impl QueueNic {
    pub fn new(name: impl Into<String>, addr: IpAddr) -> QueueNic {
        QueueNic {
            state: NicState::default(),
            egress: Mutex::new(VecDeque::new()),
            ingress: Mutex::new(VecDeque::new()),
            delivered: Notify::new(),
            addr,
            name: name.into(),
        }
    }

    /// Host side: queue one datagram for transmission into the fabric.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        {
            let mut egress = self.egress.lock().unwrap();
            if egress.len() >= ROUTER_PORT_QUEUE_SLOTS {
                return Err(NicError::PacketDropped);
            }
            egress.push_back(Frame::new(payload));
        }
        self.state.available.notify_one();
        Ok(())
    }

    /// Host side: non-blocking read of the next delivered frame.
    pub fn recv(&self) -> Result<Frame, NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        self.ingress
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(NicError::NoPacket)
    }

    /// Host side: signal raised when a frame has been delivered.
    pub fn delivered(&self) -> &Notify {
        &self.delivered
    }

    /// Host side: await and return the next delivered frame.
    pub async fn recv_wait(&self) -> Result<Frame, NicError> {
        loop {
            match self.recv() {
                Ok(frame) => return Ok(frame),
                Err(NicError::NoPacket) => {
                    tokio::select! {
                        _ = self.delivered.notified() => {}
                        _ = self.state.closed_signal.notified() => {
                            // Re-raise for any other waiter and report closed.
                            self.state.closed_signal.notify_one();
                            return Err(NicError::StackClosed);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Nic for QueueNic {
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
        self.egress
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(NicError::NoPacket)
    }

    fn write_frame(&self, frame: Frame) -> Result<(), NicError> {
        if self.state.is_closed() {
            return Err(NicError::StackClosed);
        }
        {
            let mut ingress = self.ingress.lock().unwrap();
            if ingress.len() >= ROUTER_PORT_QUEUE_SLOTS {
                return Err(NicError::PacketDropped);
            }
            ingress.push_back(frame);
        }
        self.delivered.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.state.close();
        self.delivered.notify_one();
    }

    fn ip_addr(&self) -> IpAddr {
        self.addr
    }

    fn name(&self) -> &str {
        &self.name
    }
}
