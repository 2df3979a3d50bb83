//! netfab — an in-process network-emulation fabric for deterministic
//! integration tests of network-measurement code.
//!
//! The fabric places several user-space TCP/IP stacks in one process and
//! wires them together with emulated links. Each link direction runs a
//! forwarding pipeline modeling transmission, queueing, propagation, jitter
//! and loss, optionally policed by a deep-packet-inspection engine that can
//! throttle, drop, or answer traffic with spoofed segments (RST, FIN|ACK,
//! HTTP blockpages, DNS responses). A star topology joins hosts through a
//! router enforcing TTL and injecting the spoofed datagrams.
//!
//! The user-space stack itself is an external collaborator: it enters
//! through [`topology::StackFactory`] and presents the [`nic::Nic`]
//! capability surface back to its link. The in-memory NICs in [`nic`] stand
//! in for it in tests and in the `calibrate` driver.

pub mod config;
pub mod dpi;
pub mod error;
pub mod frame;
pub mod link;
pub mod nic;
pub mod packet;
pub mod pcap;
pub mod pipeline;
pub mod router;
pub mod topology;

pub use error::{DissectError, DnsError, NicError, TlsError, TopologyError};
pub use frame::{Frame, FrameFlags};
pub use link::{Link, LinkConfig};
pub use nic::{Nic, NicWrapper, QueueNic, SinkNic, StaticReadableNic};
pub use router::{Router, RouterPort};
pub use topology::{
    CertAuthority, PppTopology, QueueStackFactory, StackConfig, StackFactory, StarTopology,
};
