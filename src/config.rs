//! Centralized model constants for the emulation fabric.
//!
//! All tunable capacities, intervals, and protocol constants are collected
//! here so they can be found and adjusted in a single place rather than
//! scattered across modules.

use std::time::Duration;

/// Emulated channel capacity in bits per microsecond (≈100 Mbit/s).
pub const BITS_PER_MICROSECOND: u64 = 100;

/// Duration of one transmission slot. One 1500-byte frame fits a slot at
/// line rate: 1500 × 8 / 100 = 120 µs.
pub const SLOT_DURATION: Duration = Duration::from_micros(120);

/// Cap on bytes queued for transmission in one link direction. Frames
/// arriving while the queue is over the cap are dropped at ingress.
pub const EGRESS_QUEUE_CAP_BYTES: usize = 65_536;

/// Upper bound (exclusive) of the uniform per-frame jitter in microseconds,
/// applied at transmit time.
pub const MAX_JITTER_MICROS: u64 = 1_000;

/// Flow records idle longer than this are replaced on the next lookup.
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of packets of a flow inspected before rule evaluation is
/// short-circuited to a permanent no-match.
pub const MAX_PACKETS_PER_FLOW: u64 = 10;

/// Bound on each router port's outbound frame queue, in frames.
pub const ROUTER_PORT_QUEUE_SLOTS: usize = 1_024;

/// MTU every emulated host stack is configured with.
pub const DEFAULT_MTU: usize = 1_500;

/// TTL stamped on reflected (spoofed) IPv4 segments.
pub const REFLECTED_TTL: u8 = 60;

/// TTL of synthesized DNS answer records, in seconds.
pub const DNS_ANSWER_TTL: u32 = 3_600;

/// Snap length written to the PCAP file header.
pub const PCAP_SNAPLEN: u32 = 262_144;

/// Per-record payload snap: each PCAP record stores min(256, actual) bytes.
pub const PCAP_RECORD_SNAP: usize = 256;
