//! The `Frame` carried across every NIC and pipeline.
//!
//! A frame wraps one complete IPv4 or IPv6 datagram with pipeline-internal
//! metadata: a delivery deadline, a flag set, and optional spoofed datagrams
//! attached by the DPI engine for the router to realize. Frames are
//! value-like: a pipeline clones the frame it read and mutates only its own
//! copy; payload bytes are never modified once queued.

use tokio::time::Instant;

/// Bit set attached to a frame as it crosses the fabric.
///
/// Flags are ORed in by the DPI engine and consumed by the pipeline
/// (`DROP`) and the router (`SPOOF_RST`, `SPOOF`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// The frame must be discarded at the receive stage of the pipeline.
    pub const DROP: FrameFlags = FrameFlags(1 << 0);

    /// The router must synthesize and inject a reflected RST segment.
    pub const SPOOF_RST: FrameFlags = FrameFlags(1 << 1);

    /// The router must forward the datagrams in the frame's spoofed list.
    pub const SPOOF: FrameFlags = FrameFlags(1 << 2);

    /// The empty flag set.
    pub const fn empty() -> FrameFlags {
        FrameFlags(0)
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// ORs `other` into this set.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: FrameFlags) {
        self.0 |= rhs.0;
    }
}

/// One IP datagram in flight across the fabric.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// A complete IPv4 or IPv6 datagram.
    pub payload: Vec<u8>,

    /// Delivery deadline used by pipelines to schedule the frame. `None`
    /// outside a pipeline; cleared before the frame is written downstream so
    /// pipeline-internal timing never leaks.
    pub deadline: Option<Instant>,

    /// Flags ORed in by the DPI engine.
    pub flags: FrameFlags,

    /// Ready-to-send datagrams the router must emit in addition to (or in
    /// place of) the original. Attached by the pipeline from a DPI policy.
    pub spoofed: Vec<Vec<u8>>,
}

impl Frame {
    /// Wraps `payload` in a frame with no metadata attached.
    pub fn new(payload: Vec<u8>) -> Frame {
        Frame {
            payload,
            deadline: None,
            flags: FrameFlags::empty(),
            spoofed: Vec::new(),
        }
    }

    /// Length of the carried datagram in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
