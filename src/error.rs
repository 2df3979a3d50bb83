//! Unified error types for the emulation fabric.
//!
//! Each enum maps to one failure domain from the error-handling design:
//! packet parsing, TLS/DNS dissection, NIC flow control, and topology
//! construction. Parse and flow-control errors are absorbed (logged, packet
//! dropped) by the component that observes them; only topology errors
//! propagate to the caller.

use std::net::IpAddr;

/// Errors raised while dissecting a raw IP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DissectError {
    /// The buffer ends before the headers it declares.
    #[error("packet too short")]
    ShortPacket,

    /// The first nibble is neither 4 nor 6.
    #[error("unsupported network-layer protocol")]
    UnsupportedNetwork,

    /// The IP protocol field is neither TCP nor UDP.
    #[error("unsupported transport-layer protocol")]
    UnsupportedTransport,
}

/// Errors raised while extracting the SNI from a TLS ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    /// The payload is not a complete TLS handshake record.
    #[error("not a TLS handshake record")]
    NotHandshake,

    /// The handshake message is not a ClientHello.
    #[error("not a ClientHello")]
    NotClientHello,

    /// A length field points outside the buffer.
    #[error("malformed ClientHello")]
    Malformed,

    /// The extensions do not carry a server_name entry.
    #[error("no server_name extension")]
    NoServerName,
}

/// Errors raised while parsing DNS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DnsError {
    /// The buffer ends before the message it declares.
    #[error("truncated DNS message")]
    Truncated,

    /// A request had the response bit set, or vice versa.
    #[error("unexpected QR bit")]
    UnexpectedQr,

    /// The message does not carry exactly one INET question.
    #[error("unsupported DNS question")]
    UnsupportedQuestion,

    /// A label or pointer is malformed.
    #[error("malformed DNS name")]
    MalformedName,
}

/// Flow-control results of NIC reads and writes. All transient except
/// `StackClosed`, which terminates the forwarding task that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NicError {
    /// No frame is ready right now; wait on the frame-available signal.
    #[error("no packet ready")]
    NoPacket,

    /// The NIC has been closed and will never carry another frame.
    #[error("stack closed")]
    StackClosed,

    /// The frame was discarded because a bounded queue is saturated.
    #[error("packet dropped")]
    PacketDropped,
}

/// Errors surfaced synchronously from topology construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// The address is already assigned to another host.
    #[error("duplicate address: {0}")]
    DuplicateAddr(IpAddr),

    /// The given string does not parse as an IP address.
    #[error("not an IP address: {0}")]
    NotIpAddress(String),
}
