//! Packet dissection and serialization.
//!
//! A [`DissectedPacket`] is a parsed view of one IPv4 or IPv6 datagram
//! carrying TCP or UDP. Serializing a dissected packet recomputes every
//! length and checksum, so `dissect → serialize → dissect` is stable. The
//! reflected-segment builders synthesize the spoofed responses (RST,
//! FIN|ACK, payload injection) used by the DPI rules and the router.

pub mod checksum;
pub mod dns;
pub mod tls;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::REFLECTED_TTL;
use crate::error::{DissectError, TlsError};

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// Transport protocols the fabric understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    /// The IP protocol number.
    pub fn number(self) -> u8 {
        match self {
            TransportProtocol::Tcp => PROTO_TCP,
            TransportProtocol::Udp => PROTO_UDP,
        }
    }
}

/// TCP flag bits as they appear in the header's 13th byte.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// Parsed IPv4 header. Options are carried verbatim and re-emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub identification: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub options: Vec<u8>,
}

/// Parsed IPv6 fixed header. Extension headers are not walked; the next
/// header must be TCP or UDP directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

/// Network-layer variant of a dissected packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

/// Parsed TCP header. The checksum is not stored; serialization always
/// recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub urgent: u16,
    pub options: Vec<u8>,
}

impl TcpHeader {
    pub fn fin(&self) -> bool {
        self.flags & tcp_flags::FIN != 0
    }

    pub fn rst(&self) -> bool {
        self.flags & tcp_flags::RST != 0
    }

    pub fn ack_flag(&self) -> bool {
        self.flags & tcp_flags::ACK != 0
    }

    pub fn syn(&self) -> bool {
        self.flags & tcp_flags::SYN != 0
    }
}

/// Parsed UDP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Transport-layer variant of a dissected packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHeader {
    Tcp(TcpHeader),
    Udp(UdpHeader),
}

/// A parsed view of one IP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DissectedPacket {
    pub network: NetworkHeader,
    pub transport: TransportHeader,
    /// Transport-layer payload (TCP stream bytes or UDP datagram body).
    pub payload: Vec<u8>,
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parses one IPv4 or IPv6 datagram carrying TCP or UDP.
pub fn dissect(data: &[u8]) -> Result<DissectedPacket, DissectError> {
    if data.is_empty() {
        return Err(DissectError::ShortPacket);
    }
    match data[0] >> 4 {
        4 => dissect_v4(data),
        6 => dissect_v6(data),
        _ => Err(DissectError::UnsupportedNetwork),
    }
}

fn dissect_v4(data: &[u8]) -> Result<DissectedPacket, DissectError> {
    if data.len() < 20 {
        return Err(DissectError::ShortPacket);
    }
    let ihl = usize::from(data[0] & 0x0f) * 4;
    let total_len = usize::from(be16(data, 2));
    if ihl < 20 || total_len < ihl || data.len() < total_len {
        return Err(DissectError::ShortPacket);
    }
    // Trailing link-layer padding past the declared total length is ignored.
    let datagram = &data[..total_len];

    let header = Ipv4Header {
        tos: datagram[1],
        identification: be16(datagram, 4),
        flags_fragment: be16(datagram, 6),
        ttl: datagram[8],
        protocol: datagram[9],
        src: Ipv4Addr::from(be32(datagram, 12)),
        dst: Ipv4Addr::from(be32(datagram, 16)),
        options: datagram[20..ihl].to_vec(),
    };
    let (transport, payload) = dissect_transport(header.protocol, &datagram[ihl..])?;
    Ok(DissectedPacket {
        network: NetworkHeader::V4(header),
        transport,
        payload,
    })
}

fn dissect_v6(data: &[u8]) -> Result<DissectedPacket, DissectError> {
    if data.len() < 40 {
        return Err(DissectError::ShortPacket);
    }
    let payload_len = usize::from(be16(data, 4));
    if data.len() < 40 + payload_len {
        return Err(DissectError::ShortPacket);
    }
    let mut src = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&data[24..40]);

    let header = Ipv6Header {
        traffic_class: (data[0] << 4) | (data[1] >> 4),
        flow_label: (u32::from(data[1] & 0x0f) << 16) | (u32::from(data[2]) << 8) | u32::from(data[3]),
        next_header: data[6],
        hop_limit: data[7],
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    };
    let (transport, payload) = dissect_transport(header.next_header, &data[40..40 + payload_len])?;
    Ok(DissectedPacket {
        network: NetworkHeader::V6(header),
        transport,
        payload,
    })
}

fn dissect_transport(
    protocol: u8,
    segment: &[u8],
) -> Result<(TransportHeader, Vec<u8>), DissectError> {
    match protocol {
        PROTO_TCP => {
            if segment.len() < 20 {
                return Err(DissectError::ShortPacket);
            }
            let data_offset = usize::from(segment[12] >> 4) * 4;
            if data_offset < 20 || segment.len() < data_offset {
                return Err(DissectError::ShortPacket);
            }
            let header = TcpHeader {
                src_port: be16(segment, 0),
                dst_port: be16(segment, 2),
                seq: be32(segment, 4),
                ack: be32(segment, 8),
                flags: segment[13],
                window: be16(segment, 14),
                urgent: be16(segment, 18),
                options: segment[20..data_offset].to_vec(),
            };
            Ok((TransportHeader::Tcp(header), segment[data_offset..].to_vec()))
        }
        PROTO_UDP => {
            if segment.len() < 8 {
                return Err(DissectError::ShortPacket);
            }
            let length = usize::from(be16(segment, 4));
            if length < 8 || segment.len() < length {
                return Err(DissectError::ShortPacket);
            }
            let header = UdpHeader {
                src_port: be16(segment, 0),
                dst_port: be16(segment, 2),
            };
            Ok((TransportHeader::Udp(header), segment[8..length].to_vec()))
        }
        _ => Err(DissectError::UnsupportedTransport),
    }
}

impl DissectedPacket {
    /// Source address of the network layer.
    pub fn src_addr(&self) -> IpAddr {
        match &self.network {
            NetworkHeader::V4(h) => IpAddr::V4(h.src),
            NetworkHeader::V6(h) => IpAddr::V6(h.src),
        }
    }

    /// Destination address of the network layer.
    pub fn dst_addr(&self) -> IpAddr {
        match &self.network {
            NetworkHeader::V4(h) => IpAddr::V4(h.dst),
            NetworkHeader::V6(h) => IpAddr::V6(h.dst),
        }
    }

    /// TTL (IPv4) or hop limit (IPv6).
    pub fn ttl(&self) -> u8 {
        match &self.network {
            NetworkHeader::V4(h) => h.ttl,
            NetworkHeader::V6(h) => h.hop_limit,
        }
    }

    /// Decrements the TTL / hop limit, saturating at zero.
    pub fn decrement_ttl(&mut self) {
        match &mut self.network {
            NetworkHeader::V4(h) => h.ttl = h.ttl.saturating_sub(1),
            NetworkHeader::V6(h) => h.hop_limit = h.hop_limit.saturating_sub(1),
        }
    }

    pub fn transport_protocol(&self) -> TransportProtocol {
        match &self.transport {
            TransportHeader::Tcp(_) => TransportProtocol::Tcp,
            TransportHeader::Udp(_) => TransportProtocol::Udp,
        }
    }

    pub fn src_port(&self) -> u16 {
        match &self.transport {
            TransportHeader::Tcp(h) => h.src_port,
            TransportHeader::Udp(h) => h.src_port,
        }
    }

    pub fn dst_port(&self) -> u16 {
        match &self.transport {
            TransportHeader::Tcp(h) => h.dst_port,
            TransportHeader::Udp(h) => h.dst_port,
        }
    }

    /// True when protocol, destination address, and destination port all
    /// match.
    pub fn matches_destination(&self, proto: TransportProtocol, addr: IpAddr, port: u16) -> bool {
        self.transport_protocol() == proto && self.dst_addr() == addr && self.dst_port() == port
    }

    /// True when protocol, source address, and source port all match.
    pub fn matches_source(&self, proto: TransportProtocol, addr: IpAddr, port: u16) -> bool {
        self.transport_protocol() == proto && self.src_addr() == addr && self.src_port() == port
    }

    /// Hash identifying the 5-tuple flow this packet belongs to. Commutative
    /// over endpoints: both directions of a flow hash to the same value.
    pub fn flow_hash(&self) -> u64 {
        let src = (self.src_addr(), self.src_port());
        let dst = (self.dst_addr(), self.dst_port());
        let (lo, hi) = if src <= dst { (src, dst) } else { (dst, src) };

        let mut hasher = DefaultHasher::new();
        self.transport_protocol().number().hash(&mut hasher);
        lo.hash(&mut hasher);
        hi.hash(&mut hasher);
        hasher.finish()
    }

    /// Extracts the SNI from a TLS ClientHello carried in the TCP payload.
    pub fn tls_server_name(&self) -> Result<String, TlsError> {
        match &self.transport {
            TransportHeader::Tcp(_) => tls::extract_server_name(&self.payload),
            TransportHeader::Udp(_) => Err(TlsError::NotHandshake),
        }
    }

    /// Serializes the packet, recomputing lengths and checksums for both
    /// layers.
    pub fn serialize(&self) -> Vec<u8> {
        let segment = self.serialize_transport();
        match &self.network {
            NetworkHeader::V4(h) => {
                let ihl = 20 + h.options.len();
                let total_len = ihl + segment.len();
                let mut out = Vec::with_capacity(total_len);
                out.push(0x40 | ((ihl / 4) as u8));
                out.push(h.tos);
                out.extend_from_slice(&(total_len as u16).to_be_bytes());
                out.extend_from_slice(&h.identification.to_be_bytes());
                out.extend_from_slice(&h.flags_fragment.to_be_bytes());
                out.push(h.ttl);
                out.push(h.protocol);
                out.extend_from_slice(&[0, 0]); // checksum placeholder
                out.extend_from_slice(&h.src.octets());
                out.extend_from_slice(&h.dst.octets());
                out.extend_from_slice(&h.options);
                let cksum = checksum::over(&out[..ihl]);
                out[10..12].copy_from_slice(&cksum.to_be_bytes());
                out.extend_from_slice(&segment);
                out
            }
            NetworkHeader::V6(h) => {
                let mut out = Vec::with_capacity(40 + segment.len());
                out.push(0x60 | (h.traffic_class >> 4));
                out.push((h.traffic_class << 4) | ((h.flow_label >> 16) as u8 & 0x0f));
                out.push((h.flow_label >> 8) as u8);
                out.push(h.flow_label as u8);
                out.extend_from_slice(&(segment.len() as u16).to_be_bytes());
                out.push(h.next_header);
                out.push(h.hop_limit);
                out.extend_from_slice(&h.src.octets());
                out.extend_from_slice(&h.dst.octets());
                out.extend_from_slice(&segment);
                out
            }
        }
    }

    /// Builds the transport segment with its checksum already computed from
    /// the network-layer pseudo-header.
    fn serialize_transport(&self) -> Vec<u8> {
        let mut segment = match &self.transport {
            TransportHeader::Tcp(h) => {
                let data_offset = 20 + h.options.len();
                let mut seg = Vec::with_capacity(data_offset + self.payload.len());
                seg.extend_from_slice(&h.src_port.to_be_bytes());
                seg.extend_from_slice(&h.dst_port.to_be_bytes());
                seg.extend_from_slice(&h.seq.to_be_bytes());
                seg.extend_from_slice(&h.ack.to_be_bytes());
                seg.push(((data_offset / 4) as u8) << 4);
                seg.push(h.flags);
                seg.extend_from_slice(&h.window.to_be_bytes());
                seg.extend_from_slice(&[0, 0]); // checksum placeholder
                seg.extend_from_slice(&h.urgent.to_be_bytes());
                seg.extend_from_slice(&h.options);
                seg.extend_from_slice(&self.payload);
                seg
            }
            TransportHeader::Udp(h) => {
                let length = 8 + self.payload.len();
                let mut seg = Vec::with_capacity(length);
                seg.extend_from_slice(&h.src_port.to_be_bytes());
                seg.extend_from_slice(&h.dst_port.to_be_bytes());
                seg.extend_from_slice(&(length as u16).to_be_bytes());
                seg.extend_from_slice(&[0, 0]); // checksum placeholder
                seg.extend_from_slice(&self.payload);
                seg
            }
        };

        let proto = self.transport_protocol().number();
        let pseudo = match &self.network {
            NetworkHeader::V4(h) => checksum::pseudo_v4(h.src, h.dst, proto, segment.len() as u16),
            NetworkHeader::V6(h) => checksum::pseudo_v6(h.src, h.dst, proto, segment.len() as u32),
        };
        let mut cksum = checksum::transport(pseudo, &segment);
        let at = match &self.transport {
            TransportHeader::Tcp(_) => 16,
            TransportHeader::Udp(_) => {
                // A computed zero means "no checksum" on the wire; transmit
                // the all-ones equivalent instead (RFC 768).
                if cksum == 0 {
                    cksum = 0xffff;
                }
                6
            }
        };
        segment[at..at + 2].copy_from_slice(&cksum.to_be_bytes());
        segment
    }
}

/// Builds a reflected TCP segment with swapped endpoints. Shared core of the
/// spoofed-response builders; IPv4 only.
fn reflect_tcp(
    pkt: &DissectedPacket,
    flags: u8,
    payload: Vec<u8>,
) -> Result<Vec<u8>, DissectError> {
    let v4 = match &pkt.network {
        NetworkHeader::V4(h) => h,
        NetworkHeader::V6(_) => return Err(DissectError::UnsupportedNetwork),
    };
    let tcp = match &pkt.transport {
        TransportHeader::Tcp(h) => h,
        TransportHeader::Udp(_) => return Err(DissectError::UnsupportedTransport),
    };

    let reflected = DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 0,
            flags_fragment: 0,
            ttl: REFLECTED_TTL,
            protocol: v4.protocol,
            src: v4.dst,
            dst: v4.src,
            options: Vec::new(),
        }),
        transport: TransportHeader::Tcp(TcpHeader {
            src_port: tcp.dst_port,
            dst_port: tcp.src_port,
            seq: tcp.ack,
            ack: tcp.seq,
            flags,
            window: tcp.window,
            urgent: 0,
            options: Vec::new(),
        }),
        payload,
    };
    Ok(reflected.serialize())
}

/// Builds a spoofed RST segment answering `pkt`. IPv4 only.
pub fn reflect_tcp_with_rst(pkt: &DissectedPacket) -> Result<Vec<u8>, DissectError> {
    reflect_tcp(pkt, tcp_flags::RST, Vec::new())
}

/// Builds a spoofed FIN|ACK segment answering `pkt`. IPv4 only.
pub fn reflect_tcp_with_finack(pkt: &DissectedPacket) -> Result<Vec<u8>, DissectError> {
    reflect_tcp(pkt, tcp_flags::FIN | tcp_flags::ACK, Vec::new())
}

/// Builds a spoofed RST|ACK segment answering `pkt`. IPv4 only.
pub fn reflect_tcp_with_rstack(pkt: &DissectedPacket) -> Result<Vec<u8>, DissectError> {
    reflect_tcp(pkt, tcp_flags::RST | tcp_flags::ACK, Vec::new())
}

/// Builds a spoofed FIN|ACK segment carrying `payload` (blockpage
/// injection). IPv4 only.
pub fn reflect_tcp_with_payload(
    pkt: &DissectedPacket,
    payload: Vec<u8>,
) -> Result<Vec<u8>, DissectError> {
    reflect_tcp(pkt, tcp_flags::FIN | tcp_flags::ACK | tcp_flags::PSH, payload)
}

/// Builds a UDP datagram answering `pkt` with `payload`, endpoints swapped,
/// lengths and checksums recomputed. IPv4 only.
pub fn reflect_udp_with_payload(
    pkt: &DissectedPacket,
    payload: Vec<u8>,
) -> Result<Vec<u8>, DissectError> {
    let v4 = match &pkt.network {
        NetworkHeader::V4(h) => h,
        NetworkHeader::V6(_) => return Err(DissectError::UnsupportedNetwork),
    };
    let udp = match &pkt.transport {
        TransportHeader::Udp(h) => h,
        TransportHeader::Tcp(_) => return Err(DissectError::UnsupportedTransport),
    };

    let reflected = DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 0,
            flags_fragment: 0,
            ttl: REFLECTED_TTL,
            protocol: v4.protocol,
            src: v4.dst,
            dst: v4.src,
            options: Vec::new(),
        }),
        transport: TransportHeader::Udp(UdpHeader {
            src_port: udp.dst_port,
            dst_port: udp.src_port,
        }),
        payload,
    };
    Ok(reflected.serialize())
}

#[cfg(test)]
mod tests {
    use super::testutil::{tcp_packet, udp_packet};
    use super::*;

    #[test]
    fn test_dissect_rejects_empty_and_garbage() {
        assert_eq!(dissect(&[]), Err(DissectError::ShortPacket));
        assert_eq!(dissect(&[0x15, 0, 0, 0]), Err(DissectError::UnsupportedNetwork));
    }

    #[test]
    fn test_dissect_rejects_short_ipv4() {
        let raw = vec![0x45u8; 19];
        assert_eq!(dissect(&raw), Err(DissectError::ShortPacket));
    }

    #[test]
    fn test_dissect_rejects_non_tcp_udp() {
        let mut raw = tcp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            4000,
            Ipv4Addr::new(10, 0, 0, 2),
            443,
            b"",
        );
        raw[9] = 1; // ICMP
        assert_eq!(dissect(&raw), Err(DissectError::UnsupportedTransport));
    }

    #[test]
    fn test_tcp_round_trip_is_stable() {
        let raw = tcp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            4000,
            Ipv4Addr::new(10, 0, 0, 2),
            443,
            b"hello",
        );
        let pkt = dissect(&raw).unwrap();
        let out = pkt.serialize();
        assert_eq!(raw, out, "serialize(dissect(p)) should reproduce p");
        assert_eq!(dissect(&out).unwrap(), pkt);
    }

    #[test]
    fn test_udp_round_trip_is_stable() {
        let raw = udp_packet(
            Ipv4Addr::new(192, 168, 1, 1),
            5353,
            Ipv4Addr::new(192, 168, 1, 2),
            53,
            b"query",
        );
        let pkt = dissect(&raw).unwrap();
        assert_eq!(pkt.transport_protocol(), TransportProtocol::Udp);
        assert_eq!(pkt.payload, b"query");
        assert_eq!(pkt.serialize(), raw);
    }

    #[test]
    fn test_ipv6_round_trip_is_stable() {
        let pkt = DissectedPacket {
            network: NetworkHeader::V6(Ipv6Header {
                traffic_class: 0,
                flow_label: 0xabcde,
                next_header: PROTO_UDP,
                hop_limit: 64,
                src: "fc00::1".parse().unwrap(),
                dst: "fc00::2".parse().unwrap(),
            }),
            transport: TransportHeader::Udp(UdpHeader {
                src_port: 9999,
                dst_port: 53,
            }),
            payload: b"v6 body".to_vec(),
        };
        let raw = pkt.serialize();
        let back = dissect(&raw).unwrap();
        assert_eq!(back, pkt);
        assert_eq!(back.serialize(), raw);
    }

    #[test]
    fn test_serialized_ipv4_header_checksum_is_valid() {
        let raw = tcp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            1,
            Ipv4Addr::new(10, 0, 0, 2),
            2,
            b"x",
        );
        assert_eq!(checksum::over(&raw[..20]), 0, "header checksum must verify");
    }

    #[test]
    fn test_ttl_decrement_saturates() {
        let raw = tcp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            1,
            Ipv4Addr::new(10, 0, 0, 2),
            2,
            b"",
        );
        let mut pkt = dissect(&raw).unwrap();
        assert_eq!(pkt.ttl(), 64);
        for _ in 0..100 {
            pkt.decrement_ttl();
        }
        assert_eq!(pkt.ttl(), 0, "TTL must saturate at zero");
    }

    #[test]
    fn test_flow_hash_symmetric() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let forward = dissect(&tcp_packet(a, 4000, b, 443, b"")).unwrap();
        let reverse = dissect(&tcp_packet(b, 443, a, 4000, b"")).unwrap();
        assert_eq!(
            forward.flow_hash(),
            reverse.flow_hash(),
            "both directions of a flow must hash identically"
        );

        let other = dissect(&tcp_packet(a, 4001, b, 443, b"")).unwrap();
        assert_ne!(forward.flow_hash(), other.flow_hash());
    }

    #[test]
    fn test_matches_destination_and_source() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let pkt = dissect(&tcp_packet(a, 4000, b, 443, b"")).unwrap();

        assert!(pkt.matches_destination(TransportProtocol::Tcp, IpAddr::V4(b), 443));
        assert!(!pkt.matches_destination(TransportProtocol::Udp, IpAddr::V4(b), 443));
        assert!(!pkt.matches_destination(TransportProtocol::Tcp, IpAddr::V4(b), 80));
        assert!(pkt.matches_source(TransportProtocol::Tcp, IpAddr::V4(a), 4000));
        assert!(!pkt.matches_source(TransportProtocol::Tcp, IpAddr::V4(b), 4000));
    }

    #[test]
    fn test_reflect_rst_swaps_endpoints() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let pkt = dissect(&tcp_packet(a, 4000, b, 443, b"req")).unwrap();

        let rst = dissect(&reflect_tcp_with_rst(&pkt).unwrap()).unwrap();
        assert_eq!(rst.src_addr(), IpAddr::V4(b));
        assert_eq!(rst.dst_addr(), IpAddr::V4(a));
        assert_eq!(rst.src_port(), 443);
        assert_eq!(rst.dst_port(), 4000);
        assert_eq!(rst.ttl(), REFLECTED_TTL);

        let tcp = match &rst.transport {
            TransportHeader::Tcp(h) => h,
            _ => panic!("expected TCP"),
        };
        assert!(tcp.rst());
        assert!(!tcp.ack_flag());
        assert!(!tcp.fin());
        assert_eq!(tcp.seq, 2000, "seq must mirror the original ack");
        assert_eq!(tcp.ack, 1000, "ack must mirror the original seq");
        assert_eq!(tcp.window, 0xffff, "window must be preserved");
    }

    #[test]
    fn test_reflect_finack_sets_both_flags() {
        let pkt = dissect(&tcp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            4000,
            Ipv4Addr::new(10, 0, 0, 2),
            443,
            b"",
        ))
        .unwrap();
        let seg = dissect(&reflect_tcp_with_finack(&pkt).unwrap()).unwrap();
        let tcp = match &seg.transport {
            TransportHeader::Tcp(h) => h,
            _ => panic!("expected TCP"),
        };
        assert!(tcp.fin() && tcp.ack_flag());
        assert!(!tcp.rst());
    }

    #[test]
    fn test_reflect_udp_carries_payload() {
        let pkt = dissect(&udp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            5000,
            Ipv4Addr::new(10, 0, 0, 2),
            53,
            b"question",
        ))
        .unwrap();
        let resp = dissect(&reflect_udp_with_payload(&pkt, b"answer".to_vec()).unwrap()).unwrap();
        assert_eq!(resp.src_port(), 53);
        assert_eq!(resp.dst_port(), 5000);
        assert_eq!(resp.payload, b"answer");
    }

    #[test]
    fn test_reflect_rejects_wrong_layers() {
        let v6 = DissectedPacket {
            network: NetworkHeader::V6(Ipv6Header {
                traffic_class: 0,
                flow_label: 0,
                next_header: PROTO_TCP,
                hop_limit: 64,
                src: "fc00::1".parse().unwrap(),
                dst: "fc00::2".parse().unwrap(),
            }),
            transport: TransportHeader::Tcp(TcpHeader {
                src_port: 1,
                dst_port: 2,
                seq: 0,
                ack: 0,
                flags: 0,
                window: 0,
                urgent: 0,
                options: Vec::new(),
            }),
            payload: Vec::new(),
        };
        assert_eq!(
            reflect_tcp_with_rst(&v6).unwrap_err(),
            DissectError::UnsupportedNetwork,
            "reflection is IPv4-only"
        );

        let udp = dissect(&udp_packet(
            Ipv4Addr::new(10, 0, 0, 1),
            1,
            Ipv4Addr::new(10, 0, 0, 2),
            2,
            b"",
        ))
        .unwrap();
        assert_eq!(
            reflect_tcp_with_rst(&udp).unwrap_err(),
            DissectError::UnsupportedTransport
        );
        assert_eq!(
            reflect_udp_with_payload(
                &dissect(&tcp_packet(
                    Ipv4Addr::new(10, 0, 0, 1),
                    1,
                    Ipv4Addr::new(10, 0, 0, 2),
                    2,
                    b"",
                ))
                .unwrap(),
                Vec::new()
            )
            .unwrap_err(),
            DissectError::UnsupportedTransport
        );
    }
}
