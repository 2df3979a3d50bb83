//! Packet builders shared by unit tests across the crate.

use std::net::Ipv4Addr;

use super::{
    tcp_flags, DissectedPacket, Ipv4Header, NetworkHeader, TcpHeader, TransportHeader, UdpHeader,
};

/// Serialized IPv4/TCP packet with fixed seq=1000, ack=2000, ACK flag.
pub(crate) fn tcp_packet(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 0x1234,
            flags_fragment: 0x4000,
            ttl: 64,
            protocol: 6,
            src,
            dst,
            options: Vec::new(),
        }),
        transport: TransportHeader::Tcp(TcpHeader {
            src_port,
            dst_port,
            seq: 1000,
            ack: 2000,
            flags: tcp_flags::ACK,
            window: 0xffff,
            urgent: 0,
            options: Vec::new(),
        }),
        payload: payload.to_vec(),
    }
    .serialize()
}

/// Serialized IPv4/UDP packet.
pub(crate) fn udp_packet(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 7,
            flags_fragment: 0,
            ttl: 64,
            protocol: 17,
            src,
            dst,
            options: Vec::new(),
        }),
        transport: TransportHeader::Udp(UdpHeader { src_port, dst_port }),
        payload: payload.to_vec(),
    }
    .serialize()
}
