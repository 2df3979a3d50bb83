//! Datagram builders shared by the integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;

use netfab::packet::{
    DissectedPacket, Ipv4Header, NetworkHeader, TcpHeader, TransportHeader, UdpHeader,
};

pub fn tcp_datagram(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    tcp_datagram_with_ttl(src, src_port, dst, dst_port, 64, payload)
}

pub fn tcp_datagram_with_ttl(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    ttl: u8,
    payload: &[u8],
) -> Vec<u8> {
    DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 0x0101,
            flags_fragment: 0x4000,
            ttl,
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
            flags: 0x10, // ACK
            window: 0xffff,
            urgent: 0,
            options: Vec::new(),
        }),
        payload: payload.to_vec(),
    }
    .serialize()
}

pub fn udp_datagram(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 0x0202,
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

/// Minimal TLS ClientHello record carrying one server_name extension.
pub fn client_hello(sni: &str) -> Vec<u8> {
    let name = sni.as_bytes();
    let mut entry = vec![0u8]; // host_name
    entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
    entry.extend_from_slice(name);
    let mut ext_data = (entry.len() as u16).to_be_bytes().to_vec();
    ext_data.extend_from_slice(&entry);
    let mut extensions = 0u16.to_be_bytes().to_vec(); // server_name extension type
    extensions.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&ext_data);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0u8; 32]);
    body.push(0);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&[0x13, 0x01]);
    body.push(1);
    body.push(0);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![1u8]; // ClientHello
    handshake.extend_from_slice(&[
        (body.len() >> 16) as u8,
        (body.len() >> 8) as u8,
        body.len() as u8,
    ]);
    handshake.extend_from_slice(&body);

    let mut record = vec![22u8, 0x03, 0x01]; // handshake record
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
