//! The built-in DPI rule set: resets, connection closes, drops, throttling,
//! blockpage injection, and DNS spoofing.
//!
//! Every rule is a plain config struct implementing [`DpiRule`]. A rule with
//! missing mandatory configuration (empty SNI, search string, or domain)
//! reports no-match rather than an error.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DpiDirection, DpiPolicy, DpiRule};
use crate::frame::FrameFlags;
use crate::packet::{self, dns, DissectedPacket, TransportProtocol};

const DNS_PORT: u16 = 53;

/// True when the TCP payload contains `needle`.
fn payload_contains(pkt: &DissectedPacket, needle: &str) -> bool {
    let needle = needle.as_bytes();
    !needle.is_empty()
        && pkt
            .payload
            .windows(needle.len())
            .any(|window| window == needle)
}

/// True when the packet carries a ClientHello whose SNI equals `sni`
/// (case-insensitively).
fn sni_matches(pkt: &DissectedPacket, sni: &str) -> bool {
    match pkt.tls_server_name() {
        Ok(name) => name.eq_ignore_ascii_case(sni),
        Err(_) => false,
    }
}

fn spoofing_policy(spoofed: Vec<Vec<u8>>, extra_flags: FrameFlags) -> DpiPolicy {
    DpiPolicy {
        flags: FrameFlags::SPOOF | extra_flags,
        spoofed,
        ..DpiPolicy::default()
    }
}

/// Injects a spoofed RST when a ClientHello for the configured SNI passes
/// client→server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetTrafficForTlsSni {
    pub sni: String,
}

impl DpiRule for ResetTrafficForTlsSni {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.sni.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if !sni_matches(pkt, &self.sni) {
            return None;
        }
        let rst = packet::reflect_tcp_with_rst(pkt).ok()?;
        Some(spoofing_policy(vec![rst], FrameFlags::SPOOF_RST))
    }
}

/// Injects a spoofed FIN|ACK when a ClientHello for the configured SNI
/// passes client→server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConnectionForTlsSni {
    pub sni: String,
}

impl DpiRule for CloseConnectionForTlsSni {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.sni.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if !sni_matches(pkt, &self.sni) {
            return None;
        }
        let finack = packet::reflect_tcp_with_finack(pkt).ok()?;
        Some(spoofing_policy(vec![finack], FrameFlags::empty()))
    }
}

/// Injects a spoofed RST when a client→server TCP payload for the configured
/// endpoint contains the configured string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetTrafficForString {
    pub string: String,
    pub server_addr: IpAddr,
    pub server_port: u16,
}

impl DpiRule for ResetTrafficForString {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.string.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if !pkt.matches_destination(TransportProtocol::Tcp, self.server_addr, self.server_port) {
            return None;
        }
        if !payload_contains(pkt, &self.string) {
            return None;
        }
        let rst = packet::reflect_tcp_with_rst(pkt).ok()?;
        Some(spoofing_policy(vec![rst], FrameFlags::empty()))
    }
}

/// Injects a spoofed FIN|ACK when a client→server TCP payload for the
/// configured endpoint contains the configured string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConnectionForString {
    pub string: String,
    pub server_addr: IpAddr,
    pub server_port: u16,
}

impl DpiRule for CloseConnectionForString {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.string.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if !pkt.matches_destination(TransportProtocol::Tcp, self.server_addr, self.server_port) {
            return None;
        }
        if !payload_contains(pkt, &self.string) {
            return None;
        }
        let finack = packet::reflect_tcp_with_finack(pkt).ok()?;
        Some(spoofing_policy(vec![finack], FrameFlags::empty()))
    }
}

/// Injects a spoofed RST|ACK on any TCP packet addressed to the configured
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConnectionForServerEndpoint {
    pub server_addr: IpAddr,
    pub server_port: u16,
}

impl DpiRule for CloseConnectionForServerEndpoint {
    fn filter(&self, _direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if !pkt.matches_destination(TransportProtocol::Tcp, self.server_addr, self.server_port) {
            return None;
        }
        let rstack = packet::reflect_tcp_with_rstack(pkt).ok()?;
        Some(spoofing_policy(vec![rstack], FrameFlags::empty()))
    }
}

/// Injects a FIN|ACK segment carrying an HTTP blockpage when a
/// client→server TCP payload contains the configured string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoofBlockpageForString {
    pub string: String,
    /// Complete HTTP response bytes carried by the spoofed segment.
    pub response: Vec<u8>,
}

impl SpoofBlockpageForString {
    /// Builds the rule with a minimal `200 OK` HTML blockpage around `body`.
    pub fn new(string: impl Into<String>, body: &str) -> SpoofBlockpageForString {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        SpoofBlockpageForString {
            string: string.into(),
            response: response.into_bytes(),
        }
    }
}

impl DpiRule for SpoofBlockpageForString {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.string.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if pkt.transport_protocol() != TransportProtocol::Tcp {
            return None;
        }
        if !payload_contains(pkt, &self.string) {
            return None;
        }
        let blockpage = packet::reflect_tcp_with_payload(pkt, self.response.clone()).ok()?;
        Some(spoofing_policy(vec![blockpage], FrameFlags::empty()))
    }
}

/// Answers client→server DNS queries for the configured domain with a
/// synthetic response. An empty address list spoofs NXDOMAIN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoofDnsResponse {
    pub domain: String,
    pub addresses: Vec<Ipv4Addr>,
    pub cname: Option<String>,
}

impl DpiRule for SpoofDnsResponse {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.domain.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if pkt.transport_protocol() != TransportProtocol::Udp || pkt.dst_port() != DNS_PORT {
            return None;
        }
        let request = dns::parse_request(&pkt.payload).ok()?;
        if request.name != dns::canonical_name(&self.domain) {
            return None;
        }

        let spec = if self.addresses.is_empty() {
            dns::DnsResponseSpec::NxDomain
        } else {
            dns::DnsResponseSpec::Answer {
                addresses: self.addresses.clone(),
                cname: self.cname.clone(),
            }
        };
        let response = dns::build_response(&request, &spec);
        let datagram = packet::reflect_udp_with_payload(pkt, response).ok()?;
        Some(spoofing_policy(vec![datagram], FrameFlags::empty()))
    }
}

/// Drops every packet of a flow touching the configured endpoint, in either
/// direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropTrafficForServerEndpoint {
    pub protocol: TransportProtocol,
    pub server_addr: IpAddr,
    pub server_port: u16,
}

impl DpiRule for DropTrafficForServerEndpoint {
    fn filter(&self, _direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        let hit = pkt.matches_destination(self.protocol, self.server_addr, self.server_port)
            || pkt.matches_source(self.protocol, self.server_addr, self.server_port);
        hit.then(|| DpiPolicy {
            flags: FrameFlags::DROP,
            ..DpiPolicy::default()
        })
    }
}

/// Drops flows whose ClientHello carries the configured SNI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropTrafficForTlsSni {
    pub sni: String,
}

impl DpiRule for DropTrafficForTlsSni {
    fn filter(&self, _direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.sni.is_empty() || !sni_matches(pkt, &self.sni) {
            return None;
        }
        Some(DpiPolicy {
            flags: FrameFlags::DROP,
            ..DpiPolicy::default()
        })
    }
}

/// Adds loss (and optionally delay) to flows whose ClientHello carries the
/// configured SNI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleTrafficForTlsSni {
    pub sni: String,
    /// Loss probability added on top of the link PLR.
    pub plr: f64,
    /// Extra one-way delay added to affected frames.
    #[serde(default)]
    pub delay: Duration,
}

impl DpiRule for ThrottleTrafficForTlsSni {
    fn filter(&self, direction: DpiDirection, pkt: &DissectedPacket) -> Option<DpiPolicy> {
        if self.sni.is_empty() || direction != DpiDirection::ClientToServer {
            return None;
        }
        if !sni_matches(pkt, &self.sni) {
            return None;
        }
        Some(DpiPolicy {
            delay: self.delay,
            plr: self.plr,
            ..DpiPolicy::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::testutil::{tcp_packet, udp_packet};
    use crate::packet::tls::client_hello_with_sni;
    use crate::packet::{dissect, tcp_flags, TransportHeader};

    const BLOCKED_SNI: &str = "tyrell.wellick.name";

    fn client() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 1)
    }

    fn server() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 2)
    }

    fn client_hello_packet(sni: &str) -> DissectedPacket {
        dissect(&tcp_packet(
            client(),
            4000,
            server(),
            443,
            &client_hello_with_sni(sni),
        ))
        .unwrap()
    }

    fn tcp_flags_of(datagram: &[u8]) -> u8 {
        match dissect(datagram).unwrap().transport {
            TransportHeader::Tcp(h) => h.flags,
            _ => panic!("expected TCP"),
        }
    }

    #[test]
    fn test_reset_for_sni_spoofs_rst() {
        let rule = ResetTrafficForTlsSni {
            sni: BLOCKED_SNI.into(),
        };
        let policy = rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet(BLOCKED_SNI))
            .expect("matching SNI must produce a policy");

        assert!(policy.flags.contains(FrameFlags::SPOOF_RST));
        assert!(policy.flags.contains(FrameFlags::SPOOF));
        assert_eq!(policy.spoofed.len(), 1);
        assert_eq!(tcp_flags_of(&policy.spoofed[0]), tcp_flags::RST);
    }

    #[test]
    fn test_reset_for_sni_ignores_other_names_and_directions() {
        let rule = ResetTrafficForTlsSni {
            sni: BLOCKED_SNI.into(),
        };
        assert!(rule
            .filter(
                DpiDirection::ClientToServer,
                &client_hello_packet("safe.example.com")
            )
            .is_none());
        assert!(rule
            .filter(DpiDirection::ServerToClient, &client_hello_packet(BLOCKED_SNI))
            .is_none());
    }

    #[test]
    fn test_empty_sni_never_matches() {
        let rule = ResetTrafficForTlsSni { sni: String::new() };
        assert!(rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet(""))
            .is_none());
    }

    #[test]
    fn test_close_for_sni_spoofs_finack() {
        let rule = CloseConnectionForTlsSni {
            sni: BLOCKED_SNI.into(),
        };
        let policy = rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet(BLOCKED_SNI))
            .unwrap();
        assert_eq!(
            tcp_flags_of(&policy.spoofed[0]),
            tcp_flags::FIN | tcp_flags::ACK
        );
    }

    #[test]
    fn test_sni_match_is_case_insensitive() {
        let rule = CloseConnectionForTlsSni {
            sni: "Example.COM".into(),
        };
        assert!(rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet("example.com"))
            .is_some());
    }

    #[test]
    fn test_reset_for_string_requires_endpoint_match() {
        let rule = ResetTrafficForString {
            string: "www.example.com".into(),
            server_addr: IpAddr::V4(server()),
            server_port: 80,
        };
        let hit = dissect(&tcp_packet(
            client(),
            4000,
            server(),
            80,
            b"GET / HTTP/1.1\r\nHost: www.example.com\r\n\r\n",
        ))
        .unwrap();
        let policy = rule.filter(DpiDirection::ClientToServer, &hit).unwrap();
        assert_eq!(tcp_flags_of(&policy.spoofed[0]), tcp_flags::RST);

        // Same payload to a different endpoint: no match.
        let miss = dissect(&tcp_packet(
            client(),
            4000,
            server(),
            8080,
            b"GET / HTTP/1.1\r\nHost: www.example.com\r\n\r\n",
        ))
        .unwrap();
        assert!(rule.filter(DpiDirection::ClientToServer, &miss).is_none());
    }

    #[test]
    fn test_close_for_endpoint_matches_any_direction() {
        let rule = CloseConnectionForServerEndpoint {
            server_addr: IpAddr::V4(server()),
            server_port: 443,
        };
        let pkt = dissect(&tcp_packet(client(), 4000, server(), 443, b"")).unwrap();
        let policy = rule.filter(DpiDirection::ServerToClient, &pkt).unwrap();
        assert_eq!(
            tcp_flags_of(&policy.spoofed[0]),
            tcp_flags::RST | tcp_flags::ACK
        );
    }

    #[test]
    fn test_blockpage_carries_http_response() {
        let rule = SpoofBlockpageForString::new("www.example.com", "<html>blocked</html>");
        let pkt = dissect(&tcp_packet(
            client(),
            4000,
            server(),
            80,
            b"GET / HTTP/1.1\r\nHost: www.example.com\r\n\r\n",
        ))
        .unwrap();

        let policy = rule.filter(DpiDirection::ClientToServer, &pkt).unwrap();
        let spoofed = dissect(&policy.spoofed[0]).unwrap();
        let body = String::from_utf8(spoofed.payload.clone()).unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.ends_with("<html>blocked</html>"));
        assert_eq!(spoofed.src_addr(), IpAddr::V4(server()));
        assert_eq!(spoofed.dst_addr(), IpAddr::V4(client()));
    }

    #[test]
    fn test_dns_spoof_answers_matching_domain() {
        let rule = SpoofDnsResponse {
            domain: "example.com".into(),
            addresses: vec![Ipv4Addr::new(10, 9, 9, 9)],
            cname: None,
        };
        let query = dns::build_request(0x0101, "example.com", dns::TYPE_A);
        let pkt = dissect(&udp_packet(client(), 5353, server(), 53, &query)).unwrap();

        let policy = rule.filter(DpiDirection::ClientToServer, &pkt).unwrap();
        let spoofed = dissect(&policy.spoofed[0]).unwrap();
        assert_eq!(spoofed.src_port(), 53);
        let response = dns::parse_response(&spoofed.payload).unwrap();
        assert_eq!(response.id, 0x0101);
        assert_eq!(response.rcode, dns::RCODE_NO_ERROR);
        assert_eq!(response.addresses, vec![Ipv4Addr::new(10, 9, 9, 9)]);
    }

    #[test]
    fn test_dns_spoof_empty_addresses_is_nxdomain() {
        let rule = SpoofDnsResponse {
            domain: "example.com".into(),
            addresses: Vec::new(),
            cname: None,
        };
        let query = dns::build_request(7, "example.com", dns::TYPE_A);
        let pkt = dissect(&udp_packet(client(), 5353, server(), 53, &query)).unwrap();

        let policy = rule.filter(DpiDirection::ClientToServer, &pkt).unwrap();
        let spoofed = dissect(&policy.spoofed[0]).unwrap();
        let response = dns::parse_response(&spoofed.payload).unwrap();
        assert_eq!(response.rcode, dns::RCODE_NXDOMAIN);
        assert!(response.addresses.is_empty());
    }

    #[test]
    fn test_dns_spoof_ignores_other_domains_and_ports() {
        let rule = SpoofDnsResponse {
            domain: "example.com".into(),
            addresses: vec![Ipv4Addr::new(10, 9, 9, 9)],
            cname: None,
        };
        let other = dns::build_request(7, "other.org", dns::TYPE_A);
        let pkt = dissect(&udp_packet(client(), 5353, server(), 53, &other)).unwrap();
        assert!(rule.filter(DpiDirection::ClientToServer, &pkt).is_none());

        let query = dns::build_request(7, "example.com", dns::TYPE_A);
        let wrong_port = dissect(&udp_packet(client(), 5353, server(), 5300, &query)).unwrap();
        assert!(rule
            .filter(DpiDirection::ClientToServer, &wrong_port)
            .is_none());
    }

    #[test]
    fn test_drop_for_endpoint_matches_both_directions() {
        let rule = DropTrafficForServerEndpoint {
            protocol: TransportProtocol::Tcp,
            server_addr: IpAddr::V4(server()),
            server_port: 443,
        };
        let to_server = dissect(&tcp_packet(client(), 4000, server(), 443, b"")).unwrap();
        let from_server = dissect(&tcp_packet(server(), 443, client(), 4000, b"")).unwrap();

        for pkt in [&to_server, &from_server] {
            let policy = rule.filter(DpiDirection::ClientToServer, pkt).unwrap();
            assert!(policy.flags.contains(FrameFlags::DROP));
            assert!(policy.spoofed.is_empty());
        }
    }

    #[test]
    fn test_drop_for_sni_flags_drop() {
        let rule = DropTrafficForTlsSni {
            sni: BLOCKED_SNI.into(),
        };
        let policy = rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet(BLOCKED_SNI))
            .unwrap();
        assert!(policy.flags.contains(FrameFlags::DROP));
    }

    #[test]
    fn test_throttle_for_sni_sets_plr_and_delay() {
        let rule = ThrottleTrafficForTlsSni {
            sni: BLOCKED_SNI.into(),
            plr: 0.07,
            delay: Duration::from_millis(30),
        };
        let policy = rule
            .filter(DpiDirection::ClientToServer, &client_hello_packet(BLOCKED_SNI))
            .unwrap();
        assert_eq!(policy.plr, 0.07);
        assert_eq!(policy.delay, Duration::from_millis(30));
        assert!(policy.flags.is_empty());
        assert!(policy.spoofed.is_empty());
    }
}
