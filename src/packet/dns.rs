//! DNS message parsing and synthesis (RFC 1035 wire format).
//!
//! Covers exactly what the spoofing rules and their tests need: parsing a
//! single-question INET request, building a spoofed response (A answers, an
//! optional CNAME, or NXDOMAIN), and parsing a response back.
//!
//! Domain names are compared in canonical form: lowercased with a trailing
//! dot.

use std::net::Ipv4Addr;

use crate::config::DNS_ANSWER_TTL;
use crate::error::DnsError;

pub const TYPE_A: u16 = 1;
pub const TYPE_CNAME: u16 = 5;
pub const CLASS_IN: u16 = 1;

pub const RCODE_NO_ERROR: u8 = 0;
pub const RCODE_NXDOMAIN: u8 = 3;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// A parsed DNS request: transaction id plus its single INET question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRequest {
    pub id: u16,
    /// Question name in canonical form.
    pub name: String,
    pub qtype: u16,
}

/// What a spoofed response should say.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DnsResponseSpec {
    /// Name does not exist.
    NxDomain,
    /// One A answer per address, plus an optional CNAME chain entry.
    Answer {
        addresses: Vec<Ipv4Addr>,
        cname: Option<String>,
    },
}

/// A parsed DNS response, as far as the fabric cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResponse {
    pub id: u16,
    pub rcode: u8,
    pub addresses: Vec<Ipv4Addr>,
    pub cname: Option<String>,
}

/// Lowercases and appends the trailing dot if missing.
pub fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

fn be16(data: &[u8], at: usize) -> Result<u16, DnsError> {
    if data.len() < at + 2 {
        return Err(DnsError::Truncated);
    }
    Ok(u16::from_be_bytes([data[at], data[at + 1]]))
}

/// Reads a (possibly compressed) name starting at `pos`. Returns the
/// canonical name and the position just past it.
fn read_name(data: &[u8], pos: usize) -> Result<(String, usize), DnsError> {
    let mut name = String::new();
    let mut pos = pos;
    let mut next = None; // resume position once a pointer was followed
    let mut jumps = 0;

    loop {
        let len = *data.get(pos).ok_or(DnsError::Truncated)?;
        if len & 0xc0 == 0xc0 {
            // Compression pointer. Bounded to forestall pointer loops.
            jumps += 1;
            if jumps > 16 {
                return Err(DnsError::MalformedName);
            }
            let target = usize::from(be16(data, pos)? & 0x3fff);
            if next.is_none() {
                next = Some(pos + 2);
            }
            pos = target;
            continue;
        }
        if len & 0xc0 != 0 {
            return Err(DnsError::MalformedName);
        }
        pos += 1;
        if len == 0 {
            break;
        }
        let len = usize::from(len);
        let label = data.get(pos..pos + len).ok_or(DnsError::Truncated)?;
        let label = std::str::from_utf8(label).map_err(|_| DnsError::MalformedName)?;
        name.push_str(label);
        name.push('.');
        pos += len;
    }

    if name.is_empty() {
        name.push('.');
    }
    Ok((name.to_ascii_lowercase(), next.unwrap_or(pos)))
}

/// Appends `name` in wire form (uncompressed labels).
fn write_name(name: &str, out: &mut Vec<u8>) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// Parses a DNS request. Rejects responses, multi-question messages, and
/// non-INET classes.
pub fn parse_request(payload: &[u8]) -> Result<DnsRequest, DnsError> {
    if payload.len() < 12 {
        return Err(DnsError::Truncated);
    }
    let id = be16(payload, 0)?;
    let flags = be16(payload, 2)?;
    if flags & FLAG_QR != 0 {
        return Err(DnsError::UnexpectedQr);
    }
    if be16(payload, 4)? != 1 {
        return Err(DnsError::UnsupportedQuestion);
    }

    let (name, pos) = read_name(payload, 12)?;
    let qtype = be16(payload, pos)?;
    let qclass = be16(payload, pos + 2)?;
    if qclass != CLASS_IN {
        return Err(DnsError::UnsupportedQuestion);
    }
    Ok(DnsRequest { id, name, qtype })
}

/// Builds the wire form of a response to `req` according to `spec`.
///
/// On NXDOMAIN the question is echoed with no answers. Otherwise the answer
/// section carries the optional CNAME first, then one A record per address;
/// when a CNAME is present the A records are owned by its target.
pub fn build_response(req: &DnsRequest, spec: &DnsResponseSpec) -> Vec<u8> {
    let (rcode, addresses, cname) = match spec {
        DnsResponseSpec::NxDomain => (RCODE_NXDOMAIN, &[][..], None),
        DnsResponseSpec::Answer { addresses, cname } => {
            (RCODE_NO_ERROR, addresses.as_slice(), cname.as_deref())
        }
    };

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&req.id.to_be_bytes());
    out.extend_from_slice(&(FLAG_QR | FLAG_RD | FLAG_RA | u16::from(rcode)).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    let ancount = addresses.len() as u16 + u16::from(cname.is_some());
    out.extend_from_slice(&ancount.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // nscount
    out.extend_from_slice(&0u16.to_be_bytes()); // arcount

    // Question section, echoed.
    write_name(&req.name, &mut out);
    out.extend_from_slice(&req.qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());

    let a_owner = match cname {
        Some(target) => {
            let target = canonical_name(target);
            write_name(&req.name, &mut out);
            out.extend_from_slice(&TYPE_CNAME.to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
            out.extend_from_slice(&DNS_ANSWER_TTL.to_be_bytes());
            let mut rdata = Vec::new();
            write_name(&target, &mut rdata);
            out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(&rdata);
            target
        }
        None => req.name.clone(),
    };

    for addr in addresses {
        write_name(&a_owner, &mut out);
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&DNS_ANSWER_TTL.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&addr.octets());
    }
    out
}

/// Parses a response, collecting the rcode, the A addresses, and the first
/// CNAME target. Used by round-trip tests and measurement callers.
pub fn parse_response(payload: &[u8]) -> Result<DnsResponse, DnsError> {
    if payload.len() < 12 {
        return Err(DnsError::Truncated);
    }
    let id = be16(payload, 0)?;
    let flags = be16(payload, 2)?;
    if flags & FLAG_QR == 0 {
        return Err(DnsError::UnexpectedQr);
    }
    let rcode = (flags & 0x000f) as u8;
    let qdcount = be16(payload, 4)?;
    let ancount = be16(payload, 6)?;

    let mut pos = 12;
    for _ in 0..qdcount {
        let (_, next) = read_name(payload, pos)?;
        pos = next + 4; // qtype + qclass
    }

    let mut addresses = Vec::new();
    let mut cname = None;
    for _ in 0..ancount {
        let (_, next) = read_name(payload, pos)?;
        let rtype = be16(payload, next)?;
        let rdlen = usize::from(be16(payload, next + 8)?);
        let rdata_at = next + 10;
        let rdata = payload
            .get(rdata_at..rdata_at + rdlen)
            .ok_or(DnsError::Truncated)?;
        match rtype {
            TYPE_A => {
                if rdlen != 4 {
                    return Err(DnsError::Truncated);
                }
                addresses.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
            }
            TYPE_CNAME => {
                if cname.is_none() {
                    let (target, _) = read_name(payload, rdata_at)?;
                    cname = Some(target);
                }
            }
            _ => {}
        }
        pos = rdata_at + rdlen;
    }

    Ok(DnsResponse {
        id,
        rcode,
        addresses,
        cname,
    })
}

/// Builds the wire form of a single-question INET request. Used by tests and
/// measurement callers.
pub fn build_request(id: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&FLAG_RD.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    write_name(&canonical_name(name), &mut out);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    out
}
