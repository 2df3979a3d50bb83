//! SNI extraction from a TLS ClientHello (RFC 8446 wire format).
//!
//! The walk is strictly bounds-checked: every declared length is validated
//! against the remaining buffer before it is consumed, so arbitrary payloads
//! can be fed to [`extract_server_name`] safely.

use crate::error::TlsError;

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXTENSION_SERVER_NAME: u16 = 0;
const SNI_TYPE_HOST_NAME: u8 = 0;

/// A forward-only bounds-checked reader over the handshake bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(TlsError::Malformed);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, TlsError> {
        let b = self.take(3)?;
        Ok((usize::from(b[0]) << 16) | (usize::from(b[1]) << 8) | usize::from(b[2]))
    }
}

/// Extracts the first `host_name` entry of the `server_name` extension from
/// a TLS ClientHello carried in `payload`.
pub fn extract_server_name(payload: &[u8]) -> Result<String, TlsError> {
    if payload.len() < 5 || payload[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(TlsError::NotHandshake);
    }
    let record_len = usize::from(u16::from_be_bytes([payload[3], payload[4]]));
    if payload.len() < 5 + record_len {
        return Err(TlsError::Malformed);
    }

    let mut cur = Cursor::new(&payload[5..5 + record_len]);
    if cur.u8()? != HANDSHAKE_CLIENT_HELLO {
        return Err(TlsError::NotClientHello);
    }
    let body_len = cur.u24()?;
    let mut cur = Cursor::new(cur.take(body_len)?);

    cur.take(2)?; // legacy_version
    cur.take(32)?; // random
    let session_id_len = usize::from(cur.u8()?);
    cur.take(session_id_len)?;
    let cipher_suites_len = usize::from(cur.u16()?);
    cur.take(cipher_suites_len)?;
    let compression_len = usize::from(cur.u8()?);
    cur.take(compression_len)?;

    if cur.remaining() == 0 {
        // ClientHello without extensions.
        return Err(TlsError::NoServerName);
    }
    let extensions_len = usize::from(cur.u16()?);
    let mut exts = Cursor::new(cur.take(extensions_len)?);

    while exts.remaining() > 0 {
        let ext_type = exts.u16()?;
        let ext_len = usize::from(exts.u16()?);
        let ext_data = exts.take(ext_len)?;
        if ext_type != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut sni = Cursor::new(ext_data);
        let list_len = usize::from(sni.u16()?);
        let mut entries = Cursor::new(sni.take(list_len)?);
        while entries.remaining() > 0 {
            let name_type = entries.u8()?;
            let name_len = usize::from(entries.u16()?);
            let name = entries.take(name_len)?;
            if name_type == SNI_TYPE_HOST_NAME {
                return String::from_utf8(name.to_vec()).map_err(|_| TlsError::Malformed);
            }
        }
        return Err(TlsError::NoServerName);
    }
    Err(TlsError::NoServerName)
}

#[cfg(test)]
pub(crate) fn client_hello_with_sni(sni: &str) -> Vec<u8> {
    // server_name extension
    let name = sni.as_bytes();
    let mut entry = vec![SNI_TYPE_HOST_NAME];
    entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
    entry.extend_from_slice(name);
    let mut ext_data = (entry.len() as u16).to_be_bytes().to_vec();
    ext_data.extend_from_slice(&entry);
    let mut extensions = EXTENSION_SERVER_NAME.to_be_bytes().to_vec();
    extensions.extend_from_slice(&(ext_data.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&ext_data);

    // ClientHello body
    let mut body = vec![0x03, 0x03]; // legacy_version TLS 1.2
    body.extend_from_slice(&[0u8; 32]); // random
    body.push(0); // session_id
    body.extend_from_slice(&2u16.to_be_bytes()); // one cipher suite
    body.extend_from_slice(&[0x13, 0x01]);
    body.push(1); // one compression method
    body.push(0);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    // Handshake + record headers
    let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
    handshake.extend_from_slice(&[
        (body.len() >> 16) as u8,
        (body.len() >> 8) as u8,
        body.len() as u8,
    ]);
    handshake.extend_from_slice(&body);

    let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
