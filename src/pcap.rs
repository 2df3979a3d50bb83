//! Classic-pcap capture of link traffic.
//!
//! [`PcapWriter`] emits the legacy pcap file format with `LINKTYPE_IPV4`,
//! so every record is one raw IP datagram. [`PcapDumperNic`] is a
//! pass-through NIC decorator that records everything crossing the wrapped
//! endpoint; capture failures are logged and never disturb traffic.

use std::io::{self, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use byteorder::{LittleEndian, WriteBytesExt};
use tokio::sync::Notify;

use crate::config::{PCAP_RECORD_SNAP, PCAP_SNAPLEN};
use crate::error::NicError;
use crate::frame::Frame;
use crate::nic::{Nic, NicWrapper};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const LINKTYPE_IPV4: u32 = 228;

/// Writer for the classic pcap file format, one IP datagram per record.
pub struct PcapWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapWriter<W> {
    /// Writes the file header and returns the writer.
    pub fn new(mut out: W) -> io::Result<PcapWriter<W>> {
        out.write_u32::<LittleEndian>(PCAP_MAGIC)?;
        out.write_u16::<LittleEndian>(PCAP_VERSION_MAJOR)?;
        out.write_u16::<LittleEndian>(PCAP_VERSION_MINOR)?;
        out.write_i32::<LittleEndian>(0)?; // thiszone
        out.write_u32::<LittleEndian>(0)?; // sigfigs
        out.write_u32::<LittleEndian>(PCAP_SNAPLEN)?;
        out.write_u32::<LittleEndian>(LINKTYPE_IPV4)?;
        Ok(PcapWriter { out })
    }

    /// Appends one record. The stored payload snaps to
    /// min(`PCAP_RECORD_SNAP`, actual); the original length is recorded in
    /// full.
    pub fn write_datagram(&mut self, payload: &[u8]) -> io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let capture_len = payload.len().min(PCAP_RECORD_SNAP);

        self.out.write_u32::<LittleEndian>(now.as_secs() as u32)?;
        self.out.write_u32::<LittleEndian>(now.subsec_micros())?;
        self.out.write_u32::<LittleEndian>(capture_len as u32)?;
        self.out.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.out.write_all(&payload[..capture_len])?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Pass-through decorator recording every frame read from or written to the
/// wrapped NIC.
pub struct PcapDumperNic<W: Write + Send> {
    inner: Arc<dyn Nic>,
    writer: Mutex<PcapWriter<W>>,
}

impl<W: Write + Send> PcapDumperNic<W> {
    pub fn new(inner: Arc<dyn Nic>, writer: PcapWriter<W>) -> PcapDumperNic<W> {
        PcapDumperNic {
            inner,
            writer: Mutex::new(writer),
        }
    }

    fn record(&self, payload: &[u8]) {
        let mut writer = self.writer.lock().unwrap();
        if let Err(err) = writer.write_datagram(payload) {
            tracing::warn!(nic = self.inner.name(), "pcap record failed: {err}");
        }
    }
}

impl<W: Write + Send + 'static> Nic for PcapDumperNic<W> {
    fn frame_available(&self) -> &Notify {
        self.inner.frame_available()
    }

    fn stack_closed(&self) -> &Notify {
        self.inner.stack_closed()
    }

    fn read_frame(&self) -> Result<Frame, NicError> {
        let frame = self.inner.read_frame()?;
        self.record(&frame.payload);
        Ok(frame)
    }

    fn write_frame(&self, frame: Frame) -> Result<(), NicError> {
        self.record(&frame.payload);
        self.inner.write_frame(frame)
    }

    fn close(&self) {
        if let Err(err) = self.writer.lock().unwrap().flush() {
            tracing::warn!(nic = self.inner.name(), "pcap flush failed: {err}");
        }
        self.inner.close();
    }

    fn ip_addr(&self) -> IpAddr {
        self.inner.ip_addr()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Builds a link NIC wrapper that dumps traffic to the file at `path`.
pub fn file_dumper(path: impl AsRef<Path>) -> anyhow::Result<NicWrapper> {
    let path = path.as_ref().to_owned();
    let file = std::fs::File::create(&path)
        .with_context(|| format!("creating pcap file {}", path.display()))?;
    let writer = PcapWriter::new(io::BufWriter::new(file)).context("writing pcap header")?;
    Ok(Box::new(move |nic| Arc::new(PcapDumperNic::new(nic, writer))))
}
