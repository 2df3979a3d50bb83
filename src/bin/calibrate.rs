//! Link-model calibration driver.
//!
//! Pushes a synthetic frame load across a PPP topology built from in-memory
//! host NICs and reports per-direction pipeline statistics plus the achieved
//! goodput as JSON. Usage:
//!
//! ```text
//! calibrate [FRAMES] [DELAY_MS] [PLR] [SEED] [LEFT_ADDR] [RIGHT_ADDR]
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use netfab::link::LinkConfig;
use netfab::packet::{DissectedPacket, Ipv4Header, NetworkHeader, TcpHeader, TransportHeader};
use netfab::topology::{parse_host_addr, PppTopology, QueueStackFactory};

fn arg<T: std::str::FromStr>(n: usize, default: T) -> T {
    std::env::args()
        .nth(n)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// One MTU-sized TCP datagram left → right, reused for the whole run.
fn probe_datagram(left: Ipv4Addr, right: Ipv4Addr) -> Vec<u8> {
    DissectedPacket {
        network: NetworkHeader::V4(Ipv4Header {
            tos: 0,
            identification: 1,
            flags_fragment: 0x4000,
            ttl: 64,
            protocol: 6,
            src: left,
            dst: right,
            options: Vec::new(),
        }),
        transport: TransportHeader::Tcp(TcpHeader {
            src_port: 50_000,
            dst_port: 443,
            seq: 0,
            ack: 0,
            flags: 0x10,
            window: 0xffff,
            urgent: 0,
            options: Vec::new(),
        }),
        payload: vec![0xa5; 1460],
    }
    .serialize()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netfab=info".into()),
        )
        .init();

    let frames: u64 = arg(1, 2_000);
    let delay_ms: u64 = arg(2, 10);
    let plr: f64 = arg(3, 0.01);
    let seed: u64 = arg(4, 1);

    let left_addr = parse_host_addr(&std::env::args().nth(5).unwrap_or_else(|| "10.0.0.1".into()))?;
    let right_addr =
        parse_host_addr(&std::env::args().nth(6).unwrap_or_else(|| "10.0.0.2".into()))?;
    let config = LinkConfig {
        left_to_right_delay: Duration::from_millis(delay_ms),
        left_to_right_plr: plr,
        right_to_left_delay: Duration::from_millis(delay_ms),
        right_to_left_plr: plr,
        seed: Some(seed),
        ..LinkConfig::default()
    };
    let topo = PppTopology::new(QueueStackFactory, left_addr, right_addr, config)?;

    tracing::info!(frames, delay_ms, plr, "starting calibration run");
    let probe = probe_datagram(left_addr, right_addr);
    let started = std::time::Instant::now();

    let mut offered = 0u64;
    let mut received = 0u64;
    while offered < frames {
        // Offer in modest bursts so the drop-tail reflects queueing, not an
        // artificial ingress flood.
        for _ in 0..16 {
            if offered == frames {
                break;
            }
            if topo.left().send(probe.clone()).is_ok() {
                offered += 1;
            }
        }
        while topo.right().recv().is_ok() {
            received += 1;
        }
        tokio::time::sleep(Duration::from_micros(1_920)).await;
    }

    // Drain the tail: delay + jitter + one slot per in-flight frame.
    tokio::time::sleep(Duration::from_millis(delay_ms + 50)).await;
    while topo.right().recv().is_ok() {
        received += 1;
    }
    let elapsed = started.elapsed();

    let forward = topo.link().left_to_right_stats();
    let report = serde_json::json!({
        "offered_frames": offered,
        "received_frames": received,
        "elapsed_ms": elapsed.as_millis() as u64,
        "goodput_mbit_s":
            (forward.bytes_forwarded as f64 * 8.0) / elapsed.as_secs_f64() / 1e6,
        "empirical_loss":
            forward.frames_dropped_loss as f64 / forward.frames_read.max(1) as f64,
        "left_to_right": forward,
        "right_to_left": topo.link().right_to_left_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    topo.close().await;
    Ok(())
}
