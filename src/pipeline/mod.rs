//! One-way frame forwarding between two NICs.
//!
//! Three variants exist, picked per link direction at construction time:
//!
//! - **fast**: pure pass-through for directions with no delay, no loss, and
//!   no DPI;
//! - **with-delay**: a priority queue whose timer wakes just in time for the
//!   earliest deadline; no loss, no DPI;
//! - **full**: the complete model — egress queueing with drop-tail,
//!   slot-paced transmission, DPI at transmit, a loss draw realized at
//!   receive, propagation delay and jitter.
//!
//! Every variant terminates when its readable NIC reports `StackClosed`.
//! All per-frame errors are absorbed with debug logs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::config::{
    BITS_PER_MICROSECOND, EGRESS_QUEUE_CAP_BYTES, MAX_JITTER_MICROS, SLOT_DURATION,
};
use crate::dpi::{DpiDirection, DpiEngine};
use crate::error::NicError;
use crate::frame::{Frame, FrameFlags};
use crate::nic::Nic;

/// Per-direction forwarding counters, updated by the pipeline task and read
/// by tests and the calibration driver.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_read: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub frames_dropped_queue: AtomicU64,
    pub frames_dropped_loss: AtomicU64,
    pub write_errors: AtomicU64,
    pub bytes_forwarded: AtomicU64,
}

/// A plain copy of [`PipelineStats`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub frames_forwarded: u64,
    pub frames_dropped_queue: u64,
    pub frames_dropped_loss: u64,
    pub write_errors: u64,
    pub bytes_forwarded: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped_queue: self.frames_dropped_queue.load(Ordering::Relaxed),
            frames_dropped_loss: self.frames_dropped_loss.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Configuration of one link direction.
pub struct DirectionConfig {
    /// One-way propagation delay.
    pub delay: Duration,
    /// Packet-loss rate in [0, 1].
    pub plr: f64,
    /// Seed for this direction's PRNG; random when absent.
    pub seed: Option<u64>,
    /// DPI engine inspecting frames of this direction, if any.
    pub dpi: Option<Arc<DpiEngine>>,
    /// Direction tag handed to the DPI engine.
    pub dpi_direction: DpiDirection,
}

impl Default for DirectionConfig {
    fn default() -> DirectionConfig {
        DirectionConfig {
            delay: Duration::ZERO,
            plr: 0.0,
            seed: None,
            dpi: None,
            dpi_direction: DpiDirection::ClientToServer,
        }
    }
}

impl DirectionConfig {
    fn is_passthrough(&self) -> bool {
        self.delay.is_zero() && self.plr == 0.0 && self.dpi.is_none()
    }

    fn is_delay_only(&self) -> bool {
        self.plr == 0.0 && self.dpi.is_none()
    }
}

/// Spawns the forwarding task for one direction, choosing the cheapest
/// variant the configuration allows.
pub fn spawn(
    reader: Arc<dyn Nic>,
    writer: Arc<dyn Nic>,
    config: DirectionConfig,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    let label = format!("{} -> {}", reader.name(), writer.name());
    if config.is_passthrough() {
        tracing::debug!(%label, "starting fast pipeline");
        tokio::spawn(run_fast(reader, writer, stats))
    } else if config.is_delay_only() {
        tracing::debug!(%label, delay = ?config.delay, "starting with-delay pipeline");
        tokio::spawn(run_with_delay(reader, writer, config.delay, stats))
    } else {
        tracing::debug!(%label, delay = ?config.delay, plr = config.plr, "starting full pipeline");
        tokio::spawn(run_full(reader, writer, config, stats))
    }
}

/// Writes one frame downstream, absorbing flow-control errors.
fn deliver(writer: &Arc<dyn Nic>, frame: Frame, stats: &PipelineStats) {
    let len = frame.len() as u64;
    match writer.write_frame(frame) {
        Ok(()) => {
            stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            stats.bytes_forwarded.fetch_add(len, Ordering::Relaxed);
        }
        Err(err) => {
            stats.write_errors.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(nic = writer.name(), "write failed: {err}");
        }
    }
}

/// Pass-through forwarder: frames cross the link unchanged and immediately.
pub async fn run_fast(reader: Arc<dyn Nic>, writer: Arc<dyn Nic>, stats: Arc<PipelineStats>) {
    loop {
        loop {
            match reader.read_frame() {
                Ok(mut frame) => {
                    stats.frames_read.fetch_add(1, Ordering::Relaxed);
                    frame.deadline = None;
                    deliver(&writer, frame, &stats);
                }
                Err(NicError::NoPacket) => break,
                Err(_) => return,
            }
        }
        tokio::select! {
            _ = reader.frame_available().notified() => {}
            _ = reader.stack_closed().notified() => return,
        }
    }
}

/// Heap entry ordered by deadline, FIFO among equal deadlines.
struct Scheduled {
    deadline: Instant,
    seq: u64,
    frame: Frame,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Scheduled) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Scheduled) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Scheduled) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Delay-only forwarder: every frame is delivered `delay` after it was read,
/// in read order.
pub async fn run_with_delay(
    reader: Arc<dyn Nic>,
    writer: Arc<dyn Nic>,
    delay: Duration,
    stats: Arc<PipelineStats>,
) {
    let mut pending: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        loop {
            match reader.read_frame() {
                Ok(frame) => {
                    stats.frames_read.fetch_add(1, Ordering::Relaxed);
                    pending.push(Reverse(Scheduled {
                        deadline: Instant::now() + delay,
                        seq,
                        frame,
                    }));
                    seq += 1;
                }
                Err(NicError::NoPacket) => break,
                Err(_) => return,
            }
        }

        let now = Instant::now();
        while pending
            .peek()
            .is_some_and(|Reverse(head)| head.deadline <= now)
        {
            let Reverse(Scheduled { mut frame, .. }) = pending.pop().unwrap();
            frame.deadline = None;
            deliver(&writer, frame, &stats);
        }

        match pending.peek() {
            Some(Reverse(head)) => {
                tokio::select! {
                    _ = sleep_until(head.deadline) => {}
                    _ = reader.frame_available().notified() => {}
                    _ = reader.stack_closed().notified() => return,
                }
            }
            None => {
                tokio::select! {
                    _ = reader.frame_available().notified() => {}
                    _ = reader.stack_closed().notified() => return,
                }
            }
        }
    }
}

/// The full link model: egress queueing with drop-tail, one transmission
/// per slot, DPI at transmit, loss realized at receive, propagation delay
/// plus uniform jitter.
pub async fn run_full(
    reader: Arc<dyn Nic>,
    writer: Arc<dyn Nic>,
    config: DirectionConfig,
    stats: Arc<PipelineStats>,
) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    // Frames queued for transmission, ordered by transmit deadline.
    let mut outgoing: VecDeque<Frame> = VecDeque::new();
    let mut queued_bytes: usize = 0;
    // Frames on the wire, ordered by arrival deadline.
    let mut inflight: VecDeque<Frame> = VecDeque::new();

    let mut ticker = interval(SLOT_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // Ingress: drain the reader into the egress queue. The transmit
        // deadline encodes sequential transmission of everything queued
        // ahead of this frame.
        loop {
            match reader.read_frame() {
                Ok(mut frame) => {
                    stats.frames_read.fetch_add(1, Ordering::Relaxed);
                    if queued_bytes + frame.len() > EGRESS_QUEUE_CAP_BYTES {
                        stats.frames_dropped_queue.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(nic = reader.name(), "egress queue full, dropping frame");
                        continue;
                    }
                    let serialization =
                        Duration::from_micros(queued_bytes as u64 * 8 / BITS_PER_MICROSECOND);
                    frame.deadline = Some(Instant::now() + serialization);
                    queued_bytes += frame.len();
                    outgoing.push_back(frame);
                }
                Err(NicError::NoPacket) => break,
                Err(_) => return,
            }
        }

        tokio::select! {
            _ = reader.stack_closed().notified() => return,
            _ = reader.frame_available().notified() => continue,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();

        // Transmit: at most one frame leaves the queue per slot. The sort is
        // stable, so equal deadlines keep arrival order.
        outgoing.make_contiguous().sort_by_key(|f| f.deadline);
        if outgoing
            .front()
            .is_some_and(|head| head.deadline.is_some_and(|d| d <= now))
        {
            let mut frame = outgoing.pop_front().unwrap();
            queued_bytes -= frame.len();

            let mut frame_plr = 0.0;
            let mut policy_delay = Duration::ZERO;
            if let Some(engine) = &config.dpi {
                if let Some(policy) = engine.inspect(&frame.payload, config.dpi_direction) {
                    frame.flags |= policy.flags;
                    frame_plr = policy.plr;
                    policy_delay = policy.delay;
                    frame.spoofed.extend(policy.spoofed);
                }
            }

            // The loss draw happens at TX but the drop is realized at RX, so
            // a lost frame still occupies its slot.
            if rng.gen::<f64>() < config.plr + frame_plr {
                frame.flags.insert(FrameFlags::DROP);
            }

            let jitter = Duration::from_micros(rng.gen_range(0..MAX_JITTER_MICROS));
            frame.deadline = Some(now + config.delay + jitter + policy_delay);
            inflight.push_back(frame);
        }

        // Receive: at most one due frame is realized per slot.
        inflight.make_contiguous().sort_by_key(|f| f.deadline);
        if inflight
            .front()
            .is_some_and(|head| head.deadline.is_some_and(|d| d <= now))
        {
            let mut frame = inflight.pop_front().unwrap();
            frame.deadline = None;
            if frame.flags.contains(FrameFlags::DROP) {
                stats.frames_dropped_loss.fetch_add(1, Ordering::Relaxed);
            } else {
                deliver(&writer, frame, &stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::nic::{SinkNic, StaticReadableNic};

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|i| Frame::new(vec![i as u8; 64])).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_pipeline_is_identity() {
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), frames(10)));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let task = tokio::spawn(run_fast(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            stats.clone(),
        ));
        tokio::task::yield_now().await;
        reader.close();
        task.await.unwrap();

        let out = writer.collected();
        assert_eq!(out.len(), 10, "every frame must come out exactly once");
        for (i, frame) in out.iter().enumerate() {
            assert_eq!(frame.payload, vec![i as u8; 64], "order must be preserved");
            assert!(frame.deadline.is_none(), "deadlines must not leak downstream");
        }
        assert_eq!(stats.snapshot().frames_forwarded, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_delay_pipeline_delivers_after_delay() {
        let delay = Duration::from_millis(10);
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), frames(3)));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let start = Instant::now();
        let task = tokio::spawn(run_with_delay(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            delay,
            stats.clone(),
        ));

        // Nothing may arrive before the one-way delay has elapsed.
        tokio::time::sleep(Duration::from_millis(9)).await;
        assert_eq!(writer.collected_count(), 0, "frames must not arrive early");

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(writer.collected_count(), 3);
        assert!(start.elapsed() >= delay);

        reader.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pipeline_zero_plr_forwards_everything() {
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), frames(50)));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let config = DirectionConfig {
            delay: Duration::from_millis(1),
            plr: 0.0,
            seed: Some(42),
            ..DirectionConfig::default()
        };
        let task = tokio::spawn(run_full(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            config,
            stats.clone(),
        ));

        // 50 frames at one TX and one RX per 120 µs slot, plus 1 ms of
        // propagation and up to 1 ms jitter: 100 ms of virtual time is ample.
        tokio::time::sleep(Duration::from_millis(100)).await;
        reader.close();
        task.await.unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_read, 50);
        assert_eq!(snap.frames_forwarded, 50, "zero PLR must not lose frames");
        assert_eq!(snap.frames_dropped_loss, 0);
        assert_eq!(writer.collected_count(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pipeline_certain_loss_drops_everything() {
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), frames(20)));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let config = DirectionConfig {
            plr: 1.0,
            seed: Some(7),
            ..DirectionConfig::default()
        };
        let task = tokio::spawn(run_full(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            config,
            stats.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        reader.close();
        task.await.unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_dropped_loss, 20, "PLR 1.0 must drop every frame");
        assert_eq!(writer.collected_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pipeline_enforces_queue_cap() {
        // Far more bytes than the 64 KiB egress cap, all readable at once.
        let big = (0..200).map(|_| Frame::new(vec![0u8; 1500])).collect();
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), big));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let config = DirectionConfig {
            seed: Some(3),
            ..DirectionConfig::default()
        };
        // plr 0 but a queue has to exist: force the full variant directly.
        let task = tokio::spawn(run_full(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            config,
            stats.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        reader.close();
        task.await.unwrap();

        let snap = stats.snapshot();
        assert!(
            snap.frames_dropped_queue > 0,
            "sustained over-capacity ingress must hit the drop-tail"
        );
        assert_eq!(
            snap.frames_forwarded + snap.frames_dropped_queue,
            200,
            "every frame is either forwarded or dropped at ingress"
        );
        // 64 KiB cap / 1500-byte frames: at most 43 frames ever queued.
        assert!(snap.frames_forwarded <= 43 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_picks_a_variant_and_terminates_on_close() {
        let reader = Arc::new(StaticReadableNic::new("r0", addr(1), frames(1)));
        let writer = Arc::new(SinkNic::new("w0", addr(2)));
        let stats = Arc::new(PipelineStats::default());

        let task = spawn(
            reader.clone() as Arc<dyn Nic>,
            writer.clone() as Arc<dyn Nic>,
            DirectionConfig::default(),
            stats.clone(),
        );
        tokio::task::yield_now().await;
        assert_eq!(writer.collected_count(), 1);

        reader.close();
        task.await.unwrap();
    }
}
