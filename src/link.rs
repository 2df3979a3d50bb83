//! A link: two opposing forwarding pipelines between a pair of NICs.
//!
//! The link owns both NICs and both pipeline tasks. Construction wraps each
//! NIC with its configured decorator (PCAP dumping), hands the DPI engine to
//! both directions with the matching direction tag (left→right is the
//! client-to-server side), and picks the cheapest pipeline variant each
//! direction allows. Closing the link closes both NICs, which terminates
//! both tasks in bounded time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::dpi::{DpiDirection, DpiEngine};
use crate::nic::{Nic, NicWrapper};
use crate::pipeline::{self, DirectionConfig, PipelineStats, StatsSnapshot};

/// Configuration of one link. The numeric shape serializes; the DPI engine
/// and the NIC decorators are runtime-only handles.
#[derive(Default, Serialize, Deserialize)]
pub struct LinkConfig {
    pub left_to_right_delay: Duration,
    pub left_to_right_plr: f64,
    pub right_to_left_delay: Duration,
    pub right_to_left_plr: f64,

    /// Base PRNG seed; each direction derives its own independent seed from
    /// it, keeping loss and jitter draws reproducible.
    pub seed: Option<u64>,

    /// DPI engine inspecting traffic on this link. Left→right frames are
    /// inspected as client-to-server, right→left as server-to-client.
    #[serde(skip)]
    pub dpi_engine: Option<Arc<DpiEngine>>,

    /// Decorator applied to the left NIC before wiring.
    #[serde(skip)]
    pub left_nic_wrapper: Option<NicWrapper>,

    /// Decorator applied to the right NIC before wiring.
    #[serde(skip)]
    pub right_nic_wrapper: Option<NicWrapper>,
}

/// How long `close` waits for a pipeline task before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("closed", &self.closed)
            .field("left_to_right", &self.left_to_right)
            .field("right_to_left", &self.right_to_left)
            .finish_non_exhaustive()
    }
}

/// A bidirectional emulated link. Owns its NICs and forwarding tasks.
pub struct Link {
    left: Arc<dyn Nic>,
    right: Arc<dyn Nic>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    left_to_right: Arc<PipelineStats>,
    right_to_left: Arc<PipelineStats>,
}

impl Link {
    /// Wires `left` and `right` together and starts both pipelines.
    pub fn new(left: Arc<dyn Nic>, right: Arc<dyn Nic>, mut config: LinkConfig) -> Link {
        let left = match config.left_nic_wrapper.take() {
            Some(wrap) => wrap(left),
            None => left,
        };
        let right = match config.right_nic_wrapper.take() {
            Some(wrap) => wrap(right),
            None => right,
        };

        let left_to_right = Arc::new(PipelineStats::default());
        let right_to_left = Arc::new(PipelineStats::default());

        let ltr = pipeline::spawn(
            Arc::clone(&left),
            Arc::clone(&right),
            DirectionConfig {
                delay: config.left_to_right_delay,
                plr: config.left_to_right_plr,
                seed: config.seed,
                dpi: config.dpi_engine.clone(),
                dpi_direction: DpiDirection::ClientToServer,
            },
            Arc::clone(&left_to_right),
        );
        let rtl = pipeline::spawn(
            Arc::clone(&right),
            Arc::clone(&left),
            DirectionConfig {
                delay: config.right_to_left_delay,
                plr: config.right_to_left_plr,
                seed: config.seed.map(|s| s.wrapping_add(1)),
                dpi: config.dpi_engine.clone(),
                dpi_direction: DpiDirection::ServerToClient,
            },
            Arc::clone(&right_to_left),
        );

        tracing::info!(
            left = left.name(),
            right = right.name(),
            "link established"
        );
        Link {
            left,
            right,
            tasks: Mutex::new(vec![ltr, rtl]),
            closed: AtomicBool::new(false),
            left_to_right,
            right_to_left,
        }
    }

    pub fn left_nic(&self) -> &Arc<dyn Nic> {
        &self.left
    }

    pub fn right_nic(&self) -> &Arc<dyn Nic> {
        &self.right
    }

    pub fn left_to_right_stats(&self) -> StatsSnapshot {
        self.left_to_right.snapshot()
    }

    pub fn right_to_left_stats(&self) -> StatsSnapshot {
        self.right_to_left.snapshot()
    }

    /// Closes both NICs and waits for both pipelines to exit. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.left.close();
        self.right.close();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for mut task in tasks {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::warn!("pipeline did not exit in time, aborting");
                task.abort();
            }
        }
        tracing::info!(
            left = self.left.name(),
            right = self.right.name(),
            "link closed"
        );
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Close paths normally run through `close`; this is the last-resort
        // cleanup when the link is dropped without it.
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.left.close();
            self.right.close();
            for task in self.tasks.lock().unwrap().drain(..) {
                task.abort();
            }
        }
    }
}
