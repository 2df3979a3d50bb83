//! Topology assembly: PPP (two stacks, one link) and star (N stacks, one
//! router).
//!
//! The user-space TCP/IP stack is an external collaborator. It enters the
//! fabric through [`StackFactory`], which builds one NIC-shaped host
//! endpoint per address, and receives the fabric-wide [`CertAuthority`]
//! handle so TLS can work across hosts. The topology owns every link (and
//! transitively every NIC), the router, and the CA; closing it closes each
//! link exactly once.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;

use crate::config::DEFAULT_MTU;
use crate::error::TopologyError;
use crate::link::{Link, LinkConfig};
use crate::nic::{Nic, QueueNic};
use crate::router::Router;

/// Parses a dotted-quad host address for callers configuring topologies
/// from text (CLI flags, serialized scenarios).
pub fn parse_host_addr(raw: &str) -> Result<Ipv4Addr, TopologyError> {
    raw.parse()
        .map_err(|_| TopologyError::NotIpAddress(raw.to_string()))
}

/// The fabric-wide fake certification authority, shared by every stack so
/// that servers can mint leaf certificates clients trust. Issuing the
/// certificates is the stack collaborator's job; the fabric only owns and
/// distributes the handle.
#[derive(Debug)]
pub struct CertAuthority {
    common_name: String,
}

impl CertAuthority {
    pub fn new(common_name: impl Into<String>) -> CertAuthority {
        CertAuthority {
            common_name: common_name.into(),
        }
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }
}

impl Default for CertAuthority {
    fn default() -> CertAuthority {
        CertAuthority::new("netfab root CA")
    }
}

/// Everything a stack needs to come up inside the fabric.
pub struct StackConfig {
    pub addr: Ipv4Addr,
    pub resolver_addr: Ipv4Addr,
    pub mtu: usize,
    /// Interface name allocated by the owning topology.
    pub nic_name: String,
    pub ca: Arc<CertAuthority>,
}

/// Builds user-space host stacks on demand. The produced stack presents the
/// NIC surface to its link; everything else about it is out of the fabric's
/// scope.
pub trait StackFactory {
    type Stack: Nic + 'static;

    fn new_stack(&self, config: &StackConfig) -> anyhow::Result<Arc<Self::Stack>>;
}

/// Factory producing in-memory [`QueueNic`] endpoints. Stands in for the
/// real user-space stack in tests and the calibration driver.
#[derive(Debug, Default)]
pub struct QueueStackFactory;

impl StackFactory for QueueStackFactory {
    type Stack = QueueNic;

    fn new_stack(&self, config: &StackConfig) -> anyhow::Result<Arc<QueueNic>> {
        Ok(Arc::new(QueueNic::new(
            config.nic_name.clone(),
            IpAddr::V4(config.addr),
        )))
    }
}

/// A star topology: one router in the middle, one link per host.
pub struct StarTopology<F: StackFactory> {
    factory: F,
    router: Router,
    ca: Arc<CertAuthority>,
    links: Mutex<Vec<Arc<Link>>>,
    addrs: Mutex<HashSet<Ipv4Addr>>,
    nic_names: AtomicU64,
    closed: AtomicBool,
}

impl<F: StackFactory> StarTopology<F> {
    pub fn new(factory: F) -> StarTopology<F> {
        StarTopology {
            factory,
            router: Router::new(),
            ca: Arc::new(CertAuthority::default()),
            links: Mutex::new(Vec::new()),
            addrs: Mutex::new(HashSet::new()),
            nic_names: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn ca(&self) -> Arc<CertAuthority> {
        Arc::clone(&self.ca)
    }

    /// Allocates the next interface name in this topology's arena.
    fn next_nic_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.nic_names.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a stack bound to `addr`, a router port, and the link between
    /// them, and installs the route. The topology retains ownership of the
    /// stack; the returned handle is for the caller's application traffic.
    pub fn add_host(
        &self,
        addr: Ipv4Addr,
        resolver_addr: Ipv4Addr,
        link_config: LinkConfig,
    ) -> anyhow::Result<Arc<F::Stack>> {
        {
            let mut addrs = self.addrs.lock().unwrap();
            if !addrs.insert(addr) {
                return Err(TopologyError::DuplicateAddr(IpAddr::V4(addr)).into());
            }
        }

        let stack = self
            .factory
            .new_stack(&StackConfig {
                addr,
                resolver_addr,
                mtu: DEFAULT_MTU,
                nic_name: self.next_nic_name("eth"),
                ca: Arc::clone(&self.ca),
            })
            .with_context(|| format!("building host stack for {addr}"))?;

        let port = self
            .router
            .new_port(self.next_nic_name("port"), IpAddr::V4(addr));
        self.router.add_route(addr, &port);

        let link = Link::new(
            Arc::clone(&stack) as Arc<dyn Nic>,
            port as Arc<dyn Nic>,
            link_config,
        );
        self.links.lock().unwrap().push(Arc::new(link));

        tracing::info!(host = %addr, "host attached to star topology");
        Ok(stack)
    }

    /// Closes every link exactly once, which transitively closes every
    /// stack NIC and router port. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let links: Vec<Arc<Link>> = self.links.lock().unwrap().drain(..).collect();
        for link in links {
            link.close().await;
        }
        tracing::info!("star topology closed");
    }
}

/// A point-to-point topology: two stacks joined by one link, sharing a CA.
pub struct PppTopology<F: StackFactory> {
    left: Arc<F::Stack>,
    right: Arc<F::Stack>,
    ca: Arc<CertAuthority>,
    link: Arc<Link>,
    closed: AtomicBool,
}

impl<F: StackFactory> std::fmt::Debug for PppTopology<F>
where
    F::Stack: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PppTopology")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("ca", &self.ca)
            .field("link", &self.link)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<F: StackFactory> PppTopology<F> {
    /// Builds both stacks and the link between them. Each side resolves DNS
    /// through its peer.
    pub fn new(
        factory: F,
        left_addr: Ipv4Addr,
        right_addr: Ipv4Addr,
        link_config: LinkConfig,
    ) -> anyhow::Result<PppTopology<F>> {
        if left_addr == right_addr {
            return Err(TopologyError::DuplicateAddr(IpAddr::V4(left_addr)).into());
        }
        let ca = Arc::new(CertAuthority::default());

        let left = factory
            .new_stack(&StackConfig {
                addr: left_addr,
                resolver_addr: right_addr,
                mtu: DEFAULT_MTU,
                nic_name: "eth0".into(),
                ca: Arc::clone(&ca),
            })
            .context("building left stack")?;
        let right = factory
            .new_stack(&StackConfig {
                addr: right_addr,
                resolver_addr: left_addr,
                mtu: DEFAULT_MTU,
                nic_name: "eth1".into(),
                ca: Arc::clone(&ca),
            })
            .context("building right stack")?;

        let link = Link::new(
            Arc::clone(&left) as Arc<dyn Nic>,
            Arc::clone(&right) as Arc<dyn Nic>,
            link_config,
        );
        Ok(PppTopology {
            left,
            right,
            ca,
            link: Arc::new(link),
            closed: AtomicBool::new(false),
        })
    }

    pub fn left(&self) -> &Arc<F::Stack> {
        &self.left
    }

    pub fn right(&self) -> &Arc<F::Stack> {
        &self.right
    }

    pub fn ca(&self) -> Arc<CertAuthority> {
        Arc::clone(&self.ca)
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Closes the link (and with it both stacks). Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.link.close().await;
        tracing::info!("ppp topology closed");
    }
}
