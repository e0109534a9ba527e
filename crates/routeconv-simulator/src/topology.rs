use routeconv_abstract::NodeHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Unknown node '{0}'")]
    UnknownNode(String),
    #[error("Node '{0}' is defined twice")]
    DuplicateNode(String),
    #[error("Cannot connect '{0}' to itself")]
    SelfLink(String),
    #[error("Unknown topology '{0}' (expected linear, parallel or shortcut)")]
    UnknownTopology(String),
    #[error("Unknown routing protocol '{0}' (expected rip or olsr)")]
    UnknownProtocol(String),
    #[error("Out of /24 subnets after {0} links")]
    SubnetsExhausted(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Host,
    Router,
}

/// Physical properties of a point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkSpec {
    /// Routing metric, used by distance-vector protocols.
    pub cost: u32,
    pub delay: Duration,
    pub rate_bps: u64,
}

impl LinkSpec {
    pub fn new(cost: u32, delay: Duration, rate_bps: u64) -> Self {
        Self {
            cost,
            delay,
            rate_bps,
        }
    }

    /// Serialization plus propagation time of `bytes` over this link.
    pub fn transit_time(&self, bytes: u64) -> Duration {
        let serialization = if self.rate_bps == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(bytes * 8 * 1_000_000_000 / self.rate_bps)
        };
        self.delay + serialization
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub address: Ipv4Addr,
    pub link: usize,
    pub peer: NodeHandle,
    pub peer_interface: u32,
    pub up: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Interface `i` is stored at `interfaces[i - 1]`; index 0 is the loopback.
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: NodeHandle,
    pub b: NodeHandle,
    pub interface_a: u32,
    pub interface_b: u32,
    pub network: Ipv4Addr,
    pub spec: LinkSpec,
}

/// Network address of `address` in a /24.
pub fn network_of(address: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = address.octets();
    Ipv4Addr::new(a, b, c, 0)
}

/// Nodes and point-to-point links with `10.0.<n>.0/24` addressing.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<Node>,
    links: Vec<Link>,
    names: HashMap<String, NodeHandle>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, name: &str) -> Result<NodeHandle, TopologyError> {
        self.add_node(name, NodeKind::Host)
    }

    pub fn add_router(&mut self, name: &str) -> Result<NodeHandle, TopologyError> {
        self.add_node(name, NodeKind::Router)
    }

    fn add_node(&mut self, name: &str, kind: NodeKind) -> Result<NodeHandle, TopologyError> {
        if self.names.contains_key(name) {
            return Err(TopologyError::DuplicateNode(name.to_string()));
        }
        let handle = NodeHandle::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            interfaces: Vec::new(),
        });
        self.names.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Create a link between `a` and `b` and return the interface index on
    /// each side.
    pub fn connect(
        &mut self,
        a: NodeHandle,
        b: NodeHandle,
        spec: LinkSpec,
    ) -> Result<(u32, u32), TopologyError> {
        if a == b {
            return Err(TopologyError::SelfLink(self.name(a).to_string()));
        }
        for node in [a, b] {
            if self.node(node).is_none() {
                return Err(TopologyError::UnknownNode(node.to_string()));
            }
        }
        let index = self.links.len();
        let third = u8::try_from(index).map_err(|_| TopologyError::SubnetsExhausted(index))?;
        let network = Ipv4Addr::new(10, 0, third, 0);

        let interface_a = self.nodes[a.index()].interfaces.len() as u32 + 1;
        let interface_b = self.nodes[b.index()].interfaces.len() as u32 + 1;

        self.nodes[a.index()].interfaces.push(Interface {
            address: Ipv4Addr::new(10, 0, third, 1),
            link: index,
            peer: b,
            peer_interface: interface_b,
            up: true,
        });
        self.nodes[b.index()].interfaces.push(Interface {
            address: Ipv4Addr::new(10, 0, third, 2),
            link: index,
            peer: a,
            peer_interface: interface_a,
            up: true,
        });
        self.links.push(Link {
            a,
            b,
            interface_a,
            interface_b,
            network,
            spec,
        });
        Ok((interface_a, interface_b))
    }

    pub fn lookup(&self, name: &str) -> Result<NodeHandle, TopologyError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()))
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle.index())
    }

    pub fn name(&self, handle: NodeHandle) -> &str {
        self.node(handle).map(|n| n.name.as_str()).unwrap_or("?")
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        (0..self.nodes.len()).map(|i| NodeHandle::new(i as u32))
    }

    pub fn routers(&self) -> Vec<NodeHandle> {
        self.handles()
            .filter(|h| self.nodes[h.index()].kind == NodeKind::Router)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn interface(&self, node: NodeHandle, interface: u32) -> Option<&Interface> {
        let slot = usize::try_from(interface).ok()?.checked_sub(1)?;
        self.node(node)?.interfaces.get(slot)
    }

    /// Set the administrative state of one interface. Returns `false` when
    /// the interface does not exist or already had that state.
    pub fn set_interface_state(&mut self, node: NodeHandle, interface: u32, up: bool) -> bool {
        let Some(slot) = (interface as usize).checked_sub(1) else {
            return false;
        };
        match self
            .nodes
            .get_mut(node.index())
            .and_then(|n| n.interfaces.get_mut(slot))
        {
            Some(iface) if iface.up != up => {
                iface.up = up;
                true
            }
            _ => false,
        }
    }

    /// Address of interface 1.
    pub fn primary_address(&self, node: NodeHandle) -> Option<Ipv4Addr> {
        self.interface(node, 1).map(|i| i.address)
    }

    /// Whether `address` is configured on any interface of `node`.
    pub fn owns_address(&self, node: NodeHandle, address: Ipv4Addr) -> bool {
        self.node(node)
            .is_some_and(|n| n.interfaces.iter().any(|i| i.address == address))
    }

    /// Usable when both ends are up.
    pub fn link_is_up(&self, link: &Link) -> bool {
        let up = |node, iface| self.interface(node, iface).is_some_and(|i| i.up);
        up(link.a, link.interface_a) && up(link.b, link.interface_b)
    }

    /// Hop count from every node to the nearest of `origins`, ignoring link
    /// state. Unreachable nodes get `u32::MAX`.
    pub fn hops_from(&self, origins: &[NodeHandle]) -> Vec<u32> {
        let mut hops = vec![u32::MAX; self.nodes.len()];
        let mut frontier = std::collections::VecDeque::new();
        for origin in origins {
            if let Some(slot) = hops.get_mut(origin.index()) {
                *slot = 0;
                frontier.push_back(*origin);
            }
        }
        while let Some(node) = frontier.pop_front() {
            let next = hops[node.index()] + 1;
            for iface in &self.nodes[node.index()].interfaces {
                if hops[iface.peer.index()] == u32::MAX {
                    hops[iface.peer.index()] = next;
                    frontier.push_back(iface.peer);
                }
            }
        }
        hops
    }
}
