//! Routing reaction model.
//!
//! No routing messages are exchanged. Each protocol is reduced to how it
//! chooses paths and how long it takes for a topology change to reach each
//! node's forwarding table.

use crate::topology::{Topology, TopologyError};
use routeconv_abstract::{NodeHandle, VirtualTime};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProtocol {
    Rip,
    Olsr,
}

impl FromStr for RoutingProtocol {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rip" => Ok(RoutingProtocol::Rip),
            "olsr" => Ok(RoutingProtocol::Olsr),
            _ => Err(TopologyError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for RoutingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingProtocol::Rip => f.write_str("rip"),
            RoutingProtocol::Olsr => f.write_str("olsr"),
        }
    }
}

pub fn protocol_by_name(name: &str) -> Result<RoutingProtocol, TopologyError> {
    name.parse()
}

/// Timing and metric behaviour of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolModel {
    pub protocol: RoutingProtocol,
    /// When the first full tables appear.
    pub startup_delay: VirtualTime,
    /// Until the nodes next to a change react.
    pub detection_delay: VirtualTime,
    /// Extra delay per hop of distance from the change.
    pub per_hop_delay: VirtualTime,
    /// OLSR ignores configured metrics and counts hops.
    pub uses_link_cost: bool,
}

impl ProtocolModel {
    pub fn for_protocol(protocol: RoutingProtocol) -> Self {
        match protocol {
            // triggered updates on interface events
            RoutingProtocol::Rip => Self {
                protocol,
                startup_delay: 3_000,
                detection_delay: 1_000,
                per_hop_delay: 500,
                uses_link_cost: true,
            },
            // neighbour loss is only noticed when HELLOs stop arriving
            RoutingProtocol::Olsr => Self {
                protocol,
                startup_delay: 6_000,
                detection_delay: 6_000,
                per_hop_delay: 250,
                uses_link_cost: false,
            },
        }
    }

    /// When a node `hops` away from a change installs its new table.
    pub fn install_delay(&self, hops: u32) -> VirtualTime {
        let hops = if hops == u32::MAX { 0 } else { u64::from(hops) };
        self.detection_delay.saturating_add(hops.saturating_mul(self.per_hop_delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub interface: u32,
    pub metric: u32,
}

/// A node's forwarding table, sorted by destination network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteTable {
    pub entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn lookup(&self, network: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries
            .binary_search_by_key(&network, |e| e.destination)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rendering in the engine's "print routing table" format. The first
    /// line carries the current time.
    pub fn render(&self, node_name: &str, protocol: RoutingProtocol, now: VirtualTime) -> String {
        let mut out = format!(
            "Node: {node_name}, Time: +{:.3}s, Protocol: {protocol}\n",
            now as f64 / 1000.0
        );
        out.push_str("Destination     Gateway         Iface  Metric\n");
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<15} {:<15} {:<6} {}\n",
                entry.destination.to_string(),
                entry.gateway.to_string(),
                entry.interface,
                entry.metric
            ));
        }
        out
    }
}

/// Routes over connected, up interfaces only.
pub fn connected_table(topology: &Topology, node: NodeHandle) -> RouteTable {
    let mut entries: Vec<RouteEntry> = topology
        .node(node)
        .into_iter()
        .flat_map(|n| n.interfaces.iter().enumerate())
        .filter(|(_, iface)| iface.up)
        .map(|(slot, iface)| RouteEntry {
            destination: topology.links()[iface.link].network,
            gateway: Ipv4Addr::UNSPECIFIED,
            interface: slot as u32 + 1,
            metric: 0,
        })
        .collect();
    entries.sort();
    RouteTable { entries }
}

#[derive(Clone, Copy)]
struct FirstHop {
    interface: u32,
    gateway: Ipv4Addr,
}

/// Shortest-path tables for every node over the links that are currently up.
///
/// Ties keep the first path found, exploring interfaces in index order.
pub fn compute_tables(topology: &Topology, model: &ProtocolModel) -> Vec<RouteTable> {
    topology
        .handles()
        .map(|source| table_for(topology, model, source))
        .collect()
}

fn table_for(topology: &Topology, model: &ProtocolModel, source: NodeHandle) -> RouteTable {
    let count = topology.node_count();
    let mut dist = vec![u32::MAX; count];
    let mut first_hop: Vec<Option<FirstHop>> = vec![None; count];
    let mut heap = BinaryHeap::new();
    dist[source.index()] = 0;
    heap.push(Reverse((0u32, source)));

    while let Some(Reverse((d, node))) = heap.pop() {
        if d > dist[node.index()] {
            continue;
        }
        let Some(current) = topology.node(node) else {
            continue;
        };
        for (slot, iface) in current.interfaces.iter().enumerate() {
            let link = &topology.links()[iface.link];
            if !topology.link_is_up(link) {
                continue;
            }
            let weight = if model.uses_link_cost { link.spec.cost } else { 1 };
            let candidate = d.saturating_add(weight);
            let peer = iface.peer.index();
            if candidate < dist[peer] {
                dist[peer] = candidate;
                first_hop[peer] = if node == source {
                    topology
                        .interface(iface.peer, iface.peer_interface)
                        .map(|peer_iface| FirstHop {
                            interface: slot as u32 + 1,
                            gateway: peer_iface.address,
                        })
                } else {
                    first_hop[node.index()]
                };
                heap.push(Reverse((candidate, iface.peer)));
            }
        }
    }

    let connected = connected_table(topology, source);
    let mut entries = connected.entries.clone();
    for link in topology.links() {
        if connected.lookup(link.network).is_some() {
            continue;
        }
        // the subnet is reachable through whichever end still has it up
        let best = [(link.a, link.interface_a), (link.b, link.interface_b)]
            .into_iter()
            .filter(|(node, iface)| topology.interface(*node, *iface).is_some_and(|i| i.up))
            .filter(|(node, _)| dist[node.index()] != u32::MAX)
            .min_by_key(|(node, _)| (dist[node.index()], *node));

        if let Some((node, _)) = best
            && let Some(hop) = first_hop[node.index()]
        {
            let metric = if model.uses_link_cost {
                dist[node.index()] + link.spec.cost
            } else {
                dist[node.index()] + 1
            };
            entries.push(RouteEntry {
                destination: link.network,
                gateway: hop.gateway,
                interface: hop.interface,
                metric,
            });
        }
    }
    entries.sort();
    RouteTable { entries }
}
