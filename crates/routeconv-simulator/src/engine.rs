use crate::routing::{ProtocolModel, RouteTable, RoutingProtocol, compute_tables, connected_table};
use crate::topology::{Topology, TopologyError, network_of};
use crate::traffic::{CLIENT_PORT, CbrFlow, DISCARD_PORT, DropReason, FlowMonitor};
use anyhow::Context;
use rand::Rng;
use routeconv_abstract::{
    Callback, FiveTuple, FlowCounters, FlowId, NodeHandle, SimConfig, SimulationContext,
    VirtualTime,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TTL: u32 = 64;

pub enum EventType {
    Callback(Callback),
    RouteInstall {
        node: NodeHandle,
        generation: u64,
        table: RouteTable,
    },
    TrafficSend {
        flow: usize,
    },
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Callback(_) => f.write_str("Callback"),
            EventType::RouteInstall {
                node, generation, ..
            } => write!(f, "RouteInstall({node}, gen {generation})"),
            EventType::TrafficSend { flow } => write!(f, "TrafficSend({flow})"),
        }
    }
}

#[derive(Debug)]
struct Event {
    time: VirtualTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of link and routing events.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Outcome of pushing one packet through the network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delivery {
    Delivered { delay: Duration, hops: u32 },
    Dropped { at: NodeHandle, reason: DropReason },
}

/// Reference engine: a discrete-event scheduler over a static topology,
/// with routing tables driven by a [`ProtocolModel`] and a flow monitor.
pub struct Simulator {
    time: VirtualTime,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: rand::rngs::StdRng,

    topology: Topology,
    model: ProtocolModel,
    /// Tables currently used for forwarding, indexed by node.
    installed: Vec<RouteTable>,
    /// Bumped on every topology change; installs from older generations are stale.
    generation: u64,

    monitor: FlowMonitor,
    flows: Vec<CbrFlow>,

    /// Timeline of interface changes and route installs.
    pub link_events: Vec<LinkEventSummary>,
    pub dropped_by_reason: Vec<(DropReason, u64)>,
}

impl Simulator {
    /// Build an engine with connected routes only; full tables are installed
    /// after the protocol's startup delay.
    pub fn new(config: SimConfig, topology: Topology, protocol: RoutingProtocol) -> Self {
        use rand::SeedableRng;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);
        let model = ProtocolModel::for_protocol(protocol);
        let installed = topology
            .handles()
            .map(|node| connected_table(&topology, node))
            .collect();

        let mut sim = Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            topology,
            model,
            installed,
            generation: 0,
            monitor: FlowMonitor::new(),
            flows: Vec::new(),
            link_events: Vec::new(),
            dropped_by_reason: Vec::new(),
        };

        let startup = sim.model.startup_delay;
        for (index, table) in compute_tables(&sim.topology, &sim.model)
            .into_iter()
            .enumerate()
        {
            sim.push_event(
                startup,
                EventType::RouteInstall {
                    node: NodeHandle::new(index as u32),
                    generation: 0,
                    table,
                },
            );
        }
        sim
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn protocol(&self) -> RoutingProtocol {
        self.model.protocol
    }

    pub fn installed_table(&self, node: NodeHandle) -> Option<&RouteTable> {
        self.installed.get(node.index())
    }

    fn push_event(&mut self, time: VirtualTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Start a CBR UDP flow from `source` to `destination` using the traffic
    /// settings of the run configuration.
    pub fn add_udp_flow(
        &mut self,
        source: NodeHandle,
        destination: NodeHandle,
    ) -> Result<FlowId, TopologyError> {
        let address = |node: NodeHandle| {
            self.topology
                .primary_address(node)
                .ok_or_else(|| TopologyError::UnknownNode(node.to_string()))
        };
        let source_address = address(source)?;
        let destination_address = address(destination)?;

        let flow_id = self.monitor.classify(FiveTuple::udp(
            (source_address, CLIENT_PORT),
            (destination_address, DISCARD_PORT),
        ));
        self.flows.push(CbrFlow {
            flow_id,
            source,
            destination,
            destination_address,
            payload_size: self.config.udp_packet_size,
            interval: self.config.udp_interval.max(1),
            max_packets: self.config.udp_max_packets,
            sent: 0,
        });
        let flow = self.flows.len() - 1;
        self.push_event(self.config.udp_start_time, EventType::TrafficSend { flow });
        info!(
            flow_id,
            source = %self.topology.name(source),
            destination = %self.topology.name(destination),
            "UDP flow scheduled"
        );
        Ok(flow_id)
    }

    pub fn peek_next_event_time(&self) -> Option<VirtualTime> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> VirtualTime {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Process the next event. Returns `Ok(false)` if the queue is empty.
    pub fn step(&mut self) -> anyhow::Result<bool> {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return Ok(false),
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::Callback(callback) => {
                let time = self.time;
                callback(self).with_context(|| format!("Event at {time} ms failed"))?;
            }
            EventType::RouteInstall {
                node,
                generation,
                table,
            } => {
                if generation != self.generation {
                    debug!("Skipping stale route install for {}", node);
                    return Ok(true);
                }
                self.install(node, table);
            }
            EventType::TrafficSend { flow } => self.send_next(flow),
        }
        Ok(true)
    }

    /// Execute every event due at or before `stop`, then advance the clock
    /// to `stop`.
    pub fn run_until(&mut self, stop: VirtualTime) -> anyhow::Result<()> {
        while let Some(next) = self.peek_next_event_time() {
            if next > stop {
                break;
            }
            self.step()?;
        }
        self.time = self.time.max(stop);
        self.monitor.check_for_lost_packets();
        Ok(())
    }

    fn install(&mut self, node: NodeHandle, table: RouteTable) {
        let Some(slot) = self.installed.get_mut(node.index()) else {
            return;
        };
        if *slot == table {
            return;
        }
        let routes = table.len();
        *slot = table;
        let name = self.topology.name(node).to_string();
        debug!(node = %name, routes, "routing table installed");
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!("[{name}] routing table updated ({routes} routes)"),
        });
    }

    /// React to an interface change next to `origin`: recompute every table
    /// and install the ones that differ after the protocol's delay.
    fn on_topology_change(&mut self, origin: NodeHandle) {
        self.generation += 1;
        let hops = self.topology.hops_from(&[origin]);
        let tables = compute_tables(&self.topology, &self.model);

        for (index, table) in tables.into_iter().enumerate() {
            if self.installed.get(index) == Some(&table) {
                continue;
            }
            let at = self.time.saturating_add(self.model.install_delay(hops[index]));
            self.push_event(
                at,
                EventType::RouteInstall {
                    node: NodeHandle::new(index as u32),
                    generation: self.generation,
                    table,
                },
            );
        }
    }

    fn send_next(&mut self, index: usize) {
        let Some(flow) = self.flows.get_mut(index) else {
            return;
        };
        if flow.exhausted() {
            return;
        }
        flow.sent += 1;
        let (flow_id, source, destination_address, bytes) = (
            flow.flow_id,
            flow.source,
            flow.destination_address,
            flow.wire_size(),
        );
        let next = if flow.exhausted() {
            None
        } else {
            Some(self.time.saturating_add(flow.interval))
        };

        self.monitor.record_tx(flow_id, bytes);
        match self.forward(source, destination_address, bytes) {
            Delivery::Delivered { delay, .. } => self.monitor.record_rx(flow_id, bytes, delay),
            Delivery::Dropped { at, reason } => {
                debug!(flow_id, node = %self.topology.name(at), ?reason, "packet dropped");
                self.monitor.record_drop(flow_id);
                match self.dropped_by_reason.iter_mut().find(|(r, _)| *r == reason) {
                    Some((_, count)) => *count += 1,
                    None => self.dropped_by_reason.push((reason, 1)),
                }
            }
        }

        if let Some(at) = next {
            self.push_event(at, EventType::TrafficSend { flow: index });
        }
    }

    /// Walk a packet hop by hop through the installed tables.
    pub fn forward(&mut self, source: NodeHandle, destination: Ipv4Addr, bytes: u64) -> Delivery {
        if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
            return Delivery::Dropped {
                at: source,
                reason: DropReason::RandomLoss,
            };
        }

        let network = network_of(destination);
        let mut node = source;
        let mut delay = Duration::ZERO;
        for hops in 0..DEFAULT_TTL {
            if self.topology.owns_address(node, destination) {
                return Delivery::Delivered { delay, hops };
            }
            let dropped = |reason| Delivery::Dropped { at: node, reason };

            let Some(entry) = self
                .installed
                .get(node.index())
                .and_then(|table| table.lookup(network))
            else {
                return dropped(DropReason::NoRoute);
            };
            let Some(iface) = self.topology.interface(node, entry.interface) else {
                return dropped(DropReason::NoRoute);
            };
            let link = &self.topology.links()[iface.link];
            if !self.topology.link_is_up(link) {
                return dropped(DropReason::InterfaceDown);
            }
            delay += link.spec.transit_time(bytes);
            node = iface.peer;
        }
        Delivery::Dropped {
            at: node,
            reason: DropReason::TtlExpired,
        }
    }
}

impl SimulationContext for Simulator {
    fn now(&self) -> VirtualTime {
        self.time
    }

    fn schedule(&mut self, at: VirtualTime, callback: Callback) {
        if at < self.time {
            warn!(at, now = self.time, "callback scheduled in the past, running it now");
        }
        self.push_event(at.max(self.time), EventType::Callback(callback));
    }

    fn routing_table_text(&self, node: NodeHandle) -> String {
        self.installed
            .get(node.index())
            .map(|table| table.render(self.topology.name(node), self.model.protocol, self.time))
            .unwrap_or_default()
    }

    fn set_interface_up(&mut self, node: NodeHandle, interface: u32) {
        self.set_interface(node, interface, true);
    }

    fn set_interface_down(&mut self, node: NodeHandle, interface: u32) {
        self.set_interface(node, interface, false);
    }

    fn check_for_lost_packets(&mut self) {
        self.monitor.check_for_lost_packets();
    }

    fn flow_stats(&self) -> Vec<(FlowId, FlowCounters)> {
        self.monitor.stats()
    }

    fn classify_flow(&self, flow: FlowId) -> Option<FiveTuple> {
        self.monitor.five_tuple(flow)
    }

    fn node_address(&self, node: NodeHandle) -> Option<Ipv4Addr> {
        self.topology.primary_address(node)
    }

    fn node_name(&self, node: NodeHandle) -> String {
        self.topology.name(node).to_string()
    }
}

impl Simulator {
    fn set_interface(&mut self, node: NodeHandle, interface: u32, up: bool) {
        if !self.topology.set_interface_state(node, interface, up) {
            debug!(%node, interface, up, "interface state unchanged");
            return;
        }
        let state = if up { "UP" } else { "DOWN" };
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!(
                "[{}] interface {} {}",
                self.topology.name(node),
                interface,
                state
            ),
        });
        self.on_topology_change(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LinkSpec;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// H1 - A - B - H2
    fn chain() -> (Topology, [NodeHandle; 4]) {
        let mut topo = Topology::new();
        let h1 = topo.add_host("H1").unwrap();
        let a = topo.add_router("A").unwrap();
        let b = topo.add_router("B").unwrap();
        let h2 = topo.add_host("H2").unwrap();
        let spec = LinkSpec::new(1, Duration::from_millis(2), 5_000_000);
        topo.connect(h1, a, spec).unwrap();
        topo.connect(a, b, spec).unwrap();
        topo.connect(b, h2, spec).unwrap();
        (topo, [h1, a, b, h2])
    }

    #[test]
    fn same_time_callbacks_run_in_submission_order() {
        let (topo, _) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        let order = Rc::new(RefCell::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            sim.schedule(
                500,
                Box::new(move |_: &mut dyn SimulationContext| {
                    order.borrow_mut().push(label);
                    Ok(())
                }),
            );
        }
        sim.run_until(500).unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
        assert_eq!(sim.current_time(), 500);
    }

    #[test]
    fn callback_error_carries_time() {
        let (topo, _) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        sim.schedule(
            1_234,
            Box::new(|_: &mut dyn SimulationContext| anyhow::bail!("broken")),
        );
        let err = sim.run_until(2_000).unwrap_err();
        assert!(format!("{err:#}").contains("1234 ms"));
    }

    #[test]
    fn tables_appear_after_startup() {
        let (topo, [h1, _, _, _]) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        assert_eq!(sim.installed_table(h1).map(RouteTable::len), Some(1));

        sim.run_until(3_000).unwrap();
        assert_eq!(sim.installed_table(h1).map(RouteTable::len), Some(3));
        let text = sim.routing_table_text(h1);
        assert!(text.starts_with("Node: H1, Time: +3.000s"));
    }

    #[test]
    fn forwarding_accumulates_delay() {
        let (topo, [h1, _, _, h2]) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        sim.run_until(5_000).unwrap();

        let destination = sim.node_address(h2).unwrap();
        let delivery = sim.forward(h1, destination, 1052);
        let per_hop = Duration::from_millis(2) + Duration::from_nanos(1_683_200);
        assert_eq!(
            delivery,
            Delivery::Delivered {
                delay: per_hop * 3,
                hops: 3
            }
        );
    }

    #[test]
    fn link_down_drops_then_reroute_withdraws() {
        let (topo, [h1, a, b, h2]) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        sim.run_until(5_000).unwrap();
        let destination = sim.node_address(h2).unwrap();

        // A-B is link 1: interface 2 on A, 1 on B
        sim.set_interface_down(a, 2);
        sim.set_interface_down(b, 1);
        assert!(matches!(
            sim.forward(h1, destination, 100),
            Delivery::Dropped {
                reason: DropReason::InterfaceDown,
                ..
            }
        ));

        sim.run_until(10_000).unwrap();
        assert!(matches!(
            sim.forward(h1, destination, 100),
            Delivery::Dropped {
                at,
                reason: DropReason::NoRoute,
            } if at == h1
        ));
        assert!(sim.link_events.iter().any(|e| e.description.contains("interface 2 DOWN")));
    }

    #[test]
    fn stale_installs_are_discarded() {
        let (topo, [_, a, b, _]) = chain();
        let mut sim = Simulator::new(SimConfig::default(), topo, RoutingProtocol::Rip);
        sim.run_until(5_000).unwrap();
        let before = sim.installed_table(a).cloned();

        sim.set_interface_down(a, 2);
        sim.set_interface_down(b, 1);
        sim.run_until(5_200).unwrap();
        // back up before any install fired
        sim.set_interface_up(a, 2);
        sim.set_interface_up(b, 1);
        sim.run_until(20_000).unwrap();

        assert_eq!(sim.installed_table(a).cloned(), before);
    }

    #[test]
    fn udp_flow_is_counted() {
        let (topo, [h1, _, _, h2]) = chain();
        let config = SimConfig {
            udp_start_time: 10_000,
            udp_interval: 100,
            udp_max_packets: 5,
            ..SimConfig::default()
        };
        let mut sim = Simulator::new(config, topo, RoutingProtocol::Olsr);
        let id = sim.add_udp_flow(h1, h2).unwrap();
        sim.run_until(60_000).unwrap();

        let (flow_id, counters) = sim.flow_stats()[0];
        assert_eq!(flow_id, id);
        assert_eq!(counters.tx_packets, 5);
        assert_eq!(counters.rx_packets, 5);
        assert_eq!(counters.tx_bytes, 5 * 1052);
        assert_eq!(counters.jitter_sum, Duration::ZERO);
        assert_eq!(
            sim.classify_flow(id).map(|t| t.destination_port),
            Some(DISCARD_PORT)
        );
    }

    #[test]
    fn random_loss_is_seeded() {
        let run = || {
            let (topo, [h1, _, _, h2]) = chain();
            let config = SimConfig {
                udp_start_time: 5_000,
                udp_max_packets: 200,
                loss_rate: 0.3,
                seed: 11,
                ..SimConfig::default()
            };
            let mut sim = Simulator::new(config, topo, RoutingProtocol::Rip);
            sim.add_udp_flow(h1, h2).unwrap();
            sim.run_until(60_000).unwrap();
            sim.flow_stats()[0].1
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.lost_packets > 0);
        assert_eq!(first.lost_packets + first.rx_packets, 200);
    }
}
