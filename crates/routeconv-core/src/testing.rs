//! A scripted engine for unit tests: routing tables, interfaces and flow
//! counters are set directly by the test, and the scheduler is a plain
//! time-ordered heap.

use routeconv_abstract::{
    Callback, FiveTuple, FlowCounters, FlowId, NodeHandle, SimulationContext, VirtualTime,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv4Addr;

enum Action {
    Callback(Callback),
    SetTable { node: NodeHandle, body: String },
}

struct Queued {
    time: VirtualTime,
    id: u64,
    action: Action,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    time: VirtualTime,
    queue: BinaryHeap<Queued>,
    next_id: u64,
    tables: HashMap<NodeHandle, String>,
    interfaces_down: Vec<(NodeHandle, u32)>,
    addresses: HashMap<NodeHandle, Ipv4Addr>,
    flows: Vec<(FlowId, FiveTuple, FlowCounters)>,
    pub(crate) lost_checks: usize,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, time: VirtualTime, action: Action) {
        self.queue.push(Queued {
            time,
            id: self.next_id,
            action,
        });
        self.next_id += 1;
    }

    pub(crate) fn set_table(&mut self, node: NodeHandle, body: &str) {
        self.tables.insert(node, body.to_string());
    }

    /// Change the table of `node` at virtual time `at`.
    pub(crate) fn set_table_at(&mut self, at: VirtualTime, node: NodeHandle, body: &str) {
        self.push(
            at,
            Action::SetTable {
                node,
                body: body.to_string(),
            },
        );
    }

    pub(crate) fn set_address(&mut self, node: NodeHandle, address: Ipv4Addr) {
        self.addresses.insert(node, address);
    }

    pub(crate) fn add_flow(&mut self, id: FlowId, tuple: FiveTuple, counters: FlowCounters) {
        self.flows.push((id, tuple, counters));
    }

    pub(crate) fn is_interface_up(&self, node: NodeHandle, interface: u32) -> bool {
        !self.interfaces_down.contains(&(node, interface))
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Execute every queued action due at or before `until`.
    pub(crate) fn run_until(&mut self, until: VirtualTime) -> anyhow::Result<()> {
        while let Some(next) = self.queue.peek() {
            if next.time > until {
                break;
            }
            let Some(Queued { time, action, .. }) = self.queue.pop() else {
                break;
            };
            self.time = time;
            match action {
                Action::Callback(callback) => callback(self)?,
                Action::SetTable { node, body } => {
                    self.tables.insert(node, body);
                }
            }
        }
        self.time = self.time.max(until);
        Ok(())
    }
}

impl SimulationContext for ScriptedEngine {
    fn now(&self) -> VirtualTime {
        self.time
    }

    fn schedule(&mut self, at: VirtualTime, callback: Callback) {
        self.push(at, Action::Callback(callback));
    }

    fn routing_table_text(&self, node: NodeHandle) -> String {
        let body = self.tables.get(&node).map(String::as_str).unwrap_or("");
        format!("Node: {node}, Time: +{}ms\n{body}", self.time)
    }

    fn set_interface_up(&mut self, node: NodeHandle, interface: u32) {
        self.interfaces_down.retain(|entry| *entry != (node, interface));
    }

    fn set_interface_down(&mut self, node: NodeHandle, interface: u32) {
        if self.is_interface_up(node, interface) {
            self.interfaces_down.push((node, interface));
        }
    }

    fn check_for_lost_packets(&mut self) {
        self.lost_checks += 1;
    }

    fn flow_stats(&self) -> Vec<(FlowId, FlowCounters)> {
        self.flows.iter().map(|(id, _, c)| (*id, *c)).collect()
    }

    fn classify_flow(&self, flow: FlowId) -> Option<FiveTuple> {
        self.flows
            .iter()
            .find(|(id, _, _)| *id == flow)
            .map(|(_, tuple, _)| *tuple)
    }

    fn node_address(&self, node: NodeHandle) -> Option<Ipv4Addr> {
        self.addresses.get(&node).copied()
    }
}
