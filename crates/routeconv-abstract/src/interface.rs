use crate::flow::{FiveTuple, FlowCounters, FlowId};
use crate::node::NodeHandle;
use crate::VirtualTime;
use std::net::Ipv4Addr;

/// Work queued on the engine's scheduler.
///
/// A callback runs exactly once, to completion, at its due time. Returning an
/// error aborts the whole run.
pub type Callback = Box<dyn FnOnce(&mut dyn SimulationContext) -> anyhow::Result<()>>;

/// The capabilities the simulation engine provides to the instrumentation layer.
///
/// Everything here is executed on the engine's single thread, from inside a
/// scheduled callback or during setup before the run starts.
pub trait SimulationContext {
    /// Current virtual time in milliseconds.
    fn now(&self) -> VirtualTime;

    /// Queue `callback` for execution at the absolute virtual time `at`.
    /// Callbacks due at the same time run in submission order.
    fn schedule(&mut self, at: VirtualTime, callback: Callback);

    /// Current routing table rendering for `node`. The first line is volatile
    /// (it embeds the current time).
    fn routing_table_text(&self, node: NodeHandle) -> String;

    /// Administratively enable an interface.
    fn set_interface_up(&mut self, node: NodeHandle, interface: u32);

    /// Administratively disable an interface.
    fn set_interface_down(&mut self, node: NodeHandle, interface: u32);

    /// Account packets that are overdue as lost before counters are read.
    fn check_for_lost_packets(&mut self) {}

    /// Snapshot of every monitored flow's counters.
    fn flow_stats(&self) -> Vec<(FlowId, FlowCounters)>;

    /// Resolve a flow identifier to its five-tuple.
    fn classify_flow(&self, flow: FlowId) -> Option<FiveTuple>;

    /// Primary address of a node (the address of its first interface).
    fn node_address(&self, node: NodeHandle) -> Option<Ipv4Addr>;

    /// Human readable name for logs.
    fn node_name(&self, node: NodeHandle) -> String {
        node.to_string()
    }
}
