use routeconv_abstract::{FiveTuple, FlowCounters, FlowId, NodeHandle, VirtualTime};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// IPv4 plus UDP header bytes added to every payload on the wire.
pub const IP_UDP_OVERHEAD: u64 = 28;
pub const CLIENT_PORT: u16 = 49153;
pub const DISCARD_PORT: u16 = 9;

/// A constant-bit-rate UDP source.
#[derive(Debug, Clone)]
pub struct CbrFlow {
    pub flow_id: FlowId,
    pub source: NodeHandle,
    pub destination: NodeHandle,
    pub destination_address: Ipv4Addr,
    pub payload_size: u32,
    pub interval: VirtualTime,
    pub max_packets: u64,
    pub sent: u64,
}

impl CbrFlow {
    pub fn wire_size(&self) -> u64 {
        u64::from(self.payload_size) + IP_UDP_OVERHEAD
    }

    pub fn exhausted(&self) -> bool {
        self.sent >= self.max_packets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NoRoute,
    InterfaceDown,
    TtlExpired,
    RandomLoss,
}

#[derive(Debug, Clone)]
struct MonitoredFlow {
    tuple: FiveTuple,
    counters: FlowCounters,
    last_delay: Option<Duration>,
    /// Dropped in the network but not yet counted as lost.
    overdue: u64,
}

/// Per-flow packet accounting, keyed by five-tuple. Flow ids start at 1.
#[derive(Debug, Clone, Default)]
pub struct FlowMonitor {
    flows: Vec<MonitoredFlow>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the flow for `tuple`, creating it on first sight.
    pub fn classify(&mut self, tuple: FiveTuple) -> FlowId {
        if let Some(pos) = self.flows.iter().position(|f| f.tuple == tuple) {
            return pos as FlowId + 1;
        }
        self.flows.push(MonitoredFlow {
            tuple,
            counters: FlowCounters::default(),
            last_delay: None,
            overdue: 0,
        });
        self.flows.len() as FlowId
    }

    fn flow_mut(&mut self, id: FlowId) -> Option<&mut MonitoredFlow> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.flows.get_mut(index)
    }

    pub fn record_tx(&mut self, id: FlowId, bytes: u64) {
        if let Some(flow) = self.flow_mut(id) {
            flow.counters.tx_packets += 1;
            flow.counters.tx_bytes += bytes;
        }
    }

    pub fn record_rx(&mut self, id: FlowId, bytes: u64, delay: Duration) {
        if let Some(flow) = self.flow_mut(id) {
            let counters = &mut flow.counters;
            counters.rx_packets += 1;
            counters.rx_bytes += bytes;
            counters.delay_sum += delay;
            if let Some(previous) = flow.last_delay {
                counters.jitter_sum += delay.abs_diff(previous);
            }
            flow.last_delay = Some(delay);
        }
    }

    pub fn record_drop(&mut self, id: FlowId) {
        if let Some(flow) = self.flow_mut(id) {
            flow.overdue += 1;
        }
    }

    /// Fold packets dropped inside the network into the lost counters.
    pub fn check_for_lost_packets(&mut self) {
        for flow in &mut self.flows {
            flow.counters.lost_packets += flow.overdue;
            flow.overdue = 0;
        }
    }

    pub fn stats(&self) -> Vec<(FlowId, FlowCounters)> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, f)| (i as FlowId + 1, f.counters))
            .collect()
    }

    pub fn five_tuple(&self, id: FlowId) -> Option<FiveTuple> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.flows.get(index).map(|f| f.tuple)
    }
}
