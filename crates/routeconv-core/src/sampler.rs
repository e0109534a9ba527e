use routeconv_abstract::{NodeHandle, SimulationContext, VirtualTime};
use serde::Serialize;
use tracing::debug;

/// Drop the first line of a routing table rendering.
///
/// The first line embeds the current time, so it differs on every sample even
/// when the routes are identical.
pub fn strip_volatile_header(text: &str) -> &str {
    match text.find('\n') {
        Some(pos) => &text[pos + 1..],
        None => text,
    }
}

/// Observed state of one node's routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingSnapshot {
    pub node: NodeHandle,
    pub table: String,
    pub last_change_ms: VirtualTime,
}

/// Watches a single node's routing table for changes.
#[derive(Debug, Clone)]
pub struct RoutingStateSampler {
    node: NodeHandle,
    table: String,
    last_change: VirtualTime,
    active: bool,
}

impl RoutingStateSampler {
    /// An inactive sampler with no baseline; call [`reset`](Self::reset) to
    /// begin watching.
    pub fn new(node: NodeHandle) -> Self {
        Self {
            node,
            table: String::new(),
            last_change: 0,
            active: false,
        }
    }

    /// Current table of `node` without the volatile header line.
    pub fn capture(ctx: &dyn SimulationContext, node: NodeHandle) -> String {
        strip_volatile_header(&ctx.routing_table_text(node)).to_string()
    }

    /// Take a new baseline. The baseline itself is not a change.
    pub fn reset(&mut self, ctx: &dyn SimulationContext) {
        self.table = Self::capture(ctx, self.node);
        self.last_change = ctx.now();
        self.active = true;
    }

    /// Sample once. Returns `true` if the table differed from the stored one.
    pub fn tick(&mut self, ctx: &dyn SimulationContext) -> bool {
        if !self.active {
            return false;
        }

        let table = Self::capture(ctx, self.node);
        if table == self.table {
            return false;
        }

        let now = ctx.now();
        debug!(
            node = %ctx.node_name(self.node),
            time_ms = now,
            "routing table changed"
        );
        self.table = table;
        self.last_change = now;
        true
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn node(&self) -> NodeHandle {
        self.node
    }

    pub fn last_change(&self) -> VirtualTime {
        self.last_change
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            node: self.node,
            table: self.table.clone(),
            last_change_ms: self.last_change,
        }
    }
}
