//! Instrumentation and fault-injection layer.
//!
//! Everything here runs on top of a [`SimulationContext`]: routing tables are
//! sampled and diffed over virtual time to measure convergence, links are
//! toggled at scheduled instants, and flow counters are reduced into report
//! metrics. No component keeps its own clock; all timing goes through the
//! engine's scheduler.

pub mod error;
pub mod flow_stats;
pub mod link_control;
pub mod registry;
pub mod sampler;
pub mod scenario;
pub mod timer;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::CoreError;
pub use flow_stats::{
    AggregateStats, FlowFilter, FlowMetrics, FlowRecord, FlowReportEntry, FlowStatsAggregator,
    StatsReport,
};
pub use link_control::{LinkController, LinkState};
pub use registry::{LinkEndpoint, LinkRecord, LinkRegistry};
pub use sampler::{RoutingSnapshot, RoutingStateSampler};
pub use scenario::{FaultAction, FaultScenario, ReportScope, ScenarioHandle, ScenarioOutcome};
pub use timer::{RepeatingTimer, TimerHandle};
pub use tracker::{ConvergenceResult, ConvergenceTracker, SamplingOptions};

pub use routeconv_abstract::SimulationContext;
