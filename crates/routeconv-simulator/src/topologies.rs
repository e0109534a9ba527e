//! The three built-in experiments: node layout, link properties, and the
//! fault timeline each one runs by default.

use crate::topology::{LinkSpec, Topology, TopologyError};
use routeconv_abstract::{NodeHandle, SimConfig};
use routeconv_core::{
    CoreError, FaultAction, FaultScenario, FlowStatsAggregator, LinkRegistry, ReportScope,
    SamplingOptions,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    /// T - Router1 - Router2 - Router3 - R
    Linear,
    /// Two disjoint paths from T to R with cross links between them.
    Parallel,
    /// A chain with two expensive shortcuts out of Router1.
    Shortcut,
}

impl TopologyKind {
    pub const ALL: [TopologyKind; 3] = [
        TopologyKind::Linear,
        TopologyKind::Parallel,
        TopologyKind::Shortcut,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TopologyKind::Linear => "linear",
            TopologyKind::Parallel => "parallel",
            TopologyKind::Shortcut => "shortcut",
        }
    }
}

impl FromStr for TopologyKind {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopologyKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TopologyError::UnknownTopology(s.to_string()))
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A topology ready to be simulated, with its links registered for fault
/// injection.
#[derive(Debug, Clone)]
pub struct BuiltTopology {
    pub kind: TopologyKind,
    pub topology: Topology,
    pub registry: LinkRegistry,
    /// Traffic source and sink.
    pub source: NodeHandle,
    pub sink: NodeHandle,
    /// Nodes whose routing tables are tracked.
    pub monitored: Vec<NodeHandle>,
    /// Links failed by the default timeline.
    pub faults: Vec<(NodeHandle, NodeHandle)>,
}

struct Builder {
    topology: Topology,
    registry: LinkRegistry,
}

impl Builder {
    fn new() -> Self {
        Self {
            topology: Topology::new(),
            registry: LinkRegistry::new(),
        }
    }

    fn link(&mut self, a: NodeHandle, b: NodeHandle, spec: LinkSpec) -> Result<(), TopologyError> {
        let (ia, ib) = self.topology.connect(a, b, spec)?;
        self.registry
            .register_link(a, b, ia, ib)
            .map_err(|_| TopologyError::SelfLink(self.topology.name(a).to_string()))
    }
}

fn fast(cost: u32) -> LinkSpec {
    LinkSpec::new(cost, Duration::from_nanos(6_560), 100_000_000)
}

fn slow(cost: u32, rate_bps: u64) -> LinkSpec {
    LinkSpec::new(cost, Duration::from_nanos(13_120), rate_bps)
}

pub fn build(kind: TopologyKind) -> Result<BuiltTopology, TopologyError> {
    let mut b = Builder::new();
    let t = b.topology.add_host("T")?;
    let r1 = b.topology.add_router("Router1")?;
    let r2 = b.topology.add_router("Router2")?;
    let r3 = b.topology.add_router("Router3")?;

    let (r, faults) = match kind {
        TopologyKind::Linear => {
            let r = b.topology.add_host("R")?;
            let p2p = LinkSpec::new(1, Duration::from_millis(2), 5_000_000);
            b.link(t, r1, p2p)?;
            b.link(r1, r2, p2p)?;
            b.link(r2, r3, p2p)?;
            b.link(r3, r, p2p)?;
            (r, vec![(t, r1)])
        }
        TopologyKind::Parallel => {
            let r4 = b.topology.add_router("Router4")?;
            let r = b.topology.add_host("R")?;
            b.link(t, r1, fast(1))?;
            b.link(r1, r2, fast(1))?;
            b.link(r2, r, fast(1))?;
            b.link(t, r3, fast(1))?;
            b.link(r3, r4, fast(1))?;
            b.link(r4, r, fast(1))?;
            b.link(r1, r4, slow(2, 5_000_000))?;
            b.link(r3, r2, slow(2, 5_000_000))?;
            (r, vec![(r1, r2), (r3, r4)])
        }
        TopologyKind::Shortcut => {
            let r4 = b.topology.add_router("Router4")?;
            let r = b.topology.add_host("R")?;
            b.link(t, r1, fast(1))?;
            b.link(r1, r2, fast(1))?;
            b.link(r2, r3, fast(1))?;
            b.link(r3, r4, fast(1))?;
            b.link(r4, r, fast(1))?;
            b.link(r1, r3, slow(4, 5_000_000))?;
            b.link(r1, r4, slow(3, 1_000_000))?;
            (r, vec![(r1, r4)])
        }
    };

    let monitored = b.topology.routers();
    Ok(BuiltTopology {
        kind,
        topology: b.topology,
        registry: b.registry,
        source: t,
        sink: r,
        monitored,
        faults,
    })
}

pub fn build_by_name(name: &str) -> Result<BuiltTopology, TopologyError> {
    build(name.parse()?)
}

impl BuiltTopology {
    pub fn empty_scenario(&self, config: &SimConfig) -> FaultScenario {
        FaultScenario::new(
            self.registry.clone(),
            FlowStatsAggregator::new(config.simulation_duration()),
        )
    }

    /// The timeline the experiment runs without a scenario file.
    ///
    /// Linear and parallel track three windows around the failure. Shortcut
    /// only measures the initial convergence, stopped when the link fails.
    pub fn default_scenario(&self, config: &SimConfig) -> Result<FaultScenario, CoreError> {
        let mut scenario = self.empty_scenario(config);
        let down = config.link_down_time;
        let up = config.link_up_time;
        let end = config.simulation_time;

        for &(a, b) in &self.faults {
            scenario.link_failure(a, b, down, up);
        }

        match self.kind {
            TopologyKind::Linear | TopologyKind::Parallel => {
                let options = SamplingOptions::from_config(config);
                let windows = [("before", 0, down), ("during", down, up), ("after", up, end)];
                for (label, start, stop) in windows {
                    scenario.add_window(label, &self.monitored, options)?;
                    scenario.window_between(label, start, stop);
                }
            }
            TopologyKind::Shortcut => {
                scenario.add_single_shot_window(
                    "initial",
                    &self.monitored,
                    config.sample_period,
                    down,
                )?;
            }
        }

        match self.kind {
            TopologyKind::Linear => {
                for time in [down, up, end] {
                    scenario.at(
                        time,
                        FaultAction::StatsReport {
                            scope: ReportScope::Between(self.source, self.sink),
                        },
                    );
                }
            }
            TopologyKind::Parallel | TopologyKind::Shortcut => {
                scenario.at(
                    end,
                    FaultAction::StatsReport {
                        scope: ReportScope::AllFlows,
                    },
                );
            }
        }
        Ok(scenario)
    }
}
