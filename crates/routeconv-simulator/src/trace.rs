use routeconv_abstract::SimConfig;
use routeconv_core::{ConvergenceResult, StatsReport};
use serde::Serialize;
use std::fmt;

use crate::engine::LinkEventSummary;
use crate::routing::RoutingProtocol;
use crate::traffic::DropReason;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub topology: String,
    pub protocol: RoutingProtocol,
    pub duration_ms: u64,
    pub convergence: Vec<ConvergenceResult>,
    pub flow_reports: Vec<StatsReport>,
    pub drops: Vec<(DropReason, u64)>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    pub fn convergence_of(&self, window: &str) -> Option<&ConvergenceResult> {
        self.convergence.iter().find(|c| c.window == window)
    }

    /// Convergence lines followed by every stats block, as printed at the end
    /// of a run.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Topology: {} | Protocol: {} | Duration: {:.1} s",
            self.topology,
            self.protocol,
            self.duration_ms as f64 / 1000.0
        )?;
        for result in &self.convergence {
            writeln!(f, "{result}")?;
        }
        for report in &self.flow_reports {
            writeln!(f)?;
            write!(f, "{report}")?;
        }
        Ok(())
    }
}
