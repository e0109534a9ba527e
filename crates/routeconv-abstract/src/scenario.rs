use crate::config::SimConfig;
use serde::Deserialize;

/// A fault-injection experiment as written on disk.
///
/// Nodes are referenced by name; the runner resolves them against the
/// topology before anything is scheduled.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub topology: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    /// Nodes whose routing tables are sampled. Defaults to every router.
    #[serde(default)]
    pub monitored: Option<Vec<String>>,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub simulation_time: Option<u64>,
    pub link_down_time: Option<u64>,
    pub link_up_time: Option<u64>,
    pub udp_start_time: Option<u64>,
    pub udp_interval: Option<u64>,
    pub udp_packet_size: Option<u32>,
    pub udp_max_packets: Option<u64>,
    pub first_sample_delay: Option<u64>,
    pub sample_period: Option<u64>,
    pub loss_rate: Option<f64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.simulation_time {
            config.simulation_time = v;
        }
        if let Some(v) = self.link_down_time {
            config.link_down_time = v;
        }
        if let Some(v) = self.link_up_time {
            config.link_up_time = v;
        }
        if let Some(v) = self.udp_start_time {
            config.udp_start_time = v;
        }
        if let Some(v) = self.udp_interval {
            config.udp_interval = v;
        }
        if let Some(v) = self.udp_packet_size {
            config.udp_packet_size = v;
        }
        if let Some(v) = self.udp_max_packets {
            config.udp_max_packets = v;
        }
        if let Some(v) = self.first_sample_delay {
            config.first_sample_delay = v;
        }
        if let Some(v) = self.sample_period {
            config.sample_period = v;
        }
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Administratively disable both ends of the link between `a` and `b`
    LinkDown { time: u64, a: String, b: String },
    /// Re-enable both ends of the link between `a` and `b`
    LinkUp { time: u64, a: String, b: String },
    /// Open (or re-open) a convergence window
    TrackStart { time: u64, window: String },
    /// Close a convergence window
    TrackStop { time: u64, window: String },
    /// Track from the start of the run and stop at `time`
    SingleShot { time: u64, window: String },
    /// Print flow statistics, optionally for a single source/destination pair
    StatsReport {
        time: u64,
        source: Option<String>,
        destination: Option<String>,
    },
}

impl ScenarioAction {
    pub fn time(&self) -> u64 {
        match self {
            ScenarioAction::LinkDown { time, .. }
            | ScenarioAction::LinkUp { time, .. }
            | ScenarioAction::TrackStart { time, .. }
            | ScenarioAction::TrackStop { time, .. }
            | ScenarioAction::SingleShot { time, .. }
            | ScenarioAction::StatsReport { time, .. } => *time,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// Window converged in at most `ms`
    ConvergenceAtMost { window: String, ms: u64 },
    /// Window took at least `ms` to converge
    ConvergenceAtLeast { window: String, ms: u64 },
    /// Aggregate loss ratio of the last stats report is at most `value`
    LossRatioAtMost { value: f64 },
    /// Aggregate received packets of the last stats report is at least `packets`
    DeliveredAtLeast { packets: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
name = "linear fault"
topology = "linear"

[config]
link_down_time = 40000
seed = 7

[[actions]]
type = "link_down"
time = 40000
a = "T"
b = "Router1"

[[actions]]
type = "stats_report"
time = 60000
source = "T"
destination = "R"

[[assertions]]
type = "convergence_at_most"
window = "during"
ms = 20000
"#;

    #[test]
    fn parse_scenario() {
        let scenario: ScenarioFile = toml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.topology, "linear");
        assert!(scenario.description.is_empty());
        assert!(scenario.monitored.is_none());
        assert_eq!(scenario.actions.len(), 2);
        assert_eq!(
            scenario.actions[0],
            ScenarioAction::LinkDown {
                time: 40_000,
                a: "T".into(),
                b: "Router1".into(),
            }
        );
        assert_eq!(scenario.actions[1].time(), 60_000);
        assert_eq!(
            scenario.assertions[0],
            ScenarioAssertion::ConvergenceAtMost {
                window: "during".into(),
                ms: 20_000,
            }
        );
    }

    #[test]
    fn override_only_touches_given_fields() {
        let scenario: ScenarioFile = toml::from_str(SCENARIO).unwrap();
        let mut config = SimConfig::default();
        scenario.config.apply_to(&mut config);

        assert_eq!(config.link_down_time, 40_000);
        assert_eq!(config.seed, 7);
        assert_eq!(config.link_up_time, SimConfig::default().link_up_time);
        assert_eq!(config.sample_period, 100);
    }
}
