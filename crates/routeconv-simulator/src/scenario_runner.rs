use anyhow::{Context, anyhow};
use routeconv_abstract::{NodeHandle, ScenarioAction, ScenarioAssertion, ScenarioFile, SimConfig};
use routeconv_core::{FaultAction, FaultScenario, ReportScope, SamplingOptions};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::Simulator;
use crate::routing::{RoutingProtocol, protocol_by_name};
use crate::topologies::{BuiltTopology, build_by_name};
use crate::trace::SimulationReport;

pub fn load_scenario(path: &Path) -> anyhow::Result<ScenarioFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: ScenarioFile =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

/// Run a built-in topology with its default fault timeline.
pub fn run_builtin(
    topology: &str,
    protocol: &str,
    config: SimConfig,
) -> anyhow::Result<SimulationReport> {
    validate_config(&config)?;
    let protocol = protocol_by_name(protocol)?;
    let built = build_by_name(topology)?;
    let scenario = built
        .default_scenario(&config)
        .context("Failed to build the default timeline")?;
    execute(&built, protocol, config, scenario)
}

/// Load, run and check a scenario file.
pub fn run_scenario(scenario_path: &Path, protocol: &str) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(scenario_path)?;
    run_scenario_file(&scenario, protocol)
}

pub fn run_scenario_file(
    scenario: &ScenarioFile,
    protocol: &str,
) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let protocol = protocol_by_name(protocol)?;
    let built = build_by_name(&scenario.topology)?;

    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    validate_config(&config)?;

    let fault_scenario = if scenario.actions.is_empty() {
        built
            .default_scenario(&config)
            .context("Failed to build the default timeline")?
    } else {
        build_fault_scenario(&built, scenario, &config)?
    };

    let report = execute(&built, protocol, config, fault_scenario)?;
    check_assertions(&scenario.assertions, &report)?;
    info!("Scenario '{}' passed with {}", scenario.name, protocol);
    Ok(report)
}

/// Reject timing settings that cannot fit inside the run.
pub fn validate_config(config: &SimConfig) -> anyhow::Result<()> {
    let end = config.simulation_time;
    for (name, value) in [
        ("sample_period", config.sample_period),
        ("first_sample_delay", config.first_sample_delay),
        ("udp_interval", config.udp_interval),
    ] {
        if value > end {
            return Err(anyhow!(
                "Invalid config: {name} = {value} ms exceeds simulation_time = {end} ms"
            ));
        }
    }
    if !(0.0..=1.0).contains(&config.loss_rate) {
        return Err(anyhow!(
            "Invalid config: loss_rate = {} is outside [0, 1]",
            config.loss_rate
        ));
    }
    Ok(())
}

fn resolve(built: &BuiltTopology, name: &str) -> anyhow::Result<NodeHandle> {
    built
        .topology
        .lookup(name)
        .with_context(|| format!("Scenario references node '{name}'"))
}

/// Translate the named actions of a scenario file into a fault timeline.
/// Windows are declared on first mention.
pub fn build_fault_scenario(
    built: &BuiltTopology,
    scenario: &ScenarioFile,
    config: &SimConfig,
) -> anyhow::Result<FaultScenario> {
    let monitored = match &scenario.monitored {
        Some(names) => names
            .iter()
            .map(|name| resolve(built, name))
            .collect::<anyhow::Result<Vec<_>>>()?,
        None => built.monitored.clone(),
    };

    let mut fault_scenario = built.empty_scenario(config);
    let options = SamplingOptions::from_config(config);
    let mut declared: Vec<String> = Vec::new();

    for action in &scenario.actions {
        let time = action.time();
        match action {
            ScenarioAction::LinkDown { a, b, .. } => {
                let (a, b) = (resolve(built, a)?, resolve(built, b)?);
                fault_scenario.at(time, FaultAction::LinkDown { a, b });
            }
            ScenarioAction::LinkUp { a, b, .. } => {
                let (a, b) = (resolve(built, a)?, resolve(built, b)?);
                fault_scenario.at(time, FaultAction::LinkUp { a, b });
            }
            ScenarioAction::TrackStart { window, .. } => {
                if !declared.contains(window) {
                    fault_scenario.add_window(window, &monitored, options)?;
                    declared.push(window.clone());
                }
                fault_scenario.at(
                    time,
                    FaultAction::TrackerStart {
                        window: window.clone(),
                    },
                );
            }
            ScenarioAction::TrackStop { window, .. } => {
                fault_scenario.at(
                    time,
                    FaultAction::TrackerStop {
                        window: window.clone(),
                    },
                );
            }
            ScenarioAction::SingleShot { window, .. } => {
                fault_scenario.add_single_shot_window(
                    window,
                    &monitored,
                    config.sample_period,
                    time,
                )?;
                declared.push(window.clone());
            }
            ScenarioAction::StatsReport {
                source,
                destination,
                ..
            } => {
                let scope = match (source, destination) {
                    (Some(source), Some(destination)) => {
                        ReportScope::Between(resolve(built, source)?, resolve(built, destination)?)
                    }
                    (None, None) => ReportScope::AllFlows,
                    _ => {
                        return Err(anyhow!(
                            "stats_report at {time} ms needs both endpoints or neither"
                        ));
                    }
                };
                fault_scenario.at(time, FaultAction::StatsReport { scope });
            }
        }
    }
    Ok(fault_scenario)
}

fn execute(
    built: &BuiltTopology,
    protocol: RoutingProtocol,
    config: SimConfig,
    scenario: FaultScenario,
) -> anyhow::Result<SimulationReport> {
    let end = config.simulation_time;
    let mut sim = Simulator::new(config, built.topology.clone(), protocol);
    sim.add_udp_flow(built.source, built.sink)?;

    let handle = scenario.submit(&mut sim).context("Invalid fault scenario")?;

    info!("Simulating {} with {} until {} ms", built.kind, protocol, end);
    sim.run_until(end)?;

    let outcome = handle.into_outcome();
    for result in &outcome.convergence {
        info!("{}", result);
    }

    Ok(SimulationReport {
        config: sim.config().clone(),
        topology: built.kind.to_string(),
        protocol,
        duration_ms: sim.current_time(),
        convergence: outcome.convergence,
        flow_reports: outcome.reports,
        drops: sim.dropped_by_reason.clone(),
        link_events: sim.link_events.clone(),
    })
}

pub fn check_assertions(
    assertions: &[ScenarioAssertion],
    report: &SimulationReport,
) -> anyhow::Result<()> {
    let convergence_ms = |window: &str| -> anyhow::Result<u128> {
        report
            .convergence_of(window)
            .map(|c| c.elapsed.as_millis())
            .ok_or_else(|| anyhow!("Assertion Failed: no convergence window named '{window}'"))
    };
    let last_report = || {
        report
            .flow_reports
            .last()
            .ok_or_else(|| anyhow!("Assertion Failed: the scenario produced no stats report"))
    };

    for assertion in assertions {
        match assertion {
            ScenarioAssertion::ConvergenceAtMost { window, ms } => {
                let elapsed = convergence_ms(window)?;
                if elapsed > u128::from(*ms) {
                    return Err(anyhow!(
                        "Assertion Failed: window '{}' converged in {} ms, expected at most {}",
                        window,
                        elapsed,
                        ms
                    ));
                }
            }
            ScenarioAssertion::ConvergenceAtLeast { window, ms } => {
                let elapsed = convergence_ms(window)?;
                if elapsed < u128::from(*ms) {
                    return Err(anyhow!(
                        "Assertion Failed: window '{}' converged in {} ms, expected at least {}",
                        window,
                        elapsed,
                        ms
                    ));
                }
            }
            ScenarioAssertion::LossRatioAtMost { value } => {
                let loss = last_report()?.aggregate.metrics.loss_ratio;
                if loss > *value {
                    return Err(anyhow!(
                        "Assertion Failed: loss ratio {:.4} exceeds {:.4}",
                        loss,
                        value
                    ));
                }
            }
            ScenarioAssertion::DeliveredAtLeast { packets } => {
                let delivered = last_report()?.aggregate.metrics.rx_packets;
                if delivered < *packets {
                    return Err(anyhow!(
                        "Assertion Failed: {} packets delivered, expected at least {}",
                        delivered,
                        packets
                    ));
                }
            }
        }
    }
    Ok(())
}
