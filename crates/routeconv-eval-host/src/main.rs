use anyhow::Result;
use clap::Parser;
use routeconv_simulator::{SimulationReport, scenario_runner};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless grader for routing convergence scenarios")]
struct Args {
    /// Path to the scenario TOML file to execute.
    #[arg(long)]
    scenario: PathBuf,

    /// Protocols to run the scenario with. Repeat to run several.
    #[arg(long = "routing-protocol", default_values_t = ["rip".to_string(), "olsr".to_string()])]
    protocols: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("routeconv-eval-host starting...");

    for protocol in &args.protocols {
        let report = scenario_runner::run_scenario(&args.scenario, protocol)?;
        log_summary(&report);
    }
    info!("All protocols passed");
    Ok(())
}

fn log_summary(report: &SimulationReport) {
    info!(
        "{} over {} | duration: {} ms | link events: {}",
        report.protocol,
        report.topology,
        report.duration_ms,
        report.link_events.len()
    );
    for result in &report.convergence {
        info!("{}", result);
    }
    if let Some(last) = report.flow_reports.last() {
        let m = &last.aggregate.metrics;
        info!(
            "flows: {} | tx: {} | rx: {} | lost: {} | loss ratio: {:.4}",
            last.aggregate.flow_count, m.tx_packets, m.rx_packets, m.lost_packets, m.loss_ratio
        );
    }
}
