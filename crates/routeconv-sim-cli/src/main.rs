use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use routeconv_abstract::SimConfig;
use routeconv_simulator::{SimulationReport, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Routing convergence fault-injection simulator")]
struct Args {
    /// Built-in topology: linear, parallel or shortcut.
    #[arg(long, default_value = "linear")]
    topology: String,

    /// Routing protocol: rip or olsr.
    #[arg(long, default_value = "rip")]
    routing_protocol: String,

    /// Existing directory the JSON report is written into.
    #[arg(long, default_value = ".")]
    subfolder: PathBuf,

    /// Run a scenario file instead of the topology's default timeline.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Also write the JSON report to this path.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("routeconv-sim-cli starting...");

    if !args.subfolder.is_dir() {
        bail!("Output folder {} does not exist", args.subfolder.display());
    }

    let report = match &args.scenario {
        Some(path) => scenario_runner::run_scenario(path, &args.routing_protocol)?,
        None => scenario_runner::run_builtin(
            &args.topology,
            &args.routing_protocol,
            SimConfig::default(),
        )?,
    };

    print!("{}", report.summary());

    let report_path = args
        .subfolder
        .join(format!("{}_{}.json", report.topology, report.protocol));
    write_trace(&report_path, &report)?;
    info!("Report written to {}", report_path.display());

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}
