//! # cybersim
//!
//! Command-line runner for CyberSim scenarios.

use cybersim_runner::{run_episode, AgentSet, Environment, RunSummary, RunnerError, TraceRecorder};

use clap::{Parser, Subcommand};
use cybersim_common::{metric_defs, RequestDef};
use cybersim_model::{build_simulation, load_models, properties_by_scope, PropertyScope};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// CLI Configuration
// ============================================================================

/// CyberSim - discrete-event cyber-security network simulator
#[derive(Parser, Debug)]
#[command(name = "cybersim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario with its scripted agents
    Run(RunConfig),
    /// List all available properties with descriptions and defaults
    Properties,
    /// List all available metrics with descriptions and labels
    Metrics,
    /// List every request path a component accepts
    Requests,
}

/// Configuration for running a scenario
#[derive(Parser, Debug)]
pub struct RunConfig {
    /// Path(s) to YAML scenario file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,

    /// Random seed (default: simulation/seed from the scenario)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Number of steps to run (default: simulation/steps from the scenario)
    #[arg(long)]
    pub steps: Option<u64>,

    /// Write the action trace as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the final state snapshot as JSON to this file
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Run Command
// ============================================================================

/// Load, build and run a scenario.
pub fn run_scenario(config: RunConfig) -> Result<RunSummary, RunnerError> {
    let paths: Vec<&Path> = config.scenarios.iter().map(|p| p.as_path()).collect();
    let model = load_models(&paths)?;
    if config.verbose {
        eprintln!(
            "Loaded scenario with {} nodes from {} file(s)",
            model.nodes().len(),
            config.scenarios.len()
        );
    }

    let seed = match config.seed {
        Some(seed) => seed,
        None => model.seed()?,
    };
    let built = build_simulation(&model, seed)?;
    let steps = config.steps.unwrap_or(built.steps);
    if config.verbose {
        eprintln!("Using seed {} for {} steps", seed, steps);
    }

    let output: Option<Box<dyn Write>> = match &config.output {
        Some(path) => Some(Box::new(BufWriter::new(File::create(path)?))),
        None => None,
    };
    let mut trace = TraceRecorder::new(output);
    let mut agents = AgentSet::new(&built.agents);
    let mut env = Environment::new(built);

    info!(seed, steps, agents = agents.agents().len(), "run started");
    let summary = run_episode(&mut env, &mut agents, steps, seed, &mut trace);
    trace.flush()?;

    if let Some(path) = &config.state {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &env.describe_state())?;
        writeln!(writer)?;
        writer.flush()?;
    }
    Ok(summary)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), RunnerError> {
    // Default to "warn" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            let summary = run_scenario(config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Properties => {
            print_properties_info();
        }
        Commands::Metrics => {
            print_metrics_info();
        }
        Commands::Requests => {
            print_requests_info();
        }
    }

    Ok(())
}

// ============================================================================
// Catalogues
// ============================================================================

/// Print information about all available properties
fn print_properties_info() {
    println!("CyberSim Available Properties");
    println!("=============================\n");

    println!("## Property Resolution Order\n");
    println!("  1. Built-in code defaults (shown below)");
    println!("  2. `defaults:` sections of the scenario files (in order loaded)");
    println!("  3. Explicit values on nodes and links (in order loaded)\n");

    let scopes = [
        (PropertyScope::Node, "Node Properties", "Set under `defaults: node:` or on a node entry"),
        (PropertyScope::Link, "Link Properties", "Set under `defaults: link:` or on a link entry"),
        (PropertyScope::Simulation, "Simulation Properties", "Set under `simulation:`"),
    ];

    for (scope, scope_name, scope_desc) in scopes {
        println!("## {}\n", scope_name);
        println!("{}\n", scope_desc);

        let mut props_by_ns: std::collections::BTreeMap<&str, Vec<_>> = std::collections::BTreeMap::new();
        for prop in properties_by_scope(scope) {
            props_by_ns.entry(prop.namespace().unwrap_or("(root)")).or_default().push(prop);
        }

        for (namespace, props) in props_by_ns {
            println!("### {}/\n", namespace);
            for prop in props {
                println!("  {}", prop.name);
                println!("    {}", prop.description);
                print!("    Type: {}  Default: {}", prop.value_type, prop.default_value());
                if let Some(unit) = prop.unit {
                    print!(" {}", unit);
                }
                println!("\n");
            }
        }
    }

    println!("## YAML Example\n");
    println!("```yaml");
    println!("defaults:");
    println!("  node:");
    println!("    software:");
    println!("      max_sessions: 10");
    println!("simulation:");
    println!("  simulation:");
    println!("    steps: 64");
    println!("nodes:");
    println!("  - hostname: router_1");
    println!("    type: router");
    println!("    acl:");
    println!("      implicit_action: DENY");
    println!("```");
}

/// Print information about all available metrics
fn print_metrics_info() {
    println!("CyberSim Available Metrics");
    println!("==========================\n");

    for metric in metric_defs::ALL {
        println!("  {}", metric.name);
        println!("    Type: {}", metric.kind);
        println!("    Description: {}", metric.description);
        if !metric.labels.is_empty() {
            println!("    Labels: {}", metric.labels.join(", "));
        }
        println!();
    }
}

fn print_request_table<T: 'static>(path: &str, table: &[RequestDef<T>]) {
    println!("## {}\n", path);
    for def in table {
        println!("  {:<20} args: {:<5} {}", def.name, def.arity.to_string(), def.description);
    }
    println!();
}

/// Print the request tables of every component type
fn print_requests_info() {
    println!("CyberSim Requests");
    println!("=================\n");
    println!("Paths are relative to the simulation root.\n");

    print_request_table("(root)", cybersim_runner::SIMULATION_REQUESTS);
    print_request_table("network", cybersim_network::NETWORK_REQUESTS);
    print_request_table("network node <host>", cybersim_network::NODE_REQUESTS);
    print_request_table(
        "network node <host> network_interface <port>",
        cybersim_network::NIC_REQUESTS,
    );
    print_request_table(
        "network node <host> service|application <name>",
        cybersim_software::SOFTWARE_REQUESTS,
    );
    print_request_table(
        "network node <host> software_manager",
        cybersim_software::SOFTWARE_MANAGER_REQUESTS,
    );
    print_request_table("network node <host> file_system", cybersim_filesystem::FILE_SYSTEM_REQUESTS);
    print_request_table(
        "network node <host> file_system file <folder> <file>",
        cybersim_filesystem::FILE_REQUESTS,
    );
    print_request_table(
        "network node <host> file_system folder <folder>",
        cybersim_filesystem::FOLDER_REQUESTS,
    );
    print_request_table("network node <host> acl", cybersim_network::ACL_REQUESTS);
    print_request_table("network node <host> route", cybersim_network::ROUTE_REQUESTS);
    print_request_table("domain", cybersim_runner::DOMAIN_REQUESTS);
    print_request_table("domain account <username>", cybersim_runner::ACCOUNT_REQUESTS);
}
