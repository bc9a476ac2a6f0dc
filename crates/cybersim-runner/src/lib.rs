//! # cybersim-runner library
//!
//! Library interface for the CyberSim environment and its scripted runner.
//!
//! This module re-exports the key types needed for driving a simulation
//! programmatically and for integration testing:
//! - [`Environment`] owns a [`Simulation`] and its seeded context and steps it
//! - [`DomainController`] holds the user accounts
//! - [`AgentSet`] produces scripted agent actions
//! - [`TraceRecorder`] writes the action history
//!
//! ## Driving an environment
//!
//! An external driver builds an [`Environment`] from a loaded scenario and
//! calls [`Environment::step`] with the actions of its agents. Every step
//! returns the full state snapshot. [`run_episode`] does the same with the
//! scenario's scripted agents.

pub mod agents;
pub mod domain;
pub mod simulation;
pub mod trace;

pub use agents::{AgentSet, ScriptedAgent};
pub use domain::{Account, DomainController, ACCOUNT_REQUESTS, DOMAIN_REQUESTS};
pub use simulation::{AgentAction, Environment, Simulation, StepResult, SIMULATION_REQUESTS};
pub use trace::{TraceEntry, TracePayload, TraceRecorder};

use cybersim_common::RequestStatus;
use cybersim_network::StepTallies;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while running a scenario.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] cybersim_model::ModelError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Run Summary
// ============================================================================

/// Statistics collected over a scripted run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Seed of the run.
    pub seed: u64,
    /// Steps executed.
    pub steps: u64,
    /// Agent requests applied.
    pub requests: u64,
    /// Requests that succeeded.
    pub requests_succeeded: u64,
    /// Requests that failed.
    pub requests_failed: u64,
    /// Frame and NMNE counters summed over the run.
    pub totals: StepTallies,
    /// Nodes in the ON state at the end.
    pub nodes_on: usize,
}

/// Run `steps` steps with scripted agents, recording every action.
pub fn run_episode(
    env: &mut Environment,
    agents: &mut AgentSet,
    steps: u64,
    seed: u64,
    trace: &mut TraceRecorder,
) -> RunSummary {
    let mut summary = RunSummary {
        seed,
        ..RunSummary::default()
    };

    for _ in 0..steps {
        let step = env.timestep().as_u64();
        let actions = agents.actions(step, env.rng());
        let result = env.step(&actions);

        for response in &result.responses {
            summary.requests += 1;
            match response.status {
                RequestStatus::Success => summary.requests_succeeded += 1,
                _ => summary.requests_failed += 1,
            }
        }
        let nodes_on = nodes_on(env);
        trace.record_step(&actions, &result, nodes_on);
        summary.steps += 1;
    }

    summary.totals = env.simulation().network().totals();
    summary.nodes_on = nodes_on(env);
    info!(
        steps = summary.steps,
        requests = summary.requests,
        failed = summary.requests_failed,
        "episode finished"
    );
    summary
}

fn nodes_on(env: &Environment) -> usize {
    env.simulation()
        .network()
        .nodes()
        .values()
        .filter(|node| node.is_on())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cybersim_model::{build_simulation, load_model_from_str};

    const SCENARIO: &str = r#"
nodes:
  - hostname: pc
    type: computer
    interfaces:
      - { port: 1, ip_address: 10.0.0.2 }
  - hostname: srv
    type: server
    interfaces:
      - { port: 1, ip_address: 10.0.0.3 }
links:
  - a: { hostname: pc, port: 1 }
    b: { hostname: srv, port: 1 }
agents:
  - name: green
    team: GREEN
    action: network node pc ping 10.0.0.3
    frequency: 2
  - name: red
    team: RED
    action: network node srv teleport
    start_step: 3
    frequency: 10
"#;

    fn run(seed: u64, steps: u64) -> (RunSummary, TraceRecorder) {
        let model = load_model_from_str(SCENARIO).unwrap();
        let built = build_simulation(&model, seed).unwrap();
        let mut agents = AgentSet::new(&built.agents);
        let mut env = Environment::new(built);
        let mut trace = TraceRecorder::new(None);
        let summary = run_episode(&mut env, &mut agents, steps, seed, &mut trace);
        (summary, trace)
    }

    #[test]
    fn test_run_episode_counts_requests() {
        let (summary, trace) = run(5, 6);
        assert_eq!(summary.steps, 6);
        // green at 0, 2, 4; red at 3
        assert_eq!(summary.requests, 4);
        assert_eq!(summary.requests_succeeded, 3);
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(summary.nodes_on, 2);
        assert!(summary.totals.frames_delivered > 0);

        let steps = trace
            .entries()
            .iter()
            .filter(|e| matches!(e.payload, TracePayload::Step(_)))
            .count();
        assert_eq!(steps, 6);
        assert_eq!(trace.entries().len(), 10);
    }

    #[test]
    fn test_run_episode_is_deterministic() {
        let (a, trace_a) = run(8, 5);
        let (b, trace_b) = run(8, 5);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
        assert_eq!(
            serde_json::to_value(trace_a.entries()).unwrap(),
            serde_json::to_value(trace_b.entries()).unwrap()
        );
    }
}
