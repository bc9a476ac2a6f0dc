//! The simulation root and the stepping environment around it.

use crate::domain::DomainController;
use cybersim_common::{
    metric_defs, Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
    Timestep,
};
use cybersim_model::{AccountConfig, BuiltSimulation, Team};
use cybersim_network::{Network, StepTallies};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use tracing::{debug, info};

// ============================================================================
// Simulation
// ============================================================================

/// Root of the component tree: the network and the domain controller.
#[derive(Debug, Clone)]
pub struct Simulation {
    id: ComponentId,
    network: Network,
    domain: DomainController,
}

impl Simulation {
    /// Wrap a built network and create the domain accounts.
    pub fn new(ctx: &mut SimContext, network: Network, accounts: &[AccountConfig]) -> Self {
        Simulation {
            id: ctx.new_id(),
            network,
            domain: DomainController::new(ctx, accounts),
        }
    }

    /// The network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Mutable access to the network.
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// The domain controller.
    pub fn domain(&self) -> &DomainController {
        &self.domain
    }

    /// Clear transient per-step counters.
    pub fn pre_timestep(&mut self) {
        self.network.pre_timestep();
    }

    /// Advance every component by one step.
    pub fn apply_timestep(&mut self, ctx: &mut SimContext) {
        self.network.apply_timestep(ctx);
    }

    /// Recompute step aggregates.
    pub fn recompute_aggregates(&mut self) -> StepTallies {
        self.network.recompute_aggregates()
    }
}

impl SimComponent for Simulation {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        json!({
            "uuid": self.id,
            "network": self.network.describe_state(),
            "domain": self.domain.describe_state(),
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        SIMULATION_REQUESTS
    }
}

fn sim_network(sim: &mut Simulation, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    sim.network.apply_request(args, ctx)
}

fn sim_domain(sim: &mut Simulation, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    sim.domain.apply_request(args, ctx)
}

/// Requests accepted at the simulation root.
pub const SIMULATION_REQUESTS: &[RequestDef<Simulation>] = &[
    RequestDef::new("network", "<request...> Address the network", Arity::AtLeast(1), sim_network),
    RequestDef::new("domain", "<request...> Address the domain controller", Arity::AtLeast(1), sim_domain),
];

// ============================================================================
// Environment
// ============================================================================

/// A request issued by an agent during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAction {
    /// Agent name.
    pub agent: String,
    /// Agent team.
    pub team: Team,
    /// Request path from the simulation root.
    pub path: Vec<String>,
}

/// Outcome of one [`Environment::step`].
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step that was executed.
    pub timestep: Timestep,
    /// One response per action, in action order.
    pub responses: Vec<RequestResponse>,
    /// Aggregates of the step.
    pub tallies: StepTallies,
    /// Snapshot taken after the step.
    pub state: Value,
}

/// Owns a [`Simulation`] with its context and steps it.
///
/// Each [`Environment::step`] runs, in order: clear transient counters,
/// apply the actions in the order given, advance every component,
/// recompute aggregates, snapshot. The same seed and actions always give
/// the same sequence of snapshots, and [`Environment::reset`] returns to
/// the state captured at construction.
#[derive(Debug, Clone)]
pub struct Environment {
    ctx: SimContext,
    simulation: Simulation,
    initial: Box<(SimContext, Simulation)>,
}

impl Environment {
    /// Create an environment from a built simulation.
    pub fn new(built: BuiltSimulation) -> Self {
        let BuiltSimulation {
            mut ctx,
            network,
            accounts,
            ..
        } = built;
        let simulation = Simulation::new(&mut ctx, network, &accounts);
        let initial = Box::new((ctx.clone(), simulation.clone()));
        Environment {
            ctx,
            simulation,
            initial,
        }
    }

    /// The next step to execute.
    pub fn timestep(&self) -> Timestep {
        self.ctx.timestep()
    }

    /// The simulation.
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// The simulation random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        self.ctx.rng()
    }

    /// Apply one request on behalf of `agent`.
    ///
    /// Never fails: bad paths and refused operations come back as a
    /// failure response with state unchanged.
    pub fn apply_request(&mut self, agent: Option<&str>, path: &[String]) -> RequestResponse {
        self.ctx.set_agent(agent.map(str::to_string));
        let response = self.simulation.apply_request(path, &mut self.ctx);
        self.ctx.set_agent(None);

        let labels = vec![("status", response.status.to_string())];
        metrics::counter!(metric_defs::REQUESTS.name, &labels).increment(1);
        debug!(
            timestep = %self.ctx.timestep(),
            agent = agent.unwrap_or("-"),
            request = %path.join(" "),
            status = %response.status,
            reason = response.reason().unwrap_or(""),
            "request applied"
        );
        response
    }

    /// Execute one step with the given actions.
    pub fn step(&mut self, actions: &[AgentAction]) -> StepResult {
        let timestep = self.ctx.timestep();
        self.simulation.pre_timestep();

        let responses = actions
            .iter()
            .map(|action| self.apply_request(Some(&action.agent), &action.path))
            .collect();

        self.simulation.apply_timestep(&mut self.ctx);
        let tallies = self.simulation.recompute_aggregates();
        let state = self.describe_state();

        self.ctx.set_timestep(timestep.next());
        StepResult {
            timestep,
            responses,
            tallies,
            state,
        }
    }

    /// Snapshot of the whole simulation, tagged with the current step.
    pub fn describe_state(&self) -> Value {
        let mut state = self.simulation.describe_state();
        if let Some(map) = state.as_object_mut() {
            map.insert("timestep".to_string(), json!(self.ctx.timestep().as_u64()));
        }
        state
    }

    /// Return to the state captured at construction, including the
    /// random number generator.
    pub fn reset(&mut self) {
        let (ctx, simulation) = self.initial.as_ref().clone();
        self.ctx = ctx;
        self.simulation = simulation;
        info!("environment reset");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cybersim_model::{build_simulation, load_model_from_str};
    use cybersim_network::NodeOperatingState;

    const SCENARIO: &str = r#"
nodes:
  - hostname: pc
    type: computer
    interfaces:
      - { port: 1, ip_address: 10.0.0.2 }
  - hostname: srv
    type: server
    node:
      shut_down_duration: 2
    interfaces:
      - { port: 1, ip_address: 10.0.0.3 }
    services:
      - { type: WebServer, name: web_server }
    files:
      - { folder: docs, name: report.pdf }
links:
  - a: { hostname: pc, port: 1 }
    b: { hostname: srv, port: 1 }
accounts:
  - { username: alice, password: pw }
"#;

    fn environment(seed: u64) -> Environment {
        let model = load_model_from_str(SCENARIO).unwrap();
        Environment::new(build_simulation(&model, seed).unwrap())
    }

    fn action(agent: &str, request: &str) -> AgentAction {
        AgentAction {
            agent: agent.to_string(),
            team: Team::Blue,
            path: request.split_whitespace().map(str::to_string).collect(),
        }
    }

    #[test]
    fn test_step_applies_actions_then_advances() {
        let mut env = environment(1);
        assert_eq!(env.timestep(), Timestep::ZERO);

        let result = env.step(&[action("blue", "network node srv shutdown")]);
        assert_eq!(result.timestep, Timestep(0));
        assert!(result.responses[0].is_success());
        assert_eq!(env.timestep(), Timestep(1));
        assert_eq!(result.state["timestep"], 0);
        assert_eq!(result.state["network"]["nodes"]["srv"]["operating_state"], "SHUTTING_DOWN");

        env.step(&[]);
        let srv = env.simulation().network().node("srv").unwrap();
        assert_eq!(srv.operating_state(), NodeOperatingState::Off);
    }

    #[test]
    fn test_requests_reach_network_and_domain() {
        let mut env = environment(1);
        let ping = env.apply_request(None, &action("a", "network node pc ping 10.0.0.3").path);
        assert!(ping.is_success(), "{:?}", ping);

        let logon = env.apply_request(Some("a"), &action("a", "domain account alice logon pw").path);
        assert!(logon.is_success());
        assert!(env.simulation().domain().account("alice").unwrap().is_logged_on());

        let bad = env.apply_request(None, &action("a", "internet connect").path);
        assert_eq!(bad.reason(), Some("unreachable request: internet connect"));
        let empty = env.apply_request(None, &[]);
        assert!(!empty.is_success());
    }

    #[test]
    fn test_same_seed_same_snapshots() {
        let actions = [
            action("red", "network node srv file_system file docs report.pdf corrupt"),
            action("blue", "network node srv scan"),
        ];
        let mut a = environment(9);
        let mut b = environment(9);
        for _ in 0..4 {
            assert_eq!(a.step(&actions).state, b.step(&actions).state);
        }
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut env = environment(2);
        let initial = env.describe_state();
        let first_run: Vec<Value> = (0..3)
            .map(|_| env.step(&[action("red", "network node pc shutdown")]).state)
            .collect();
        assert_ne!(env.describe_state(), initial);

        env.reset();
        assert_eq!(env.describe_state(), initial);
        assert_eq!(env.timestep(), Timestep::ZERO);
        let second_run: Vec<Value> = (0..3)
            .map(|_| env.step(&[action("red", "network node pc shutdown")]).state)
            .collect();
        assert_eq!(first_run, second_run);
    }

    #[test]
    fn test_failed_request_leaves_state_unchanged() {
        let mut env = environment(3);
        let before = env.simulation().describe_state();
        let response = env.apply_request(None, &action("x", "network node srv service web_server pause extra").path);
        assert!(!response.is_success());
        assert_eq!(env.simulation().describe_state(), before);
    }
}
