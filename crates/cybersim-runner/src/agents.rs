//! Scripted agents.
//!
//! A scripted agent repeats one request on a schedule: first at
//! `start_step`, then every `frequency` steps. Each scheduled step is
//! delayed by a jitter drawn uniformly from `0..=variance` using the
//! simulation generator, so runs stay reproducible for a given seed.

use crate::simulation::AgentAction;
use cybersim_model::{AgentConfig, Team};
use rand::Rng;
use tracing::trace;

/// One scripted agent and its schedule.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    config: AgentConfig,
    path: Vec<String>,
    /// Undelayed step of the next action.
    base: u64,
    /// Step of the next action once its jitter is drawn.
    due: Option<u64>,
}

impl ScriptedAgent {
    /// Create an agent that has not acted yet.
    pub fn new(config: AgentConfig) -> Self {
        let path = config.action_path();
        let base = config.start_step;
        ScriptedAgent {
            config,
            path,
            base,
            due: None,
        }
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Agent team.
    pub fn team(&self) -> Team {
        self.config.team
    }

    /// Return the action for `step`, if one is due.
    pub fn poll<R: Rng + ?Sized>(&mut self, step: u64, rng: &mut R) -> Option<AgentAction> {
        let due = match self.due {
            Some(due) => due,
            None => {
                let jitter = if self.config.variance > 0 {
                    rng.gen_range(0..=self.config.variance)
                } else {
                    0
                };
                let due = self.base + jitter;
                self.due = Some(due);
                due
            }
        };
        if step < due {
            return None;
        }
        self.base += self.config.frequency.max(1);
        self.due = None;
        trace!(agent = %self.config.name, step, "agent acts");
        Some(AgentAction {
            agent: self.config.name.clone(),
            team: self.config.team,
            path: self.path.clone(),
        })
    }

    /// Forget the schedule progress.
    pub fn reset(&mut self) {
        self.base = self.config.start_step;
        self.due = None;
    }
}

/// Agents in registration order.
#[derive(Debug, Clone, Default)]
pub struct AgentSet {
    agents: Vec<ScriptedAgent>,
}

impl AgentSet {
    /// Create agents from their configuration, keeping order.
    pub fn new(configs: &[AgentConfig]) -> Self {
        AgentSet {
            agents: configs.iter().cloned().map(ScriptedAgent::new).collect(),
        }
    }

    /// The agents.
    pub fn agents(&self) -> &[ScriptedAgent] {
        &self.agents
    }

    /// Actions due at `step`, in registration order.
    pub fn actions<R: Rng + ?Sized>(&mut self, step: u64, rng: &mut R) -> Vec<AgentAction> {
        self.agents
            .iter_mut()
            .filter_map(|agent| agent.poll(step, rng))
            .collect()
    }

    /// Reset every schedule.
    pub fn reset(&mut self) {
        self.agents.iter_mut().for_each(ScriptedAgent::reset);
    }
}
