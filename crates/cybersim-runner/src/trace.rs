//! Action history output.

use crate::simulation::{AgentAction, StepResult};
use crate::RunnerError;
use cybersim_common::{RequestResponse, RequestStatus};
use cybersim_model::Team;
use cybersim_network::StepTallies;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;

/// Agent request and its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ActionPayload {
    /// Agent name.
    pub agent: String,
    /// Agent team.
    pub team: Team,
    /// Request path, space separated.
    pub request: String,
    /// Outcome.
    pub status: RequestStatus,
    /// Response data (failure reason, query results).
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// End-of-step aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct StepPayload {
    /// Frame and NMNE counters of the step.
    pub tallies: StepTallies,
    /// Nodes in the ON state after the step.
    pub nodes_on: usize,
}

/// Payload types for trace entries.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TracePayload {
    /// An agent request.
    #[serde(rename = "ACTION")]
    Action(ActionPayload),
    /// A completed step.
    #[serde(rename = "STEP")]
    Step(StepPayload),
}

/// A trace entry for output.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    /// Step number.
    pub step: u64,
    /// Entry payload (flattened into this object).
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Collects trace entries and writes them as one JSON array.
pub struct TraceRecorder {
    output: Option<Box<dyn Write>>,
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    /// Create a recorder. With no output, entries are kept but never written.
    pub fn new(output: Option<Box<dyn Write>>) -> Self {
        TraceRecorder {
            output,
            entries: Vec::new(),
        }
    }

    /// Record an entry.
    pub fn record(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Record the actions of a step and its aggregates.
    pub fn record_step(&mut self, actions: &[AgentAction], result: &StepResult, nodes_on: usize) {
        let step = result.timestep.as_u64();
        for (action, response) in actions.iter().zip(&result.responses) {
            self.record(TraceEntry {
                step,
                payload: TracePayload::Action(action_payload(action, response)),
            });
        }
        self.record(TraceEntry {
            step,
            payload: TracePayload::Step(StepPayload {
                tallies: result.tallies,
                nodes_on,
            }),
        });
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Write all entries to the output.
    pub fn flush(&mut self) -> Result<(), RunnerError> {
        if let Some(ref mut output) = self.output {
            let json = serde_json::to_string_pretty(&self.entries)?;
            writeln!(output, "{}", json)?;
            output.flush()?;
        }
        Ok(())
    }
}

fn action_payload(action: &AgentAction, response: &RequestResponse) -> ActionPayload {
    ActionPayload {
        agent: action.agent.clone(),
        team: action.team,
        request: action.path.join(" "),
        status: response.status,
        data: response.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cybersim_common::Timestep;

    #[test]
    fn test_entries_serialize_flat() {
        let action = AgentAction {
            agent: "red".to_string(),
            team: Team::Red,
            path: vec!["domain".to_string(), "account".to_string()],
        };
        let result = StepResult {
            timestep: Timestep(4),
            responses: vec![RequestResponse::failure("nope")],
            tallies: StepTallies::default(),
            state: Value::Null,
        };
        let mut recorder = TraceRecorder::new(None);
        recorder.record_step(&[action], &result, 3);
        recorder.flush().unwrap();

        let json = serde_json::to_value(recorder.entries()).unwrap();
        assert_eq!(json[0]["type"], "ACTION");
        assert_eq!(json[0]["step"], 4);
        assert_eq!(json[0]["team"], "RED");
        assert_eq!(json[0]["request"], "domain account");
        assert_eq!(json[0]["status"], "failure");
        assert_eq!(json[0]["data"]["reason"], "nope");
        assert_eq!(json[1]["type"], "STEP");
        assert_eq!(json[1]["nodes_on"], 3);
        assert_eq!(json[1]["tallies"]["frames_delivered"], 0);
    }
}
