//! Scripted agent and account configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side an agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Team {
    /// Benign users.
    #[serde(alias = "green")]
    Green,
    /// Attackers.
    #[serde(alias = "red")]
    Red,
    /// Defenders.
    #[serde(alias = "blue")]
    Blue,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Green => write!(f, "GREEN"),
            Team::Red => write!(f, "RED"),
            Team::Blue => write!(f, "BLUE"),
        }
    }
}

/// A scripted agent that issues one request on a schedule.
///
/// ```yaml
/// agents:
///   - name: green_user
///     team: GREEN
///     action: network node client_1 application web_browser execute
///     start_step: 2
///     frequency: 4
///     variance: 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Agent name, unique within the scenario.
    pub name: String,
    /// Side the agent plays.
    pub team: Team,
    /// Request path relative to the simulation root, whitespace separated.
    pub action: String,
    /// First step the agent may act.
    #[serde(default)]
    pub start_step: u64,
    /// Steps between actions.
    #[serde(default = "AgentConfig::default_frequency")]
    pub frequency: u64,
    /// Maximum jitter added to each scheduled step.
    #[serde(default)]
    pub variance: u64,
}

impl AgentConfig {
    fn default_frequency() -> u64 {
        1
    }

    /// The request path as tokens.
    pub fn action_path(&self) -> Vec<String> {
        self.action.split_whitespace().map(str::to_string).collect()
    }
}

/// A user account on the simulation's domain controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    /// Login name.
    pub username: String,
    /// Initial password.
    pub password: String,
    /// Administrator account.
    #[serde(default)]
    pub admin: bool,
}
