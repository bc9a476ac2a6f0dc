//! # cybersim-software
//!
//! Services and applications running on CyberSim nodes.
//!
//! This crate provides:
//! - The operating-state and health-state machines ([`OperatingState`], [`SoftwareHealth`])
//! - [`Software`]: lifecycle, timers and connection tracking shared by every program
//! - [`Behavior`]: what a program does with the traffic it receives (DNS, web, database, ...)
//! - [`SoftwareManager`]: the per-node owner that routes traffic and installs software
//!
//! ## Lifecycle
//!
//! ```text
//! STOPPED --start--> RUNNING --pause--> PAUSED --resume--> RUNNING
//! RUNNING --restart--> RESTARTING --(restart_duration)--> RUNNING
//! any --disable--> DISABLED --enable--> STOPPED
//! ```
//!
//! Applications only accept `start`/`stop` and the health actions.
//!
//! Software never touches the network directly. Outgoing traffic is queued as
//! [`OutboundMessage`]s that the owning node turns into frames; incoming
//! traffic arrives as [`InboundMessage`]s.

mod behavior;
mod manager;
mod software;

pub use behavior::{
    AttackStage, Behavior, BrowserHistoryItem, DataManipulationBot, DatabaseClient,
    DatabaseService, DnsClient, DnsServer, SoftwareOptions, SoftwareType, WebBrowser, WebServer,
    DATABASE_FILE, DATABASE_FOLDER,
};
pub use manager::{SoftwareManager, SOFTWARE_MANAGER_REQUESTS};
pub use software::{Software, SoftwareCore, SOFTWARE_REQUESTS};

use cybersim_packet::{IpProtocol, Payload, Port};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from building or installing software.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoftwareError {
    /// Unrecognised software type name.
    #[error("Unknown software type: {0}")]
    UnknownType(String),

    /// Unrecognised software kind.
    #[error("Unknown software kind: {0} (expected service or application)")]
    UnknownKind(String),

    /// The type cannot be installed as this kind.
    #[error("{software_type} cannot be installed as {kind}")]
    KindMismatch {
        /// Type requested.
        software_type: String,
        /// Kind requested.
        kind: SoftwareKind,
    },

    /// Bad option value.
    #[error("Invalid option {name}: {message}")]
    InvalidOption {
        /// Option name.
        name: String,
        /// What was wrong.
        message: String,
    },

    /// Name already taken on the node.
    #[error("Software already installed: {0}")]
    AlreadyInstalled(String),

    /// No software with that name.
    #[error("Software not installed: {0}")]
    NotInstalled(String),
}

// ============================================================================
// States
// ============================================================================

/// Operating state of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingState {
    /// Not running (an application is "closed").
    Stopped,
    /// Running and able to handle traffic.
    Running,
    /// Suspended by an operator.
    Paused,
    /// Restart in progress.
    Restarting,
    /// Disabled; must be enabled before it can start.
    Disabled,
    /// Installation in progress.
    Installing,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingState::Stopped => "STOPPED",
            OperatingState::Running => "RUNNING",
            OperatingState::Paused => "PAUSED",
            OperatingState::Restarting => "RESTARTING",
            OperatingState::Disabled => "DISABLED",
            OperatingState::Installing => "INSTALLING",
        };
        write!(f, "{}", name)
    }
}

/// Health of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoftwareHealth {
    /// Never scanned (visible state only).
    Unused,
    /// Healthy.
    Good,
    /// Patch in progress.
    Patching,
    /// Under attacker control.
    Compromised,
    /// More connections than it can handle.
    Overwhelmed,
}

impl fmt::Display for SoftwareHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SoftwareHealth::Unused => "UNUSED",
            SoftwareHealth::Good => "GOOD",
            SoftwareHealth::Patching => "PATCHING",
            SoftwareHealth::Compromised => "COMPROMISED",
            SoftwareHealth::Overwhelmed => "OVERWHELMED",
        };
        write!(f, "{}", name)
    }
}

/// Service or application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftwareKind {
    /// Long-running service, started with the node.
    Service,
    /// User application, started on demand.
    Application,
}

impl fmt::Display for SoftwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftwareKind::Service => write!(f, "service"),
            SoftwareKind::Application => write!(f, "application"),
        }
    }
}

impl FromStr for SoftwareKind {
    type Err = SoftwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "service" => Ok(SoftwareKind::Service),
            "application" => Ok(SoftwareKind::Application),
            _ => Err(SoftwareError::UnknownKind(s.to_string())),
        }
    }
}

/// Durations and capacity shared by the software of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareTimings {
    /// Steps a patch takes.
    pub patching_duration: u32,
    /// Steps a restart takes.
    pub restart_duration: u32,
    /// Steps an installation takes.
    pub install_duration: u32,
    /// Connections allowed before the program is overwhelmed.
    pub max_sessions: usize,
}

impl Default for SoftwareTimings {
    fn default() -> Self {
        SoftwareTimings {
            patching_duration: 2,
            restart_duration: 3,
            install_duration: 3,
            max_sessions: 100,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Traffic a program wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Destination address.
    pub dst_ip: Ipv4Addr,
    /// Destination port.
    pub dst_port: Port,
    /// Source port (the sending program's port).
    pub src_port: Port,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Application payload.
    pub payload: Payload,
}

/// Traffic delivered to a node's programs.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sender address.
    pub src_ip: Ipv4Addr,
    /// Sender port.
    pub src_port: Port,
    /// Port it was addressed to.
    pub dst_port: Port,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Application payload.
    pub payload: Payload,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("Service".parse::<SoftwareKind>().unwrap(), SoftwareKind::Service);
        assert_eq!("application".parse::<SoftwareKind>().unwrap(), SoftwareKind::Application);
        assert!("daemon".parse::<SoftwareKind>().is_err());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_value(OperatingState::Restarting).unwrap(), "RESTARTING");
        assert_eq!(serde_json::to_value(SoftwareHealth::Overwhelmed).unwrap(), "OVERWHELMED");
        assert_eq!(OperatingState::Paused.to_string(), "PAUSED");
    }
}
