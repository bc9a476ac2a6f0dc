//! # cybersim-network
//!
//! The data plane of the CyberSim simulation.
//!
//! This crate provides:
//! - Network interfaces with per-step traffic tallies and NMNE capture ([`NetworkInterface`])
//! - Bandwidth-limited point-to-point links ([`Link`])
//! - Ordered access control lists with an implicit last rule ([`AccessControlList`])
//! - Nodes: hosts, switches, routers and firewalls ([`Node`], [`NetworkLayer`])
//! - The network container that owns the topology and drains frames ([`Network`])
//!
//! ## Frame delivery
//!
//! Sending is fire-and-forget. Nodes queue frames on an egress port; the
//! network drains a worklist synchronously, charging each link for the
//! frame size and handing the frame to the interface at the far end.
//! Frames are dropped, never queued, when an interface is disabled, a node
//! is off, or a link is at capacity.

mod acl;
mod link;
mod network;
mod nic;
mod node;

pub use acl::{
    AccessControlList, AclAction, AclAddress, AclRule, AclRuleArgs, ACL_REQUESTS,
    DEFAULT_MAX_ACL_RULES,
};
pub use link::{Link, LinkEndpoint, DEFAULT_BANDWIDTH_MBPS};
pub use network::{Network, StepTallies, MAX_FRAMES_PER_FLUSH, MAX_SETTLE_ROUNDS, NETWORK_REQUESTS};
pub use nic::{NetworkInterface, NmneCounts, TrafficCounts, NIC_REQUESTS};
pub use node::{
    NetworkLayer, Node, NodeOperatingState, NodeSettings, Route, RouteTable, NODE_REQUESTS,
    ROUTE_REQUESTS,
};

use cybersim_filesystem::FileSystemError;
use cybersim_packet::PacketError;
use cybersim_software::SoftwareError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while building a topology.
///
/// Agent requests never produce these; they only come from code that
/// assembles the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// Hostname used twice.
    #[error("Duplicate hostname: {0}")]
    DuplicateHost(String),

    /// No node with this hostname.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// Unrecognised node type name.
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Interface port used twice on one node.
    #[error("Duplicate interface {port} on {host}")]
    DuplicateInterface {
        /// Node hostname.
        host: String,
        /// Port number.
        port: u16,
    },

    /// No interface with this port number.
    #[error("Unknown interface {port} on {host}")]
    UnknownInterface {
        /// Node hostname.
        host: String,
        /// Port number.
        port: u16,
    },

    /// Interface already has a link.
    #[error("Interface {port} on {host} is already linked")]
    PortInUse {
        /// Node hostname.
        host: String,
        /// Port number.
        port: u16,
    },

    /// Operation needs a router or firewall.
    #[error("{0} is not a router or firewall")]
    NotARouter(String),

    /// Operation needs an end host.
    #[error("{0} is not a computer or server")]
    NotAHost(String),

    /// Bad link parameter.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Bad address.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Software could not be installed.
    #[error(transparent)]
    Software(#[from] SoftwareError),

    /// File system item could not be created.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),
}

// ============================================================================
// Node Types
// ============================================================================

/// Kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// End-user workstation.
    Computer,
    /// Host running services.
    Server,
    /// Layer-2 switch.
    Switch,
    /// Layer-3 router with an ACL.
    Router,
    /// Router whose ACL denies by default.
    Firewall,
}

impl NodeType {
    /// Every node type.
    pub const ALL: &'static [NodeType] = &[
        NodeType::Computer,
        NodeType::Server,
        NodeType::Switch,
        NodeType::Router,
        NodeType::Firewall,
    ];

    /// Lowercase name used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Computer => "computer",
            NodeType::Server => "server",
            NodeType::Switch => "switch",
            NodeType::Router => "router",
            NodeType::Firewall => "firewall",
        }
    }

    /// Returns true for computers and servers.
    pub fn is_host(&self) -> bool {
        matches!(self, NodeType::Computer | NodeType::Server)
    }

    /// Returns true for routers and firewalls.
    pub fn is_router(&self) -> bool {
        matches!(self, NodeType::Router | NodeType::Firewall)
    }

    /// Action of the implicit ACL rule for this type.
    pub fn default_acl_action(&self) -> AclAction {
        match self {
            NodeType::Firewall => AclAction::Deny,
            _ => AclAction::Permit,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NodeType {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        NodeType::ALL
            .iter()
            .find(|t| t.name() == lower)
            .copied()
            .ok_or_else(|| NetworkError::UnknownNodeType(s.to_string()))
    }
}

// ============================================================================
// NMNE Configuration
// ============================================================================

/// Malicious-network-event capture settings.
///
/// Interfaces count frames whose payload contains one of `keywords`
/// (case-insensitive), separately for each direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NmneConfig {
    /// Whether interfaces capture at all.
    #[serde(default = "NmneConfig::default_capture")]
    pub capture_nmne: bool,
    /// Keywords that mark a payload as malicious.
    #[serde(default = "NmneConfig::default_keywords")]
    pub keywords: Vec<String>,
}

impl NmneConfig {
    fn default_capture() -> bool {
        true
    }

    fn default_keywords() -> Vec<String> {
        vec!["DELETE".to_string()]
    }

    /// Capture switched off.
    pub fn disabled() -> Self {
        NmneConfig {
            capture_nmne: false,
            keywords: Vec::new(),
        }
    }
}

impl Default for NmneConfig {
    fn default() -> Self {
        NmneConfig {
            capture_nmne: NmneConfig::default_capture(),
            keywords: NmneConfig::default_keywords(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parse() {
        assert_eq!("Router".parse::<NodeType>().unwrap(), NodeType::Router);
        assert_eq!("firewall".parse::<NodeType>().unwrap(), NodeType::Firewall);
        assert!(matches!(
            "mainframe".parse::<NodeType>(),
            Err(NetworkError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_default_acl_actions() {
        assert_eq!(NodeType::Router.default_acl_action(), AclAction::Permit);
        assert_eq!(NodeType::Firewall.default_acl_action(), AclAction::Deny);
    }

    #[test]
    fn test_nmne_config_defaults_from_yaml_shape() {
        let config: NmneConfig = serde_json::from_str("{}").unwrap();
        assert!(config.capture_nmne);
        assert_eq!(config.keywords, vec!["DELETE".to_string()]);
        assert!(serde_json::from_str::<NmneConfig>(r#"{"capture": true}"#).is_err());
    }
}
