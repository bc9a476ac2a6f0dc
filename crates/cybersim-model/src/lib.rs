//! # cybersim-model
//!
//! YAML scenario loading and simulation building for CyberSim.
//!
//! This crate provides:
//! - YAML schema types for scenarios
//! - Scenario loading from files and strings, with multi-file merging
//! - Building a [`Network`] from a loaded [`Model`]
//! - The property registry for timing and capacity parameters
//!
//! ## Scenario files
//!
//! ```yaml
//! defaults:
//!   node:
//!     node:
//!       start_up_duration: 2
//! simulation:
//!   simulation:
//!     steps: 64
//! nodes:
//!   - hostname: router_1
//!     type: router
//!     interfaces:
//!       - { port: 1, ip_address: 192.168.1.1 }
//!     acl_rules:
//!       - { position: 0, action: PERMIT, protocol: TCP, dst_port: HTTP }
//! links:
//!   - a: { hostname: router_1, port: 1 }
//!     b: { hostname: switch_1, port: 8 }
//! ```
//!
//! Structural errors (unknown node type, malformed address, unknown
//! property, dangling link endpoint) are fatal [`ModelError`]s.

pub mod agent;
pub mod properties;

pub use agent::{AccountConfig, AgentConfig, Team};
pub use properties::{
    default_value, get_property_def, properties_by_scope, FromPropertyValue, LinkScope, NodeScope,
    Property, PropertyDef, PropertyScope, PropertySetError, PropertyType, PropertyValue,
    ResolvedProperties, ScopeMarker, SimulationScope, UnresolvedProperties, ALL_PROPERTIES,
    // Property constants
    ACL_IMPLICIT_ACTION, ACL_MAX_RULES, FILE_SYSTEM_REPAIRING_LIMIT, FILE_SYSTEM_RESTORING_LIMIT,
    FILE_SYSTEM_SCANNING_LIMIT, LINK_BANDWIDTH_MBPS, NMNE_CAPTURE, NMNE_KEYWORDS,
    NODE_SCAN_DURATION, NODE_SHUT_DOWN_DURATION, NODE_START_UP_DURATION, SIMULATION_SEED,
    SIMULATION_STEPS, SOFTWARE_INSTALL_DURATION, SOFTWARE_MAX_SESSIONS,
    SOFTWARE_PATCHING_DURATION, SOFTWARE_RESTART_DURATION,
};

use cybersim_common::{FromArgs, SimContext};
use cybersim_filesystem::FileSystemLimits;
use cybersim_network::{
    AclAction, AclRuleArgs, LinkEndpoint, Network, NetworkError, NmneConfig, Node, NodeSettings,
    NodeType,
};
use cybersim_packet::Ipv4Network;
use cybersim_software::{SoftwareKind, SoftwareOptions, SoftwareTimings, SoftwareType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from loading a scenario or building a simulation from it.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Link to a node that does not exist, or removal of an unknown link.
    #[error("Invalid link: {a} <-> {b}")]
    InvalidLink {
        /// First endpoint.
        a: String,
        /// Second endpoint.
        b: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Property value out of range for its type.
    #[error("Property error: {0}")]
    Property(#[from] PropertySetError),

    /// Topology building failed.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

// ============================================================================
// Configuration Types
// ============================================================================

fn default_subnet_mask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn default_true() -> bool {
    true
}

fn any_token() -> String {
    "ANY".to_string()
}

fn none_token() -> String {
    "NONE".to_string()
}

/// One network interface of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    /// Port number on the node.
    pub port: u16,
    /// Address; ignored on switches.
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,
    /// Subnet mask.
    #[serde(default = "default_subnet_mask")]
    pub subnet_mask: Ipv4Addr,
    /// Whether the interface comes up with the node.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A program to install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftwareConfig {
    /// Program type, e.g. `DatabaseService`.
    #[serde(rename = "type")]
    pub software_type: String,
    /// Installed name; defaults to the type name.
    #[serde(default)]
    pub name: Option<String>,
    /// Type-specific options.
    #[serde(default)]
    pub options: SoftwareOptions,
    /// Start the program once the node is on (applications only need this).
    #[serde(default)]
    pub running: bool,
}

/// A file to create at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Folder, created if missing.
    pub folder: String,
    /// File name with extension.
    pub name: String,
    /// Size in bytes; derived from the file type if absent.
    #[serde(default)]
    pub size: Option<u64>,
}

/// An explicit ACL rule. Addresses, ports and protocol accept `ANY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclRuleConfig {
    /// Slot, `0..max_rules - 1`.
    pub position: usize,
    /// PERMIT or DENY.
    pub action: String,
    /// TCP, UDP, ICMP or ANY.
    #[serde(default = "any_token")]
    pub protocol: String,
    /// Source address.
    #[serde(default = "any_token")]
    pub src_ip: String,
    /// Cisco-style wildcard for the source address.
    #[serde(default = "none_token")]
    pub src_wildcard: String,
    /// Source port number or name.
    #[serde(default = "any_token")]
    pub src_port: String,
    /// Destination address.
    #[serde(default = "any_token")]
    pub dst_ip: String,
    /// Cisco-style wildcard for the destination address.
    #[serde(default = "none_token")]
    pub dst_wildcard: String,
    /// Destination port number or name.
    #[serde(default = "any_token")]
    pub dst_port: String,
}

impl AclRuleConfig {
    /// The rule as request arguments.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.action.clone(),
            self.protocol.clone(),
            self.src_ip.clone(),
            self.src_wildcard.clone(),
            self.src_port.clone(),
            self.dst_ip.clone(),
            self.dst_wildcard.clone(),
            self.dst_port.clone(),
        ]
    }
}

/// A static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Destination network address.
    pub address: Ipv4Addr,
    /// Destination network mask.
    pub subnet_mask: Ipv4Addr,
    /// Gateway.
    pub next_hop: Ipv4Addr,
}

// ============================================================================
// Public Model API (Resolved Properties)
// ============================================================================

/// A loaded scenario with every property resolved.
#[derive(Debug, Clone)]
pub struct Model {
    nodes: BTreeMap<String, NodeModel>,
    links: BTreeMap<(LinkEndpoint, LinkEndpoint), LinkModel>,
    accounts: Vec<AccountConfig>,
    agents: Vec<AgentConfig>,
    simulation: ResolvedProperties<SimulationScope>,
}

impl Model {
    /// Nodes by hostname.
    pub fn nodes(&self) -> &BTreeMap<String, NodeModel> {
        &self.nodes
    }

    /// Find a node by hostname.
    pub fn find_node(&self, hostname: &str) -> Option<&NodeModel> {
        self.nodes.get(hostname)
    }

    /// Links, keyed by their endpoints.
    pub fn links(&self) -> impl Iterator<Item = &LinkModel> {
        self.links.values()
    }

    /// Domain accounts.
    pub fn accounts(&self) -> &[AccountConfig] {
        &self.accounts
    }

    /// Scripted agents, in registration order.
    pub fn agents(&self) -> &[AgentConfig] {
        &self.agents
    }

    /// Simulation-wide properties.
    pub fn simulation_properties(&self) -> &ResolvedProperties<SimulationScope> {
        &self.simulation
    }

    /// Seed from `simulation/seed`.
    pub fn seed(&self) -> Result<u64, ModelError> {
        Ok(self.simulation.get(&SIMULATION_SEED)?)
    }

    /// Episode length from `simulation/steps`.
    pub fn steps(&self) -> Result<u64, ModelError> {
        Ok(self.simulation.get(&SIMULATION_STEPS)?)
    }
}

/// A node with its structure and resolved properties.
#[derive(Debug, Clone)]
pub struct NodeModel {
    /// Unique hostname.
    pub hostname: String,
    /// Node type.
    pub node_type: NodeType,
    /// Whether the node starts ON.
    pub powered_on: bool,
    /// Gateway for hosts.
    pub default_gateway: Option<Ipv4Addr>,
    /// Switch ports `1..=num_ports` created in addition to `interfaces`.
    pub num_ports: Option<u16>,
    /// Interfaces.
    pub interfaces: Vec<InterfaceConfig>,
    /// Services.
    pub services: Vec<SoftwareConfig>,
    /// Applications.
    pub applications: Vec<SoftwareConfig>,
    /// Files created at build time.
    pub files: Vec<FileConfig>,
    /// ACL rules (routers and firewalls).
    pub acl_rules: Vec<AclRuleConfig>,
    /// Static routes (routers and firewalls).
    pub routes: Vec<RouteConfig>,
    /// Default route (routers and firewalls).
    pub default_route: Option<Ipv4Addr>,
    properties: ResolvedProperties<NodeScope>,
}

impl NodeModel {
    /// Resolved properties.
    pub fn properties(&self) -> &ResolvedProperties<NodeScope> {
        &self.properties
    }

    /// Node durations and capacities from the resolved properties.
    pub fn settings(&self) -> Result<NodeSettings, ModelError> {
        let p = &self.properties;
        let acl_implicit_action = match p.get(&ACL_IMPLICIT_ACTION)? {
            Some(action) => Some(action.parse::<AclAction>().map_err(|e| {
                ModelError::InvalidConfig(format!("{}: acl/implicit_action: {}", self.hostname, e))
            })?),
            None => None,
        };
        Ok(NodeSettings {
            start_up_duration: p.get(&NODE_START_UP_DURATION)?,
            shut_down_duration: p.get(&NODE_SHUT_DOWN_DURATION)?,
            scan_duration: p.get(&NODE_SCAN_DURATION)?,
            software: SoftwareTimings {
                patching_duration: p.get(&SOFTWARE_PATCHING_DURATION)?,
                restart_duration: p.get(&SOFTWARE_RESTART_DURATION)?,
                install_duration: p.get(&SOFTWARE_INSTALL_DURATION)?,
                max_sessions: p.get(&SOFTWARE_MAX_SESSIONS)?,
            },
            file_system: FileSystemLimits {
                scanning_limit: p.get(&FILE_SYSTEM_SCANNING_LIMIT)?,
                repairing_limit: p.get(&FILE_SYSTEM_REPAIRING_LIMIT)?,
                restoring_limit: p.get(&FILE_SYSTEM_RESTORING_LIMIT)?,
            },
            max_acl_rules: p.get(&ACL_MAX_RULES)?,
            acl_implicit_action,
        })
    }
}

/// A link with resolved properties.
#[derive(Debug, Clone)]
pub struct LinkModel {
    /// First endpoint.
    pub a: LinkEndpoint,
    /// Second endpoint.
    pub b: LinkEndpoint,
    properties: ResolvedProperties<LinkScope>,
}

impl LinkModel {
    /// Resolved properties.
    pub fn properties(&self) -> &ResolvedProperties<LinkScope> {
        &self.properties
    }
}

// ============================================================================
// YAML Schema Types (Internal)
// ============================================================================

/// `defaults:` section. Properties are nested under their scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultsYaml {
    #[serde(default)]
    node: UnresolvedProperties<NodeScope>,
    #[serde(default)]
    link: UnresolvedProperties<LinkScope>,
}

/// Root of a scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioYaml {
    #[serde(default)]
    defaults: DefaultsYaml,
    #[serde(default)]
    simulation: Option<UnresolvedProperties<SimulationScope>>,
    #[serde(default)]
    nodes: Vec<NodeConfigYaml>,
    #[serde(default)]
    links: Vec<LinkConfigYaml>,
    #[serde(default)]
    accounts: Vec<AccountConfig>,
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

/// A node entry. Keys that are not fields are node properties, so unknown
/// keys are rejected by the property registry.
#[derive(Debug, Clone, Deserialize)]
struct NodeConfigYaml {
    hostname: String,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    /// Drop the node (and its links) defined by an earlier file.
    #[serde(default)]
    remove: bool,
    #[serde(default)]
    powered_on: Option<bool>,
    #[serde(default)]
    default_gateway: Option<Ipv4Addr>,
    #[serde(default)]
    num_ports: Option<u16>,
    #[serde(default)]
    interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    services: Vec<SoftwareConfig>,
    #[serde(default)]
    applications: Vec<SoftwareConfig>,
    #[serde(default)]
    files: Vec<FileConfig>,
    #[serde(default)]
    acl_rules: Vec<AclRuleConfig>,
    #[serde(default)]
    routes: Vec<RouteConfig>,
    #[serde(default)]
    default_route: Option<Ipv4Addr>,
    #[serde(flatten)]
    properties: UnresolvedProperties<NodeScope>,
}

impl NodeConfigYaml {
    /// Layer a later definition of the same node over this one. Scalars
    /// given in `other` win; lists given in `other` replace.
    fn overlay(&mut self, other: NodeConfigYaml) {
        fn replace<T>(target: &mut Vec<T>, other: Vec<T>) {
            if !other.is_empty() {
                *target = other;
            }
        }
        self.node_type = other.node_type.or(self.node_type.take());
        self.powered_on = other.powered_on.or(self.powered_on);
        self.default_gateway = other.default_gateway.or(self.default_gateway);
        self.num_ports = other.num_ports.or(self.num_ports);
        self.default_route = other.default_route.or(self.default_route);
        replace(&mut self.interfaces, other.interfaces);
        replace(&mut self.services, other.services);
        replace(&mut self.applications, other.applications);
        replace(&mut self.files, other.files);
        replace(&mut self.acl_rules, other.acl_rules);
        replace(&mut self.routes, other.routes);
        self.properties.merge(&other.properties);
    }
}

/// A link entry.
#[derive(Debug, Clone, Deserialize)]
struct LinkConfigYaml {
    a: LinkEndpoint,
    b: LinkEndpoint,
    /// Drop the link defined by an earlier file.
    #[serde(default)]
    remove: bool,
    #[serde(flatten)]
    properties: UnresolvedProperties<LinkScope>,
}

// ============================================================================
// Model Loading
// ============================================================================

/// Load a scenario from a file.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    load_models(&[path])
}

/// Parse a scenario from a YAML string.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_models_from_str(&[yaml_str])
}

/// Load and merge several scenario files.
///
/// Later files override earlier ones:
/// - `defaults:` and `simulation:` values override earlier values
/// - a node with an existing hostname is layered over the earlier definition
/// - links, accounts and agents with an existing key replace the earlier entry
///
/// References are validated on the merged result only.
pub fn load_models(paths: &[&Path]) -> Result<Model, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No scenario files provided".to_string()));
    }
    let yaml_strings = paths
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(String::as_str).collect();
    load_models_from_str(&yaml_strs)
}

/// Load and merge several scenario strings. See [`load_models`].
pub fn load_models_from_str(yaml_strs: &[&str]) -> Result<Model, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No scenario strings provided".to_string()));
    }

    let mut node_defaults: ResolvedProperties<NodeScope> = ResolvedProperties::new();
    let mut link_defaults: ResolvedProperties<LinkScope> = ResolvedProperties::new();
    let mut simulation: ResolvedProperties<SimulationScope> = ResolvedProperties::new();

    let mut scenarios = Vec::new();
    for yaml_str in yaml_strs {
        let scenario: ScenarioYaml = serde_yaml::from_str(yaml_str)?;
        node_defaults.apply_unresolved(&scenario.defaults.node);
        link_defaults.apply_unresolved(&scenario.defaults.link);
        scenarios.push(scenario);
    }

    let mut node_configs: BTreeMap<String, NodeConfigYaml> = BTreeMap::new();
    let mut link_configs: BTreeMap<(LinkEndpoint, LinkEndpoint), LinkConfigYaml> = BTreeMap::new();
    let mut accounts: Vec<AccountConfig> = Vec::new();
    let mut agents: Vec<AgentConfig> = Vec::new();

    for scenario in scenarios {
        for node in scenario.nodes {
            if node.remove {
                if node_configs.remove(&node.hostname).is_none() {
                    return Err(ModelError::NodeNotFound(node.hostname));
                }
                link_configs.retain(|(a, b), _| a.hostname != node.hostname && b.hostname != node.hostname);
            } else if let Some(existing) = node_configs.get_mut(&node.hostname) {
                existing.overlay(node);
            } else {
                node_configs.insert(node.hostname.clone(), node);
            }
        }

        for link in scenario.links {
            let key = link_key(&link.a, &link.b);
            if link.remove {
                if link_configs.remove(&key).is_none() {
                    return Err(ModelError::InvalidLink {
                        a: link.a.to_string(),
                        b: link.b.to_string(),
                    });
                }
            } else {
                link_configs.insert(key, link);
            }
        }

        for account in scenario.accounts {
            match accounts.iter_mut().find(|a| a.username == account.username) {
                Some(existing) => *existing = account,
                None => accounts.push(account),
            }
        }
        for agent in scenario.agents {
            match agents.iter_mut().find(|a| a.name == agent.name) {
                Some(existing) => *existing = agent,
                None => agents.push(agent),
            }
        }

        if let Some(sim_props) = scenario.simulation {
            simulation.apply_unresolved(&sim_props);
        }
    }

    let mut nodes = BTreeMap::new();
    for (hostname, config) in node_configs {
        let node_type = config
            .node_type
            .as_deref()
            .ok_or_else(|| ModelError::InvalidConfig(format!("node {} has no type", hostname)))?
            .parse::<NodeType>()?;
        let mut properties = node_defaults.clone();
        properties.apply_unresolved(&config.properties);
        nodes.insert(
            hostname.clone(),
            NodeModel {
                hostname,
                node_type,
                powered_on: config.powered_on.unwrap_or(true),
                default_gateway: config.default_gateway,
                num_ports: config.num_ports,
                interfaces: config.interfaces,
                services: config.services,
                applications: config.applications,
                files: config.files,
                acl_rules: config.acl_rules,
                routes: config.routes,
                default_route: config.default_route,
                properties,
            },
        );
    }

    let mut links = BTreeMap::new();
    for (key, config) in link_configs {
        if !nodes.contains_key(&config.a.hostname) || !nodes.contains_key(&config.b.hostname) {
            return Err(ModelError::InvalidLink {
                a: config.a.to_string(),
                b: config.b.to_string(),
            });
        }
        let mut properties = link_defaults.clone();
        properties.apply_unresolved(&config.properties);
        links.insert(
            key,
            LinkModel {
                a: config.a,
                b: config.b,
                properties,
            },
        );
    }

    for agent in &agents {
        if agent.frequency == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "agent {}: frequency must be at least 1",
                agent.name
            )));
        }
        if agent.action_path().is_empty() {
            return Err(ModelError::InvalidConfig(format!("agent {}: empty action", agent.name)));
        }
    }

    Ok(Model {
        nodes,
        links,
        accounts,
        agents,
        simulation,
    })
}

/// Links are undirected; key them by their ordered endpoints.
fn link_key(a: &LinkEndpoint, b: &LinkEndpoint) -> (LinkEndpoint, LinkEndpoint) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

// ============================================================================
// Simulation Building
// ============================================================================

/// Everything a simulation needs, built from a model.
#[derive(Debug, Clone)]
pub struct BuiltSimulation {
    /// Context holding the seeded RNG the build drew from.
    pub ctx: SimContext,
    /// The network.
    pub network: Network,
    /// Accounts for the domain controller.
    pub accounts: Vec<AccountConfig>,
    /// Scripted agents, in registration order.
    pub agents: Vec<AgentConfig>,
    /// Episode length.
    pub steps: u64,
}

/// Build a simulation from a model.
///
/// Every id and MAC address is drawn from a context seeded with `seed`, so
/// the same model and seed build the same network.
pub fn build_simulation(model: &Model, seed: u64) -> Result<BuiltSimulation, ModelError> {
    let mut ctx = SimContext::new(seed);
    let sim = model.simulation_properties();
    let nmne = NmneConfig {
        capture_nmne: sim.get(&NMNE_CAPTURE)?,
        keywords: sim.get(&NMNE_KEYWORDS)?,
    };
    let mut network = Network::new(&mut ctx, nmne);

    for node_model in model.nodes().values() {
        let node = build_node(&mut ctx, node_model)?;
        network.add_node(node)?;
    }

    for link in model.links() {
        let bandwidth = link.properties().get(&LINK_BANDWIDTH_MBPS)?;
        network.connect(&mut ctx, link.a.clone(), link.b.clone(), bandwidth)?;
    }

    info!(
        nodes = network.nodes().len(),
        links = network.links().len(),
        agents = model.agents().len(),
        seed,
        "simulation built"
    );

    Ok(BuiltSimulation {
        ctx,
        network,
        accounts: model.accounts().to_vec(),
        agents: model.agents().to_vec(),
        steps: model.steps()?,
    })
}

fn build_node(ctx: &mut SimContext, model: &NodeModel) -> Result<Node, ModelError> {
    let hostname = model.hostname.as_str();
    let mut node = Node::new(ctx, hostname, model.node_type, model.settings()?);

    for iface in &model.interfaces {
        let network = iface
            .ip_address
            .map(|ip| Ipv4Network::new(ip, iface.subnet_mask));
        node.add_interface(ctx, iface.port, network)?;
    }
    if let Some(count) = model.num_ports {
        for port in 1..=count {
            if node.interface(port).is_none() {
                node.add_interface(ctx, port, None)?;
            }
        }
    }
    if let Some(gateway) = model.default_gateway {
        node.set_default_gateway(gateway)?;
    }

    let software = model
        .services
        .iter()
        .map(|sw| (SoftwareKind::Service, sw))
        .chain(model.applications.iter().map(|sw| (SoftwareKind::Application, sw)));
    let mut to_start = Vec::new();
    for (kind, sw) in software {
        let software_type = sw
            .software_type
            .parse::<SoftwareType>()
            .map_err(NetworkError::from)?;
        let name = sw.name.as_deref().unwrap_or(software_type.name());
        node.install_software(ctx, name, kind, software_type, &sw.options)?;
        if sw.running && kind == SoftwareKind::Application {
            to_start.push(name.to_string());
        }
    }

    for file in &model.files {
        node.file_system_mut()
            .create_file(ctx, &file.folder, &file.name, file.size)
            .map_err(NetworkError::from)?;
    }

    if !model.acl_rules.is_empty() {
        let acl = node
            .acl_mut()
            .ok_or_else(|| NetworkError::NotARouter(hostname.to_string()))?;
        for rule in &model.acl_rules {
            let AclRuleArgs { rule: parsed } = AclRuleArgs::from_args(&rule.to_args()).map_err(|e| {
                ModelError::InvalidConfig(format!("{}: acl rule {}: {}", hostname, rule.position, e))
            })?;
            if !acl.add_rule(parsed, rule.position) {
                return Err(ModelError::InvalidConfig(format!(
                    "{}: acl position {} is out of range or already used",
                    hostname, rule.position
                )));
            }
        }
    }

    if !model.routes.is_empty() || model.default_route.is_some() {
        let routes = node
            .routes_mut()
            .ok_or_else(|| NetworkError::NotARouter(hostname.to_string()))?;
        for route in &model.routes {
            routes.add(Ipv4Network::new(route.address, route.subnet_mask), route.next_hop);
        }
        routes.set_default_route(model.default_route);
    }

    if model.powered_on {
        node.power_on_now();
        for iface in model.interfaces.iter().filter(|i| !i.enabled) {
            if let Some(nic) = node.interface_mut(iface.port) {
                nic.disable();
            }
        }
        for name in &to_start {
            if let Some(software) = node.software_manager_mut().get_mut(name) {
                if let Err(reason) = software.core_mut().start() {
                    debug!(node = %hostname, software = %name, reason, "not started");
                }
            }
        }
    }
    debug!(node = %hostname, node_type = %model.node_type, powered_on = model.powered_on, "node built");
    Ok(node)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cybersim_common::SimComponent;
    use cybersim_network::NodeOperatingState;
    use cybersim_software::OperatingState;

    const OFFICE: &str = r#"
defaults:
  node:
    node:
      start_up_duration: 1
simulation:
  simulation:
    seed: 11
    steps: 20
nodes:
  - hostname: client_1
    type: computer
    default_gateway: 192.168.1.1
    interfaces:
      - { port: 1, ip_address: 192.168.1.21 }
    applications:
      - type: WebBrowser
        name: web_browser
        running: true
        options: { target_url: "http://192.168.10.10/" }
  - hostname: switch_1
    type: switch
    num_ports: 4
  - hostname: router_1
    type: router
    acl:
      implicit_action: DENY
    interfaces:
      - { port: 1, ip_address: 192.168.1.1 }
      - { port: 2, ip_address: 192.168.10.1 }
    acl_rules:
      - { position: 0, action: PERMIT, protocol: TCP, dst_port: HTTP }
      - { position: 1, action: PERMIT, protocol: TCP, src_port: "80" }
  - hostname: web_server
    type: server
    default_gateway: 192.168.10.1
    interfaces:
      - { port: 1, ip_address: 192.168.10.10 }
    services:
      - { type: WebServer, name: web_server }
    files:
      - { folder: www, name: index.html }
links:
  - a: { hostname: client_1, port: 1 }
    b: { hostname: switch_1, port: 1 }
  - a: { hostname: switch_1, port: 4 }
    b: { hostname: router_1, port: 1 }
  - a: { hostname: router_1, port: 2 }
    b: { hostname: web_server, port: 1 }
    link:
      bandwidth_mbps: 10
accounts:
  - { username: admin, password: secret, admin: true }
agents:
  - name: green_user
    team: GREEN
    action: network node client_1 application web_browser execute
    frequency: 2
"#;

    #[test]
    fn test_load_office() {
        let model = load_model_from_str(OFFICE).unwrap();
        assert_eq!(model.nodes().len(), 4);
        assert_eq!(model.links().count(), 3);
        assert_eq!(model.seed().unwrap(), 11);
        assert_eq!(model.steps().unwrap(), 20);
        assert_eq!(model.accounts()[0].username, "admin");
        assert_eq!(model.agents()[0].team, Team::Green);

        let router = model.find_node("router_1").unwrap();
        assert_eq!(router.node_type, NodeType::Router);
        let settings = router.settings().unwrap();
        assert_eq!(settings.start_up_duration, 1);
        assert_eq!(settings.shut_down_duration, 3);
        assert_eq!(settings.acl_implicit_action, Some(AclAction::Deny));

        let bandwidths: Vec<f64> = model
            .links()
            .map(|l| l.properties().get(&LINK_BANDWIDTH_MBPS).unwrap())
            .collect();
        assert!(bandwidths.contains(&10.0));
        assert!(bandwidths.contains(&100.0));
    }

    #[test]
    fn test_build_office() {
        let model = load_model_from_str(OFFICE).unwrap();
        let built = build_simulation(&model, 11).unwrap();
        let network = &built.network;
        assert_eq!(network.nodes().len(), 4);
        assert_eq!(network.links().len(), 3);
        assert_eq!(built.steps, 20);

        let router = network.node("router_1").unwrap();
        assert_eq!(router.operating_state(), NodeOperatingState::On);
        assert_eq!(router.acl().unwrap().num_rules(), 2);
        assert_eq!(router.acl().unwrap().implicit_action(), AclAction::Deny);

        let switch = network.node("switch_1").unwrap();
        assert_eq!(switch.interfaces().len(), 4);

        let client = network.node("client_1").unwrap();
        let browser = client.software_manager().get("web_browser").unwrap();
        assert_eq!(browser.operating_state(), OperatingState::Running);

        let server = network.node("web_server").unwrap();
        assert!(server.file_system().file("www", "index.html").is_some());
    }

    #[test]
    fn test_same_seed_same_network() {
        let model = load_model_from_str(OFFICE).unwrap();
        let a = build_simulation(&model, 3).unwrap();
        let b = build_simulation(&model, 3).unwrap();
        let c = build_simulation(&model, 4).unwrap();
        assert_eq!(a.network.describe_state(), b.network.describe_state());
        assert_ne!(a.network.describe_state(), c.network.describe_state());
    }

    #[test]
    fn test_overlay_merges_nodes_and_removes_links() {
        let overlay = r#"
defaults:
  node:
    software:
      max_sessions: 1
nodes:
  - hostname: web_server
    node:
      shut_down_duration: 0
  - hostname: switch_1
    remove: true
  - hostname: switch_2
    type: switch
    num_ports: 2
links:
  - a: { hostname: switch_2, port: 1 }
    b: { hostname: client_1, port: 1 }
"#;
        let model = load_models_from_str(&[OFFICE, overlay]).unwrap();
        assert!(model.find_node("switch_1").is_none());
        assert_eq!(model.links().count(), 2);

        let server = model.find_node("web_server").unwrap();
        let settings = server.settings().unwrap();
        assert_eq!(settings.shut_down_duration, 0);
        assert_eq!(settings.software.max_sessions, 1);
        assert_eq!(server.services.len(), 1);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.yaml");
        std::fs::write(&path, OFFICE).unwrap();
        let model = load_model(&path).unwrap();
        assert_eq!(model.nodes().len(), 4);

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(load_model(&missing), Err(ModelError::IoError(_))));
        assert!(matches!(load_models(&[]), Err(ModelError::InvalidConfig(_))));
    }

    #[test]
    fn test_configuration_errors() {
        let unknown_type = "nodes:\n  - { hostname: a, type: mainframe }\n";
        assert!(matches!(
            load_model_from_str(unknown_type),
            Err(ModelError::Network(NetworkError::UnknownNodeType(_)))
        ));

        let no_type = "nodes:\n  - { hostname: a }\n";
        assert!(matches!(load_model_from_str(no_type), Err(ModelError::InvalidConfig(_))));

        let bad_address = "nodes:\n  - hostname: a\n    type: computer\n    interfaces:\n      - { port: 1, ip_address: 10.0.0.300 }\n";
        assert!(matches!(load_model_from_str(bad_address), Err(ModelError::YamlError(_))));

        let unknown_property = "nodes:\n  - hostname: a\n    type: computer\n    node:\n      warp_speed: 9\n";
        let err = load_model_from_str(unknown_property).unwrap_err();
        assert!(err.to_string().contains("node/warp_speed"), "{}", err);

        let dangling = "nodes:\n  - { hostname: a, type: computer }\nlinks:\n  - a: { hostname: a, port: 1 }\n    b: { hostname: b, port: 1 }\n";
        assert!(matches!(load_model_from_str(dangling), Err(ModelError::InvalidLink { .. })));

        let remove_missing = "nodes:\n  - { hostname: a, remove: true }\n";
        assert!(matches!(load_model_from_str(remove_missing), Err(ModelError::NodeNotFound(_))));

        let bad_agent = "agents:\n  - { name: x, team: RED, action: network, frequency: 0 }\n";
        assert!(matches!(load_model_from_str(bad_agent), Err(ModelError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_errors() {
        let acl_on_host = "nodes:\n  - hostname: pc\n    type: computer\n    acl_rules:\n      - { position: 0, action: PERMIT }\n";
        let model = load_model_from_str(acl_on_host).unwrap();
        assert!(matches!(
            build_simulation(&model, 0),
            Err(ModelError::Network(NetworkError::NotARouter(_)))
        ));

        let bad_rule = "nodes:\n  - hostname: r\n    type: router\n    acl_rules:\n      - { position: 0, action: ALLOW }\n";
        let model = load_model_from_str(bad_rule).unwrap();
        assert!(matches!(build_simulation(&model, 0), Err(ModelError::InvalidConfig(_))));

        let bad_slot = "nodes:\n  - hostname: r\n    type: router\n    acl:\n      max_rules: 2\n    acl_rules:\n      - { position: 1, action: DENY }\n";
        let model = load_model_from_str(bad_slot).unwrap();
        assert!(matches!(build_simulation(&model, 0), Err(ModelError::InvalidConfig(_))));

        let negative = "nodes:\n  - hostname: pc\n    type: computer\n    node:\n      scan_duration: -1\n";
        let model = load_model_from_str(negative).unwrap();
        assert!(matches!(build_simulation(&model, 0), Err(ModelError::Property(_))));

        let missing_port = "nodes:\n  - { hostname: a, type: computer }\n  - { hostname: b, type: computer }\nlinks:\n  - a: { hostname: a, port: 1 }\n    b: { hostname: b, port: 1 }\n";
        let model = load_model_from_str(missing_port).unwrap();
        assert!(matches!(
            build_simulation(&model, 0),
            Err(ModelError::Network(NetworkError::UnknownInterface { .. }))
        ));
    }

    #[test]
    fn test_powered_off_node_and_disabled_interface() {
        let yaml = "nodes:\n  - hostname: pc\n    type: computer\n    powered_on: false\n  - hostname: srv\n    type: server\n    interfaces:\n      - { port: 1, ip_address: 10.0.0.1, enabled: false }\n      - { port: 2, ip_address: 10.0.1.1 }\n";
        let built = build_simulation(&load_model_from_str(yaml).unwrap(), 0).unwrap();
        let pc = built.network.node("pc").unwrap();
        assert_eq!(pc.operating_state(), NodeOperatingState::Off);
        let srv = built.network.node("srv").unwrap();
        assert!(!srv.interface(1).unwrap().is_enabled());
        assert!(srv.interface(2).unwrap().is_enabled());
    }
}
