//! Nodes: end hosts, switches, routers and firewalls.
//!
//! Every node owns its interfaces, a software manager and a file system.
//! What it does with frames depends on its [`NetworkLayer`]:
//!
//! - `Host`: delivers frames addressed to it to its software, answers ARP
//!   and ICMP echo, and sends off-subnet traffic to its default gateway
//! - `Switch`: learns source MACs and forwards or floods
//! - `Router`: checks the ACL, then routes by connected subnet, static
//!   route, and finally the default route, decrementing the TTL
//!
//! ## Power
//!
//! ```text
//! OFF --startup--> BOOTING --(start_up_duration)--> ON
//! ON --shutdown--> SHUTTING_DOWN --(shut_down_duration)--> OFF
//! ON --reset--> RESETTING --(shut_down_duration)--> BOOTING --> ON
//! ```
//!
//! A conflicting request restarts the transition with a fresh timer.

use crate::acl::{AccessControlList, AclAction, DEFAULT_MAX_ACL_RULES};
use crate::nic::NetworkInterface;
use crate::{NetworkError, NodeType};
use cybersim_common::{
    dispatch, metric_defs, parse_arg, Arity, ComponentId, FromArgs, RequestDef, RequestResponse,
    SimComponent, SimContext,
};
use cybersim_filesystem::{FileSystem, FileSystemLimits};
use cybersim_packet::{
    ArpOperation, ArpPacket, EthernetHeader, Frame, IcmpHeader, IcmpType, IpPacket, Ipv4Network,
    MacAddress, Payload, Transport,
};
use cybersim_software::{
    InboundMessage, OutboundMessage, SoftwareKind, SoftwareManager, SoftwareOptions,
    SoftwareTimings, SoftwareType,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Settings and States
// ============================================================================

/// Power state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOperatingState {
    /// Powered off.
    Off,
    /// Starting up.
    Booting,
    /// Running; the only state in which traffic flows.
    On,
    /// Powering off.
    ShuttingDown,
    /// Powering off before booting again.
    Resetting,
}

impl fmt::Display for NodeOperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeOperatingState::Off => "OFF",
            NodeOperatingState::Booting => "BOOTING",
            NodeOperatingState::On => "ON",
            NodeOperatingState::ShuttingDown => "SHUTTING_DOWN",
            NodeOperatingState::Resetting => "RESETTING",
        };
        write!(f, "{}", name)
    }
}

/// Durations and capacities of one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSettings {
    /// Steps from `startup` to ON.
    pub start_up_duration: u32,
    /// Steps from `shutdown` to OFF.
    pub shut_down_duration: u32,
    /// Steps a node scan takes.
    pub scan_duration: u32,
    /// Timings for installed software.
    pub software: SoftwareTimings,
    /// File-system timer limits.
    pub file_system: FileSystemLimits,
    /// ACL size including the implicit rule (routers and firewalls).
    pub max_acl_rules: usize,
    /// Override of the implicit ACL action; defaults by node type.
    pub acl_implicit_action: Option<AclAction>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            start_up_duration: 3,
            shut_down_duration: 3,
            scan_duration: 3,
            software: SoftwareTimings::default(),
            file_system: FileSystemLimits::default(),
            max_acl_rules: DEFAULT_MAX_ACL_RULES,
            acl_implicit_action: None,
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// A static route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination network.
    pub network: Ipv4Network,
    /// Gateway for that network.
    pub next_hop: Ipv4Addr,
}

/// Static routes plus an optional default route.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Keyed by (network address, mask).
    routes: BTreeMap<(Ipv4Addr, Ipv4Addr), Ipv4Addr>,
    default_route: Option<Ipv4Addr>,
}

impl RouteTable {
    /// Add or replace a route.
    pub fn add(&mut self, network: Ipv4Network, next_hop: Ipv4Addr) {
        let key = (network.network_address(), network.mask);
        self.routes.insert(key, next_hop);
    }

    /// Remove a route. Returns false if there was none.
    pub fn remove(&mut self, network: Ipv4Network) -> bool {
        self.routes
            .remove(&(network.network_address(), network.mask))
            .is_some()
    }

    /// Set the gateway of last resort.
    pub fn set_default_route(&mut self, next_hop: Option<Ipv4Addr>) {
        self.default_route = next_hop;
    }

    /// Gateway of last resort.
    pub fn default_route(&self) -> Option<Ipv4Addr> {
        self.default_route
    }

    /// All static routes in address order.
    pub fn routes(&self) -> Vec<Route> {
        self.routes
            .iter()
            .map(|(&(address, mask), &next_hop)| Route {
                network: Ipv4Network::new(address, mask),
                next_hop,
            })
            .collect()
    }

    /// Next hop for `dst`: longest matching prefix, then the default route.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes()
            .into_iter()
            .filter(|route| route.network.contains(dst))
            .max_by_key(|route| route.network.prefix_len())
            .map(|route| route.next_hop)
            .or(self.default_route)
    }

    fn describe_state(&self) -> Value {
        let routes: Map<String, Value> = self
            .routes()
            .into_iter()
            .map(|r| (r.network.to_string(), Value::from(r.next_hop.to_string())))
            .collect();
        json!({
            "routes": routes,
            "default_route": self.default_route.map(|ip| ip.to_string()),
        })
    }
}

struct RouteArgs {
    network: Ipv4Network,
    next_hop: Option<Ipv4Addr>,
}

impl FromArgs for RouteArgs {
    fn from_args(args: &[String]) -> Result<Self, String> {
        let address = parse_arg::<Ipv4Addr>(args, 0, "address")?;
        let mask = parse_arg::<Ipv4Addr>(args, 1, "mask")?;
        let next_hop = match args.get(2) {
            Some(_) => Some(parse_arg::<Ipv4Addr>(args, 2, "next hop")?),
            None => None,
        };
        Ok(RouteArgs {
            network: Ipv4Network::new(address, mask),
            next_hop,
        })
    }
}

fn route_add(table: &mut RouteTable, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match RouteArgs::from_args(args) {
        Ok(RouteArgs {
            network,
            next_hop: Some(next_hop),
        }) => {
            table.add(network, next_hop);
            RequestResponse::success()
        }
        Ok(_) => RequestResponse::failure("missing argument: next hop"),
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn route_remove(table: &mut RouteTable, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match RouteArgs::from_args(args) {
        Ok(RouteArgs { network, .. }) => {
            RequestResponse::from_bool(table.remove(network), format!("no route to {}", network))
        }
        Err(reason) => RequestResponse::failure(reason),
    }
}

/// Requests accepted by a route table.
pub const ROUTE_REQUESTS: &[RequestDef<RouteTable>] = &[
    RequestDef::new("add", "<address> <mask> <next_hop> Add a static route", Arity::Exact(3), route_add),
    RequestDef::new("remove", "<address> <mask> Remove a static route", Arity::Exact(2), route_remove),
];

// ============================================================================
// Network Layer
// ============================================================================

/// What a node does with frames.
#[derive(Debug, Clone)]
pub enum NetworkLayer {
    /// Computer or server.
    Host {
        /// Gateway for off-subnet traffic.
        default_gateway: Option<Ipv4Addr>,
    },
    /// Layer-2 switch.
    Switch {
        /// Learned MAC to port mapping.
        mac_table: BTreeMap<MacAddress, u16>,
    },
    /// Router or firewall.
    Router {
        /// Admission control applied to every routed frame.
        acl: AccessControlList,
        /// Static routes.
        routes: RouteTable,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    target: Ipv4Addr,
    identifier: u16,
    replied: bool,
}

/// Frames dropped or blocked during the current step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeTallies {
    blocked: u64,
    dropped: u64,
}

// ============================================================================
// Node
// ============================================================================

/// A device on the network.
#[derive(Debug, Clone)]
pub struct Node {
    id: ComponentId,
    hostname: String,
    node_type: NodeType,
    operating_state: NodeOperatingState,
    /// Steps left in the current power transition.
    countdown: u32,
    scan_countdown: Option<u32>,
    settings: NodeSettings,
    /// Interfaces by port number (BTreeMap for deterministic ordering).
    interfaces: BTreeMap<u16, NetworkInterface>,
    layer: NetworkLayer,
    software_manager: SoftwareManager,
    file_system: FileSystem,
    arp_cache: BTreeMap<Ipv4Addr, MacAddress>,
    /// Frames waiting for ARP: (next hop, egress port, frame).
    parked: Vec<(Ipv4Addr, u16, Frame)>,
    /// Frames ready to leave, collected by the network.
    egress: Vec<(u16, Frame)>,
    ping: Option<PendingPing>,
    next_ping_id: u16,
    tallies: NodeTallies,
}

impl Node {
    /// Create a powered-off node with no interfaces.
    pub fn new(
        ctx: &mut SimContext,
        hostname: impl Into<String>,
        node_type: NodeType,
        settings: NodeSettings,
    ) -> Self {
        let layer = match node_type {
            NodeType::Computer | NodeType::Server => NetworkLayer::Host {
                default_gateway: None,
            },
            NodeType::Switch => NetworkLayer::Switch {
                mac_table: BTreeMap::new(),
            },
            NodeType::Router | NodeType::Firewall => NetworkLayer::Router {
                acl: AccessControlList::new(
                    ctx,
                    settings
                        .acl_implicit_action
                        .unwrap_or_else(|| node_type.default_acl_action()),
                    settings.max_acl_rules,
                ),
                routes: RouteTable::default(),
            },
        };
        Node {
            id: ctx.new_id(),
            hostname: hostname.into(),
            node_type,
            operating_state: NodeOperatingState::Off,
            countdown: 0,
            scan_countdown: None,
            settings,
            interfaces: BTreeMap::new(),
            layer,
            software_manager: SoftwareManager::new(ctx, settings.software),
            file_system: FileSystem::new(ctx, settings.file_system),
            arp_cache: BTreeMap::new(),
            parked: Vec::new(),
            egress: Vec::new(),
            ping: None,
            next_ping_id: 1,
            tallies: NodeTallies::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Node type.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Power state.
    pub fn operating_state(&self) -> NodeOperatingState {
        self.operating_state
    }

    /// Check whether the node is fully on.
    pub fn is_on(&self) -> bool {
        self.operating_state == NodeOperatingState::On
    }

    /// Settings the node was built with.
    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// Interfaces by port.
    pub fn interfaces(&self) -> &BTreeMap<u16, NetworkInterface> {
        &self.interfaces
    }

    /// Interface on `port`.
    pub fn interface(&self, port: u16) -> Option<&NetworkInterface> {
        self.interfaces.get(&port)
    }

    /// Interface on `port`, mutably.
    pub fn interface_mut(&mut self, port: u16) -> Option<&mut NetworkInterface> {
        self.interfaces.get_mut(&port)
    }

    /// Network layer.
    pub fn layer(&self) -> &NetworkLayer {
        &self.layer
    }

    /// ACL of a router or firewall.
    pub fn acl(&self) -> Option<&AccessControlList> {
        match &self.layer {
            NetworkLayer::Router { acl, .. } => Some(acl),
            _ => None,
        }
    }

    /// ACL of a router or firewall, mutably.
    pub fn acl_mut(&mut self) -> Option<&mut AccessControlList> {
        match &mut self.layer {
            NetworkLayer::Router { acl, .. } => Some(acl),
            _ => None,
        }
    }

    /// Route table of a router or firewall, mutably.
    pub fn routes_mut(&mut self) -> Option<&mut RouteTable> {
        match &mut self.layer {
            NetworkLayer::Router { routes, .. } => Some(routes),
            _ => None,
        }
    }

    /// Software manager.
    pub fn software_manager(&self) -> &SoftwareManager {
        &self.software_manager
    }

    /// Software manager, mutably.
    pub fn software_manager_mut(&mut self) -> &mut SoftwareManager {
        &mut self.software_manager
    }

    /// File system.
    pub fn file_system(&self) -> &FileSystem {
        &self.file_system
    }

    /// File system, mutably.
    pub fn file_system_mut(&mut self) -> &mut FileSystem {
        &mut self.file_system
    }

    /// Cached ARP resolution.
    pub fn arp_entry(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.arp_cache.get(&ip).copied()
    }

    /// Frames blocked by the ACL this step.
    pub fn frames_blocked(&self) -> u64 {
        self.tallies.blocked
    }

    /// Frames the node could not send or route this step.
    pub fn frames_dropped(&self) -> u64 {
        self.tallies.dropped
    }

    // ------------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------------

    /// Add an interface. Switch ports take no address.
    pub fn add_interface(
        &mut self,
        ctx: &mut SimContext,
        port: u16,
        network: Option<Ipv4Network>,
    ) -> Result<&mut NetworkInterface, NetworkError> {
        if self.interfaces.contains_key(&port) {
            return Err(NetworkError::DuplicateInterface {
                host: self.hostname.clone(),
                port,
            });
        }
        let network = match self.layer {
            NetworkLayer::Switch { .. } => None,
            _ => network,
        };
        let mut nic = NetworkInterface::new(ctx, port, network);
        if self.is_on() {
            nic.enable();
        }
        Ok(self.interfaces.entry(port).or_insert(nic))
    }

    /// Set the default gateway of a computer or server.
    pub fn set_default_gateway(&mut self, gateway: Ipv4Addr) -> Result<(), NetworkError> {
        match &mut self.layer {
            NetworkLayer::Host { default_gateway } => {
                *default_gateway = Some(gateway);
                Ok(())
            }
            _ => Err(NetworkError::NotAHost(self.hostname.clone())),
        }
    }

    /// Install software at build time.
    pub fn install_software(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
        kind: SoftwareKind,
        software_type: SoftwareType,
        options: &SoftwareOptions,
    ) -> Result<(), NetworkError> {
        self.software_manager
            .install(ctx, &mut self.file_system, name, kind, software_type, options)?;
        if self.is_on() && kind == SoftwareKind::Service {
            self.software_manager.power_on();
        }
        Ok(())
    }

    /// Turn the node on without a boot delay (scenario start).
    pub fn power_on_now(&mut self) {
        self.finish_boot();
    }

    // ------------------------------------------------------------------------
    // Power
    // ------------------------------------------------------------------------

    /// Begin booting. Returns false if the node is already on or booting.
    pub fn startup(&mut self) -> bool {
        match self.operating_state {
            NodeOperatingState::Off | NodeOperatingState::ShuttingDown => {
                self.begin_boot();
                true
            }
            _ => false,
        }
    }

    /// Begin shutting down. Returns false if the node is off or already
    /// shutting down.
    pub fn shutdown(&mut self) -> bool {
        match self.operating_state {
            NodeOperatingState::On
            | NodeOperatingState::Booting
            | NodeOperatingState::Resetting => {
                self.begin_shutdown(NodeOperatingState::ShuttingDown);
                true
            }
            _ => false,
        }
    }

    /// Shut down and boot again. Only allowed while on.
    pub fn reset(&mut self) -> bool {
        if !self.is_on() {
            return false;
        }
        self.begin_shutdown(NodeOperatingState::Resetting);
        true
    }

    fn begin_boot(&mut self) {
        if self.settings.start_up_duration == 0 {
            self.finish_boot();
        } else {
            debug!(node = %self.hostname, "booting");
            self.operating_state = NodeOperatingState::Booting;
            self.countdown = self.settings.start_up_duration;
        }
    }

    fn finish_boot(&mut self) {
        self.operating_state = NodeOperatingState::On;
        self.countdown = 0;
        for nic in self.interfaces.values_mut() {
            nic.enable();
        }
        self.software_manager.power_on();
        info!(node = %self.hostname, "node on");
    }

    fn begin_shutdown(&mut self, state: NodeOperatingState) {
        if self.settings.shut_down_duration == 0 {
            self.finish_shutdown();
            if state == NodeOperatingState::Resetting {
                self.begin_boot();
            }
        } else {
            debug!(node = %self.hostname, %state, "powering down");
            self.operating_state = state;
            self.countdown = self.settings.shut_down_duration;
        }
    }

    fn finish_shutdown(&mut self) {
        self.operating_state = NodeOperatingState::Off;
        self.countdown = 0;
        self.scan_countdown = None;
        for nic in self.interfaces.values_mut() {
            nic.disable();
        }
        self.software_manager.power_off();
        self.ping = None;
        self.parked.clear();
        self.egress.clear();
        self.arp_cache.clear();
        if let NetworkLayer::Switch { mac_table } = &mut self.layer {
            mac_table.clear();
        }
        info!(node = %self.hostname, "node off");
    }

    /// Start a scan revealing the health of all software and files.
    pub fn start_scan(&mut self) {
        if self.settings.scan_duration == 0 {
            self.finish_scan();
        } else {
            self.scan_countdown = Some(self.settings.scan_duration);
        }
    }

    fn finish_scan(&mut self) {
        self.scan_countdown = None;
        self.software_manager.scan_all();
        self.file_system.reveal_all();
        debug!(node = %self.hostname, "node scan complete");
    }

    // ------------------------------------------------------------------------
    // Timestep
    // ------------------------------------------------------------------------

    /// Clear per-step counters and frames stuck waiting for ARP.
    pub fn pre_timestep(&mut self) {
        for nic in self.interfaces.values_mut() {
            nic.pre_timestep();
        }
        self.file_system.pre_timestep();
        self.tallies = NodeTallies::default();
        if !self.parked.is_empty() {
            trace!(node = %self.hostname, frames = self.parked.len(), "unresolved frames discarded");
            self.parked.clear();
        }
    }

    /// Advance power and scan timers, software, and the file system.
    pub fn apply_timestep(&mut self, ctx: &mut SimContext) {
        match self.operating_state {
            NodeOperatingState::Booting => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown == 0 {
                    self.finish_boot();
                }
            }
            NodeOperatingState::ShuttingDown => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown == 0 {
                    self.finish_shutdown();
                }
            }
            NodeOperatingState::Resetting => {
                self.countdown = self.countdown.saturating_sub(1);
                if self.countdown == 0 {
                    self.finish_shutdown();
                    self.begin_boot();
                }
            }
            NodeOperatingState::On | NodeOperatingState::Off => {}
        }

        if let Some(remaining) = self.scan_countdown {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.finish_scan();
            } else {
                self.scan_countdown = Some(remaining);
            }
        }

        self.software_manager.apply_timestep(&mut self.file_system, ctx);
        self.file_system.apply_timestep();
    }

    // ------------------------------------------------------------------------
    // Outstanding requests
    // ------------------------------------------------------------------------

    /// Send one ICMP echo request. The outcome is known after [`Node::settle`].
    pub fn ping(&mut self, target: Ipv4Addr) -> RequestResponse {
        let identifier = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        let echo = Transport::Icmp(IcmpHeader::echo_request(identifier, 0));
        if !self.send_ip(target, echo, Payload::None) {
            return RequestResponse::failure(format!("no route to {}", target));
        }
        self.ping = Some(PendingPing {
            target,
            identifier,
            replied: false,
        });
        RequestResponse::pending()
    }

    /// Check whether a request is waiting on network traffic.
    pub fn is_awaiting(&self) -> bool {
        self.ping.is_some() || self.software_manager.is_awaiting()
    }

    /// Finish the outstanding request after the network has drained.
    pub fn settle(&mut self, ctx: &mut SimContext) -> RequestResponse {
        if let Some(ping) = self.ping.take() {
            return RequestResponse::from_bool(ping.replied, format!("no reply from {}", ping.target));
        }
        self.software_manager.settle(ctx)
    }

    /// Abandon the outstanding request.
    pub fn cancel_pending(&mut self) {
        self.ping = None;
        self.software_manager.cancel_pending();
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Turn queued software traffic into frames and hand over every frame
    /// ready to leave, with its egress port.
    pub fn collect_egress(&mut self) -> Vec<(u16, Frame)> {
        let outbox = self.software_manager.take_outbox();
        if self.is_on() {
            for msg in outbox {
                self.send_message(msg);
            }
        }
        std::mem::take(&mut self.egress)
    }

    fn send_message(&mut self, msg: OutboundMessage) {
        match Transport::for_ports(msg.protocol, msg.src_port, msg.dst_port) {
            Some(transport) => {
                self.send_ip(msg.dst_ip, transport, msg.payload);
            }
            None => debug!(node = %self.hostname, protocol = %msg.protocol, "software message without ports ignored"),
        }
    }

    /// Egress port and next-hop address for `dst`.
    fn egress_for(&self, dst: Ipv4Addr) -> Option<(u16, Ipv4Addr)> {
        let connected = |ip: Ipv4Addr| {
            self.interfaces
                .values()
                .find(|nic| nic.network().is_some_and(|n| n.contains(ip)))
                .map(|nic| nic.port())
        };
        if let Some(port) = connected(dst) {
            return Some((port, dst));
        }
        let gateway = match &self.layer {
            NetworkLayer::Host { default_gateway } => *default_gateway,
            NetworkLayer::Router { routes, .. } => routes.lookup(dst),
            NetworkLayer::Switch { .. } => None,
        }?;
        connected(gateway).map(|port| (port, gateway))
    }

    /// Build and queue a frame from this node. Returns false if there is no
    /// way to reach `dst`.
    fn send_ip(&mut self, dst: Ipv4Addr, transport: Transport, payload: Payload) -> bool {
        if !self.is_on() {
            return false;
        }
        let Some((port, next_hop)) = self.egress_for(dst) else {
            debug!(node = %self.hostname, %dst, "no route");
            self.count_drop("no_route");
            return false;
        };
        let Some((src_mac, Some(src_ip))) = self
            .interfaces
            .get(&port)
            .map(|nic| (nic.mac_address(), nic.ip_address()))
        else {
            return false;
        };
        let protocol = transport.protocol();
        let frame = match Frame::new(
            EthernetHeader::new(src_mac, MacAddress::BROADCAST),
            IpPacket::new(src_ip, dst, protocol),
            transport,
            payload,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(node = %self.hostname, error = %e, "frame not built");
                return false;
            }
        };
        self.forward(port, next_hop, frame);
        true
    }

    /// Queue `frame` on `port` towards `next_hop`, resolving its MAC first
    /// if needed.
    fn forward(&mut self, port: u16, next_hop: Ipv4Addr, frame: Frame) {
        let Some(nic) = self.interfaces.get(&port) else {
            return;
        };
        let src_mac = nic.mac_address();
        if let Some(dst_mac) = self.arp_cache.get(&next_hop) {
            let frame = frame.with_ethernet(EthernetHeader::new(src_mac, *dst_mac));
            self.egress.push((port, frame));
            return;
        }

        let already_asked = self.parked.iter().any(|(hop, _, _)| *hop == next_hop);
        self.parked.push((next_hop, port, frame));
        if already_asked {
            return;
        }
        if let Some(src_ip) = nic.ip_address() {
            let request = ArpPacket::request(src_mac, src_ip, next_hop);
            trace!(node = %self.hostname, %next_hop, "ARP request");
            self.egress
                .push((port, Frame::arp(src_mac, MacAddress::BROADCAST, request)));
        }
    }

    fn release_parked(&mut self, ip: Ipv4Addr, mac: MacAddress) {
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.parked).into_iter().partition(|(hop, _, _)| *hop == ip);
        self.parked = waiting;
        for (_, port, frame) in ready {
            if let Some(nic) = self.interfaces.get(&port) {
                let frame = frame.with_ethernet(EthernetHeader::new(nic.mac_address(), mac));
                self.egress.push((port, frame));
            }
        }
    }

    fn count_drop(&mut self, reason: &'static str) {
        self.tallies.dropped += 1;
        let labels = vec![("reason", reason.to_string())];
        metrics::counter!(metric_defs::FRAMES_DROPPED.name, &labels).increment(1);
    }

    // ------------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------------

    /// Check whether `port` can pass traffic right now.
    pub fn port_is_up(&self, port: u16) -> bool {
        self.is_on() && self.interfaces.get(&port).is_some_and(|nic| nic.is_enabled())
    }

    /// Handle a frame arriving on `port`.
    pub fn receive_frame(&mut self, port: u16, frame: Frame, ctx: &mut SimContext) {
        if !self.port_is_up(port) {
            return;
        }
        if matches!(self.layer, NetworkLayer::Switch { .. }) {
            self.switch_frame(port, frame);
            return;
        }

        let Some(nic) = self.interfaces.get(&port) else {
            return;
        };
        let dst_mac = frame.ethernet().dst_mac;
        if dst_mac != nic.mac_address() && !dst_mac.is_broadcast() {
            return;
        }
        if let Payload::Arp(arp) = frame.payload() {
            self.handle_arp(port, arp);
            return;
        }

        let dst_ip = frame.ip().dst_ip;
        let for_us = self
            .interfaces
            .values()
            .any(|nic| nic.ip_address() == Some(dst_ip));

        if let NetworkLayer::Router { acl, .. } = &self.layer {
            let ip = frame.ip();
            if acl.is_blocked(ip.src_ip, ip.dst_ip, ip.protocol, frame.src_port(), frame.dst_port()) {
                debug!(
                    node = %self.hostname,
                    src = %ip.src_ip,
                    dst = %ip.dst_ip,
                    protocol = %ip.protocol,
                    dst_port = ?frame.dst_port().map(|p| p.number()),
                    "frame blocked by ACL"
                );
                self.tallies.blocked += 1;
                let labels = vec![("node", self.hostname.clone())];
                metrics::counter!(metric_defs::ACL_BLOCKED.name, &labels).increment(1);
                return;
            }
            if !for_us {
                self.route_frame(frame);
                return;
            }
        }

        if for_us {
            self.deliver_local(frame, ctx);
        }
    }

    fn switch_frame(&mut self, ingress: u16, frame: Frame) {
        let NetworkLayer::Switch { mac_table } = &mut self.layer else {
            return;
        };
        let ethernet = *frame.ethernet();
        mac_table.insert(ethernet.src_mac, ingress);

        let known = if ethernet.dst_mac.is_broadcast() {
            None
        } else {
            mac_table.get(&ethernet.dst_mac).copied()
        };
        match known {
            Some(port) if port == ingress => {}
            Some(port) => self.egress.push((port, frame)),
            None => {
                for nic in self.interfaces.values() {
                    if nic.port() != ingress && nic.is_enabled() {
                        self.egress.push((nic.port(), frame.clone()));
                    }
                }
            }
        }
    }

    fn handle_arp(&mut self, port: u16, arp: &ArpPacket) {
        let Some(nic) = self.interfaces.get(&port) else {
            return;
        };
        let our_mac = nic.mac_address();
        let ours = nic.ip_address() == Some(arp.target_ip);

        if arp.operation == ArpOperation::Reply || ours {
            self.arp_cache.insert(arp.sender_ip, arp.sender_mac);
            self.release_parked(arp.sender_ip, arp.sender_mac);
        }
        if arp.operation == ArpOperation::Request && ours {
            let reply = arp.reply(our_mac);
            self.egress
                .push((port, Frame::arp(our_mac, arp.sender_mac, reply)));
        }
    }

    fn route_frame(&mut self, frame: Frame) {
        let dst = frame.ip().dst_ip;
        let Some((port, next_hop)) = self.egress_for(dst) else {
            debug!(node = %self.hostname, %dst, "no route");
            self.count_drop("no_route");
            return;
        };
        let Some(src_mac) = self.interfaces.get(&port).map(|nic| nic.mac_address()) else {
            return;
        };
        match frame.next_hop(EthernetHeader::new(src_mac, MacAddress::BROADCAST)) {
            Some(routed) => self.forward(port, next_hop, routed),
            None => {
                debug!(node = %self.hostname, %dst, "TTL expired");
                self.count_drop("ttl_expired");
            }
        }
    }

    fn deliver_local(&mut self, frame: Frame, ctx: &mut SimContext) {
        let ip = *frame.ip();
        match frame.transport() {
            Transport::Icmp(icmp) => match icmp.icmp_type {
                IcmpType::EchoRequest => {
                    let reply = Transport::Icmp(icmp.echo_reply());
                    self.send_ip(ip.src_ip, reply, Payload::None);
                }
                IcmpType::EchoReply => {
                    if let Some(ping) = &mut self.ping {
                        if ping.target == ip.src_ip && ping.identifier == icmp.identifier {
                            ping.replied = true;
                        }
                    }
                }
                _ => {}
            },
            Transport::Tcp(_) | Transport::Udp(_) => {
                let (Some(src_port), Some(dst_port)) = (frame.src_port(), frame.dst_port()) else {
                    return;
                };
                let msg = InboundMessage {
                    src_ip: ip.src_ip,
                    src_port,
                    dst_port,
                    protocol: ip.protocol,
                    payload: frame.payload().clone(),
                };
                self.software_manager
                    .receive(&msg, &mut self.file_system, ctx);
            }
        }
    }

    fn off_failure(&self) -> RequestResponse {
        RequestResponse::failure(format!("{} is {}", self.hostname, self.operating_state))
    }
}

impl SimComponent for Node {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let interfaces: Map<String, Value> = self
            .interfaces
            .iter()
            .map(|(port, nic)| (port.to_string(), nic.describe_state()))
            .collect();
        let arp_cache: Map<String, Value> = self
            .arp_cache
            .iter()
            .map(|(ip, mac)| (ip.to_string(), Value::from(mac.to_string())))
            .collect();

        let mut state = json!({
            "uuid": self.id,
            "hostname": self.hostname,
            "type": self.node_type,
            "operating_state": self.operating_state,
            "network_interfaces": interfaces,
            "arp_cache": arp_cache,
            "software_manager": self.software_manager.describe_state(),
            "file_system": self.file_system.describe_state(),
        });
        if let Value::Object(map) = &mut state {
            match &self.layer {
                NetworkLayer::Host { default_gateway } => {
                    map.insert(
                        "default_gateway".to_string(),
                        json!(default_gateway.map(|ip| ip.to_string())),
                    );
                }
                NetworkLayer::Switch { mac_table } => {
                    let table: Map<String, Value> = mac_table
                        .iter()
                        .map(|(mac, port)| (mac.to_string(), Value::from(*port)))
                        .collect();
                    map.insert("mac_table".to_string(), Value::Object(table));
                }
                NetworkLayer::Router { acl, routes } => {
                    map.insert("acl".to_string(), acl.describe_state());
                    map.insert("route_table".to_string(), routes.describe_state());
                }
            }
        }
        state
    }

    fn requests() -> &'static [RequestDef<Self>] {
        NODE_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn node_startup(node: &mut Node, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(node.startup(), format!("{} is {}", node.hostname, node.operating_state))
}

fn node_shutdown(node: &mut Node, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(node.shutdown(), format!("{} is {}", node.hostname, node.operating_state))
}

fn node_reset(node: &mut Node, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(node.reset(), format!("{} is {}", node.hostname, node.operating_state))
}

fn node_scan(node: &mut Node, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    node.start_scan();
    RequestResponse::success()
}

fn node_ping(node: &mut Node, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    match parse_arg::<Ipv4Addr>(args, 0, "address") {
        Ok(target) => node.ping(target),
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn node_network_interface(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    let port = match parse_arg::<u16>(args, 0, "port") {
        Ok(port) => port,
        Err(reason) => return RequestResponse::failure(reason),
    };
    if args[1] == "enable" && !node.is_on() {
        return node.off_failure();
    }
    match node.interfaces.get_mut(&port) {
        Some(nic) => nic.apply_request(&args[1..], ctx),
        None => RequestResponse::failure(format!("no interface {} on {}", port, node.hostname)),
    }
}

fn node_service(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    node.software_manager.request(SoftwareKind::Service, args, ctx)
}

fn node_application(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    node.software_manager.request(SoftwareKind::Application, args, ctx)
}

fn node_software_manager(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    node.software_manager.apply_request(args, ctx)
}

fn node_file_system(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !node.is_on() {
        return node.off_failure();
    }
    node.file_system.apply_request(args, ctx)
}

fn node_acl(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    match &mut node.layer {
        NetworkLayer::Router { acl, .. } => acl.apply_request(args, ctx),
        _ => RequestResponse::failure(format!("{} has no ACL", node.hostname)),
    }
}

fn node_route(node: &mut Node, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    match &mut node.layer {
        NetworkLayer::Router { routes, .. } => dispatch(ROUTE_REQUESTS, routes, args, ctx),
        _ => RequestResponse::failure(format!("{} has no route table", node.hostname)),
    }
}

/// Requests accepted by a node.
pub const NODE_REQUESTS: &[RequestDef<Node>] = &[
    RequestDef::new("startup", "Power the node on", Arity::Exact(0), node_startup),
    RequestDef::new("shutdown", "Power the node off", Arity::Exact(0), node_shutdown),
    RequestDef::new("reset", "Power cycle the node", Arity::Exact(0), node_reset),
    RequestDef::new("scan", "Reveal software and file health", Arity::Exact(0), node_scan),
    RequestDef::new("ping", "<ip> Send an ICMP echo request", Arity::Exact(1), node_ping),
    RequestDef::new("network_interface", "<port> enable|disable", Arity::Exact(2), node_network_interface),
    RequestDef::new("service", "<name> <request...>", Arity::AtLeast(2), node_service),
    RequestDef::new("application", "<name> <request...>", Arity::AtLeast(2), node_application),
    RequestDef::new("software_manager", "install|uninstall ...", Arity::AtLeast(1), node_software_manager),
    RequestDef::new("file_system", "file|folder|create|delete|restore ...", Arity::AtLeast(1), node_file_system),
    RequestDef::new("acl", "add_rule|remove_rule|remove_rule_at|reset ...", Arity::AtLeast(1), node_acl),
    RequestDef::new("route", "add|remove ...", Arity::AtLeast(1), node_route),
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cybersim_packet::{IpProtocol, Port, TcpHeader};
    use cybersim_software::OperatingState;

    fn net(a: u8, b: u8, c: u8, d: u8) -> Option<Ipv4Network> {
        Some(Ipv4Network::new(
            Ipv4Addr::new(a, b, c, d),
            Ipv4Addr::new(255, 255, 255, 0),
        ))
    }

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn frame(src: MacAddress, dst: MacAddress) -> Frame {
        Frame::new(
            EthernetHeader::new(src, dst),
            IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), IpProtocol::Tcp),
            Transport::Tcp(TcpHeader::new(Port(49152), Port::HTTP)),
            Payload::None,
        )
        .unwrap()
    }

    fn server(ctx: &mut SimContext) -> Node {
        let mut node = Node::new(ctx, "server", NodeType::Server, NodeSettings::default());
        node.add_interface(ctx, 1, net(10, 0, 0, 2)).unwrap();
        node.install_software(
            ctx,
            "web",
            SoftwareKind::Service,
            SoftwareType::WebServer,
            &SoftwareOptions::default(),
        )
        .unwrap();
        node.power_on_now();
        node
    }

    #[test]
    fn test_power_on_starts_services_and_interfaces() {
        let mut ctx = SimContext::new(0);
        let node = server(&mut ctx);
        assert!(node.is_on());
        assert!(node.interface(1).unwrap().is_enabled());
        let web = node.software_manager().get("web").unwrap();
        assert_eq!(web.operating_state(), OperatingState::Running);
    }

    #[test]
    fn test_shutdown_takes_shut_down_duration_steps() {
        let mut ctx = SimContext::new(0);
        let mut node = server(&mut ctx);
        assert!(node.shutdown());
        assert_eq!(node.operating_state(), NodeOperatingState::ShuttingDown);
        node.apply_timestep(&mut ctx);
        node.apply_timestep(&mut ctx);
        assert_eq!(node.operating_state(), NodeOperatingState::ShuttingDown);
        node.apply_timestep(&mut ctx);
        assert_eq!(node.operating_state(), NodeOperatingState::Off);
        assert!(!node.interface(1).unwrap().is_enabled());
        let web = node.software_manager().get("web").unwrap();
        assert_eq!(web.operating_state(), OperatingState::Stopped);
        assert!(!node.shutdown());
    }

    #[test]
    fn test_startup_cancels_shutdown_with_fresh_timer() {
        let mut ctx = SimContext::new(0);
        let mut node = server(&mut ctx);
        node.shutdown();
        node.apply_timestep(&mut ctx);
        assert!(node.startup());
        assert_eq!(node.operating_state(), NodeOperatingState::Booting);
        node.apply_timestep(&mut ctx);
        node.apply_timestep(&mut ctx);
        assert_eq!(node.operating_state(), NodeOperatingState::Booting);
        node.apply_timestep(&mut ctx);
        assert!(node.is_on());
    }

    #[test]
    fn test_reset_powers_down_then_boots() {
        let mut ctx = SimContext::new(0);
        let settings = NodeSettings {
            start_up_duration: 1,
            shut_down_duration: 1,
            ..NodeSettings::default()
        };
        let mut node = Node::new(&mut ctx, "pc", NodeType::Computer, settings);
        node.power_on_now();
        assert!(node.reset());
        assert_eq!(node.operating_state(), NodeOperatingState::Resetting);
        node.apply_timestep(&mut ctx);
        assert_eq!(node.operating_state(), NodeOperatingState::Booting);
        node.apply_timestep(&mut ctx);
        assert!(node.is_on());
    }

    #[test]
    fn test_zero_durations_are_immediate() {
        let mut ctx = SimContext::new(0);
        let settings = NodeSettings {
            start_up_duration: 0,
            shut_down_duration: 0,
            ..NodeSettings::default()
        };
        let mut node = Node::new(&mut ctx, "pc", NodeType::Computer, settings);
        assert!(node.startup());
        assert!(node.is_on());
        assert!(node.shutdown());
        assert_eq!(node.operating_state(), NodeOperatingState::Off);
    }

    #[test]
    fn test_install_interrupted_by_power_off_stays_stopped() {
        let mut ctx = SimContext::new(0);
        let settings = NodeSettings {
            start_up_duration: 0,
            shut_down_duration: 0,
            ..NodeSettings::default()
        };
        let mut node = Node::new(&mut ctx, "server", NodeType::Server, settings);
        node.power_on_now();
        let response = node.apply_request(
            &tokens("software_manager install service WebServer web"),
            &mut ctx,
        );
        assert!(response.is_success());
        assert!(node.shutdown());
        assert_eq!(node.operating_state(), NodeOperatingState::Off);

        for _ in 0..3 {
            node.apply_timestep(&mut ctx);
        }
        let web = node.software_manager().get("web").unwrap();
        assert_eq!(web.operating_state(), OperatingState::Stopped);

        assert!(node.startup());
        let web = node.software_manager().get("web").unwrap();
        assert_eq!(web.operating_state(), OperatingState::Running);
    }

    #[test]
    fn test_software_requests_refused_while_off() {
        let mut ctx = SimContext::new(0);
        let mut node = server(&mut ctx);
        node.shutdown();
        let response = node.apply_request(&tokens("service web start"), &mut ctx);
        assert_eq!(response.reason(), Some("server is SHUTTING_DOWN"));
        let response = node.apply_request(&tokens("network_interface 1 enable"), &mut ctx);
        assert!(!response.is_success());
    }

    #[test]
    fn test_switch_learns_and_floods() {
        let mut ctx = SimContext::new(0);
        let mut switch = Node::new(&mut ctx, "switch", NodeType::Switch, NodeSettings::default());
        for port in 1..=3 {
            switch.add_interface(&mut ctx, port, net(10, 0, 0, 9)).unwrap();
        }
        assert!(switch.interface(1).unwrap().network().is_none());
        switch.power_on_now();

        let a = MacAddress([2, 0, 0, 0, 0, 0xa]);
        let b = MacAddress([2, 0, 0, 0, 0, 0xb]);

        switch.receive_frame(1, frame(a, b), &mut ctx);
        let out: Vec<u16> = switch.collect_egress().into_iter().map(|(p, _)| p).collect();
        assert_eq!(out, vec![2, 3]);

        switch.receive_frame(2, frame(b, a), &mut ctx);
        let out: Vec<u16> = switch.collect_egress().into_iter().map(|(p, _)| p).collect();
        assert_eq!(out, vec![1]);

        switch.interface_mut(3).unwrap().disable();
        switch.receive_frame(1, frame(a, MacAddress::BROADCAST), &mut ctx);
        let out: Vec<u16> = switch.collect_egress().into_iter().map(|(p, _)| p).collect();
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn test_route_table_longest_prefix_then_default() {
        let mut table = RouteTable::default();
        table.add(
            Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0)),
            Ipv4Addr::new(1, 1, 1, 1),
        );
        table.add(
            Ipv4Network::new(Ipv4Addr::new(10, 1, 0, 0), Ipv4Addr::new(255, 255, 0, 0)),
            Ipv4Addr::new(2, 2, 2, 2),
        );
        assert_eq!(table.lookup(Ipv4Addr::new(10, 1, 5, 5)), Some(Ipv4Addr::new(2, 2, 2, 2)));
        assert_eq!(table.lookup(Ipv4Addr::new(10, 9, 5, 5)), Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(table.lookup(Ipv4Addr::new(172, 16, 0, 1)), None);
        table.set_default_route(Some(Ipv4Addr::new(3, 3, 3, 3)));
        assert_eq!(table.lookup(Ipv4Addr::new(172, 16, 0, 1)), Some(Ipv4Addr::new(3, 3, 3, 3)));
    }

    #[test]
    fn test_route_requests() {
        let mut ctx = SimContext::new(0);
        let mut router = Node::new(&mut ctx, "router", NodeType::Router, NodeSettings::default());
        let add = tokens("route add 192.168.10.0 255.255.255.0 192.168.1.1");
        assert!(router.apply_request(&add, &mut ctx).is_success());
        let remove = tokens("route remove 192.168.10.0 255.255.255.0");
        assert!(router.apply_request(&remove, &mut ctx).is_success());
        assert!(!router.apply_request(&remove, &mut ctx).is_success());

        let mut pc = Node::new(&mut ctx, "pc", NodeType::Computer, NodeSettings::default());
        assert_eq!(
            pc.apply_request(&tokens("acl reset"), &mut ctx).reason(),
            Some("pc has no ACL")
        );
    }

    #[test]
    fn test_node_scan_reveals_after_duration() {
        let mut ctx = SimContext::new(0);
        let mut node = server(&mut ctx);
        node.software_manager_mut()
            .get_mut("web")
            .unwrap()
            .core_mut()
            .compromise()
            .unwrap();
        assert!(node.apply_request(&tokens("scan"), &mut ctx).is_success());
        node.apply_timestep(&mut ctx);
        node.apply_timestep(&mut ctx);
        let web = node.software_manager().get("web").unwrap();
        assert_ne!(web.health_visible(), cybersim_software::SoftwareHealth::Compromised);
        node.apply_timestep(&mut ctx);
        let web = node.software_manager().get("web").unwrap();
        assert_eq!(web.health_visible(), cybersim_software::SoftwareHealth::Compromised);
    }
}
