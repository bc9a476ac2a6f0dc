//! The network container.

use crate::link::{Link, LinkEndpoint};
use crate::node::Node;
use crate::{NetworkError, NmneConfig};
use cybersim_common::{
    metric_defs, Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
};
use cybersim_packet::Frame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace, warn};

/// Frames handled by one flush before the rest are discarded.
pub const MAX_FRAMES_PER_FLUSH: usize = 10_000;

/// Flush/settle rounds a pending request gets before it is abandoned.
pub const MAX_SETTLE_ROUNDS: usize = 8;

/// Frame and NMNE counts for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTallies {
    /// Frames handed to a receiving interface.
    pub frames_delivered: u64,
    /// Frames dropped by links, interfaces, or for lack of a route.
    pub frames_dropped: u64,
    /// Frames denied by an ACL.
    pub frames_blocked: u64,
    /// Keyword hits on received frames.
    pub nmne_inbound: u64,
    /// Keyword hits on sent frames.
    pub nmne_outbound: u64,
}

impl StepTallies {
    fn accumulate(&mut self, other: &StepTallies) {
        self.frames_delivered += other.frames_delivered;
        self.frames_dropped += other.frames_dropped;
        self.frames_blocked += other.frames_blocked;
        self.nmne_inbound += other.nmne_inbound;
        self.nmne_outbound += other.nmne_outbound;
    }
}

/// Owns every node and link.
///
/// Nodes and links are keyed by hostname and link name (BTreeMap for
/// deterministic ordering). Links refer to nodes by [`LinkEndpoint`], so
/// nothing holds a reference into anything else.
#[derive(Debug, Clone)]
pub struct Network {
    id: ComponentId,
    nmne: NmneConfig,
    nodes: BTreeMap<String, Node>,
    links: BTreeMap<String, Link>,
    /// Endpoint to the name of the link plugged into it.
    ports: BTreeMap<LinkEndpoint, String>,
    /// Deliveries and drops counted by the network itself this step.
    step: StepTallies,
    /// Last computed aggregates.
    aggregates: StepTallies,
    /// Aggregates summed over the episode.
    totals: StepTallies,
}

impl Network {
    /// Create an empty network.
    pub fn new(ctx: &mut SimContext, nmne: NmneConfig) -> Self {
        Network {
            id: ctx.new_id(),
            nmne,
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            ports: BTreeMap::new(),
            step: StepTallies::default(),
            aggregates: StepTallies::default(),
            totals: StepTallies::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------------

    /// Add a node.
    pub fn add_node(&mut self, node: Node) -> Result<(), NetworkError> {
        let hostname = node.hostname().to_string();
        if self.nodes.contains_key(&hostname) {
            return Err(NetworkError::DuplicateHost(hostname));
        }
        debug!(node = %hostname, node_type = %node.node_type(), "node added");
        self.nodes.insert(hostname, node);
        Ok(())
    }

    /// Connect two interfaces. Returns the link name.
    pub fn connect(
        &mut self,
        ctx: &mut SimContext,
        a: LinkEndpoint,
        b: LinkEndpoint,
        bandwidth: f64,
    ) -> Result<String, NetworkError> {
        if a == b {
            return Err(NetworkError::InvalidLink(format!("{} linked to itself", a)));
        }
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(NetworkError::InvalidLink(format!(
                "bandwidth must be positive, got {}",
                bandwidth
            )));
        }
        for end in [&a, &b] {
            let node = self
                .nodes
                .get(&end.hostname)
                .ok_or_else(|| NetworkError::UnknownHost(end.hostname.clone()))?;
            if node.interface(end.port).is_none() {
                return Err(NetworkError::UnknownInterface {
                    host: end.hostname.clone(),
                    port: end.port,
                });
            }
            if self.ports.contains_key(end) {
                return Err(NetworkError::PortInUse {
                    host: end.hostname.clone(),
                    port: end.port,
                });
            }
        }

        let link = Link::new(ctx, a.clone(), b.clone(), bandwidth);
        let name = link.name();
        debug!(link = %name, bandwidth, "link added");
        self.ports.insert(a, name.clone());
        self.ports.insert(b, name.clone());
        self.links.insert(name.clone(), link);
        Ok(name)
    }

    /// NMNE capture settings.
    pub fn nmne_config(&self) -> &NmneConfig {
        &self.nmne
    }

    /// All nodes by hostname.
    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    /// Look up a node.
    pub fn node(&self, hostname: &str) -> Option<&Node> {
        self.nodes.get(hostname)
    }

    /// Look up a node mutably.
    pub fn node_mut(&mut self, hostname: &str) -> Option<&mut Node> {
        self.nodes.get_mut(hostname)
    }

    /// All links by name.
    pub fn links(&self) -> &BTreeMap<String, Link> {
        &self.links
    }

    /// Link plugged into an endpoint.
    pub fn link_at(&self, endpoint: &LinkEndpoint) -> Option<&Link> {
        self.ports.get(endpoint).and_then(|name| self.links.get(name))
    }

    // ------------------------------------------------------------------------
    // Frame delivery
    // ------------------------------------------------------------------------

    fn count_drop(step: &mut StepTallies, reason: &'static str) {
        step.frames_dropped += 1;
        let labels = vec![("reason", reason.to_string())];
        metrics::counter!(metric_defs::FRAMES_DROPPED.name, &labels).increment(1);
    }

    fn record_nmne(host: &str, direction: &'static str) {
        let labels = vec![("node", host.to_string()), ("direction", direction.to_string())];
        metrics::counter!(metric_defs::NMNE_DETECTED.name, &labels).increment(1);
    }

    /// Drain every queued frame until the network is quiet.
    ///
    /// Frames are processed breadth-first; replies generated by a delivery
    /// join the back of the queue.
    pub fn flush(&mut self, ctx: &mut SimContext) {
        let mut work: VecDeque<(LinkEndpoint, Frame)> = VecDeque::new();
        for (hostname, node) in self.nodes.iter_mut() {
            for (port, frame) in node.collect_egress() {
                work.push_back((LinkEndpoint::new(hostname.clone(), port), frame));
            }
        }

        let mut processed = 0usize;
        while let Some((from, frame)) = work.pop_front() {
            if processed == MAX_FRAMES_PER_FLUSH {
                let discarded = work.len() as u64 + 1;
                warn!(discarded, "frame limit reached, discarding remaining frames");
                self.step.frames_dropped += discarded;
                break;
            }
            processed += 1;

            let Some((to, frame)) = self.transmit(&from, frame) else {
                continue;
            };
            for (port, out) in self.deliver(&to, frame, ctx) {
                work.push_back((LinkEndpoint::new(to.hostname.clone(), port), out));
            }
        }
        if processed > 0 {
            trace!(frames = processed, "network flushed");
        }
    }

    /// Move a frame from `from` onto its link. Returns the far endpoint.
    fn transmit(&mut self, from: &LinkEndpoint, frame: Frame) -> Option<(LinkEndpoint, Frame)> {
        let node = self.nodes.get_mut(&from.hostname)?;
        if !node.port_is_up(from.port) {
            Self::count_drop(&mut self.step, "interface_down");
            return None;
        }
        if let Some(nic) = node.interface_mut(from.port) {
            if nic.record_outbound(&frame, &self.nmne) {
                Self::record_nmne(&from.hostname, "outbound");
            }
        }

        let Some(link) = self.ports.get(from).and_then(|name| self.links.get_mut(name)) else {
            Self::count_drop(&mut self.step, "unlinked");
            return None;
        };
        if !link.try_carry(frame.size_mbits()) {
            Self::count_drop(&mut self.step, "link_capacity");
            return None;
        }
        let to = link.other_end(from)?.clone();
        Some((to, frame))
    }

    /// Hand a frame to the interface at `to`. Returns what the node sends in
    /// response.
    fn deliver(&mut self, to: &LinkEndpoint, frame: Frame, ctx: &mut SimContext) -> Vec<(u16, Frame)> {
        let Some(node) = self.nodes.get_mut(&to.hostname) else {
            return Vec::new();
        };
        if !node.port_is_up(to.port) {
            Self::count_drop(&mut self.step, "interface_down");
            return Vec::new();
        }
        if let Some(nic) = node.interface_mut(to.port) {
            if nic.record_inbound(&frame, &self.nmne) {
                Self::record_nmne(&to.hostname, "inbound");
            }
        }

        node.receive_frame(to.port, frame, ctx);
        self.step.frames_delivered += 1;
        let labels = vec![("node", to.hostname.clone())];
        metrics::counter!(metric_defs::FRAMES_DELIVERED.name, &labels).increment(1);
        node.collect_egress()
    }

    // ------------------------------------------------------------------------
    // Timestep
    // ------------------------------------------------------------------------

    /// Reset link loads, interface tallies and per-step counters.
    pub fn pre_timestep(&mut self) {
        for link in self.links.values_mut() {
            link.pre_timestep();
        }
        for node in self.nodes.values_mut() {
            node.pre_timestep();
        }
        self.step = StepTallies::default();
    }

    /// Advance every node, then deliver whatever they sent.
    pub fn apply_timestep(&mut self, ctx: &mut SimContext) {
        for node in self.nodes.values_mut() {
            node.apply_timestep(ctx);
        }
        self.flush(ctx);
    }

    /// Sum this step's counters over the network and its interfaces.
    pub fn recompute_aggregates(&mut self) -> StepTallies {
        let mut aggregates = self.step;
        for node in self.nodes.values() {
            aggregates.frames_blocked += node.frames_blocked();
            aggregates.frames_dropped += node.frames_dropped();
            for nic in node.interfaces().values() {
                aggregates.nmne_inbound += nic.nmne().inbound;
                aggregates.nmne_outbound += nic.nmne().outbound;
            }
        }
        self.aggregates = aggregates;
        self.totals.accumulate(&aggregates);

        let nodes_on = self.nodes.values().filter(|n| n.is_on()).count();
        metrics::gauge!(metric_defs::NODES_ON.name).set(nodes_on as f64);
        aggregates
    }

    /// Aggregates from the last [`Network::recompute_aggregates`].
    pub fn aggregates(&self) -> StepTallies {
        self.aggregates
    }

    /// Aggregates summed over the episode.
    pub fn totals(&self) -> StepTallies {
        self.totals
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Apply a request to one node and settle it if it sent traffic.
    fn node_request(&mut self, hostname: &str, path: &[String], ctx: &mut SimContext) -> RequestResponse {
        let Some(node) = self.nodes.get_mut(hostname) else {
            return RequestResponse::failure(format!("no such node: {}", hostname));
        };
        let mut response = node.apply_request(path, ctx);

        let mut rounds = 0;
        while response.is_pending() {
            if rounds == MAX_SETTLE_ROUNDS {
                if let Some(node) = self.nodes.get_mut(hostname) {
                    node.cancel_pending();
                }
                warn!(node = %hostname, request = %path.join(" "), "request did not settle");
                return RequestResponse::failure("request timed out");
            }
            rounds += 1;
            self.flush(ctx);
            response = match self.nodes.get_mut(hostname) {
                Some(node) => node.settle(ctx),
                None => RequestResponse::failure(format!("no such node: {}", hostname)),
            };
        }
        response
    }
}

impl SimComponent for Network {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let nodes: Map<String, Value> = self
            .nodes
            .iter()
            .map(|(hostname, node)| (hostname.clone(), node.describe_state()))
            .collect();
        let links: Map<String, Value> = self
            .links
            .iter()
            .map(|(name, link)| (name.clone(), link.describe_state()))
            .collect();
        json!({
            "uuid": self.id,
            "nodes": nodes,
            "links": links,
            "nmne": {
                "capture_nmne": self.nmne.capture_nmne,
                "inbound": self.aggregates.nmne_inbound,
                "outbound": self.aggregates.nmne_outbound,
            },
            "step_tallies": self.aggregates,
            "episode_tallies": self.totals,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        NETWORK_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn net_node(net: &mut Network, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    net.node_request(&args[0], &args[1..], ctx)
}

/// Requests accepted by the network.
pub const NETWORK_REQUESTS: &[RequestDef<Network>] = &[RequestDef::new(
    "node",
    "<hostname> <request...> Address a node",
    Arity::AtLeast(2),
    net_node,
)];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclAction;
    use crate::node::{NodeOperatingState, NodeSettings};
    use crate::NodeType;
    use cybersim_packet::{
        EthernetHeader, IpPacket, IpProtocol, Ipv4Network, MacAddress, Payload, Port, TcpHeader,
        Transport,
    };
    use cybersim_software::{
        SoftwareHealth, SoftwareKind, SoftwareOptions, SoftwareTimings, SoftwareType,
    };
    use std::net::Ipv4Addr;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn subnet(ip: [u8; 4]) -> Option<Ipv4Network> {
        Some(Ipv4Network::new(Ipv4Addr::from(ip), Ipv4Addr::new(255, 255, 255, 0)))
    }

    struct Office {
        ctx: SimContext,
        net: Network,
    }

    impl Office {
        /// client_1, client_2 -- switch_1 -- router -- switch_2 -- server
        fn build(seed: u64, acl: AclAction, nmne: NmneConfig, bandwidth: f64, max_sessions: usize) -> Self {
            let mut ctx = SimContext::new(seed);
            let mut net = Network::new(&mut ctx, nmne);
            let settings = NodeSettings {
                acl_implicit_action: Some(acl),
                software: SoftwareTimings {
                    max_sessions,
                    ..SoftwareTimings::default()
                },
                ..NodeSettings::default()
            };

            let mut router = Node::new(&mut ctx, "router", NodeType::Router, settings);
            router.add_interface(&mut ctx, 1, subnet([192, 168, 1, 1])).unwrap();
            router.add_interface(&mut ctx, 2, subnet([192, 168, 10, 1])).unwrap();
            net.add_node(router).unwrap();

            for name in ["switch_1", "switch_2"] {
                let mut switch = Node::new(&mut ctx, name, NodeType::Switch, settings);
                for port in 1..=4 {
                    switch.add_interface(&mut ctx, port, None).unwrap();
                }
                net.add_node(switch).unwrap();
            }

            let mut server = Node::new(&mut ctx, "server", NodeType::Server, settings);
            server.add_interface(&mut ctx, 1, subnet([192, 168, 10, 10])).unwrap();
            server.set_default_gateway(Ipv4Addr::new(192, 168, 10, 1)).unwrap();
            for (name, t) in [("web_server", SoftwareType::WebServer), ("database", SoftwareType::DatabaseService)] {
                server
                    .install_software(&mut ctx, name, SoftwareKind::Service, t, &SoftwareOptions::default())
                    .unwrap();
            }
            net.add_node(server).unwrap();

            let db_options = SoftwareOptions {
                server_ip: Some("192.168.10.10".to_string()),
                ..SoftwareOptions::default()
            };
            for (i, name) in ["client_1", "client_2"].into_iter().enumerate() {
                let mut client = Node::new(&mut ctx, name, NodeType::Computer, settings);
                client.add_interface(&mut ctx, 1, subnet([192, 168, 1, 21 + i as u8])).unwrap();
                client.set_default_gateway(Ipv4Addr::new(192, 168, 1, 1)).unwrap();
                client
                    .install_software(
                        &mut ctx,
                        "database_client",
                        SoftwareKind::Application,
                        SoftwareType::DatabaseClient,
                        &db_options,
                    )
                    .unwrap();
                client
                    .install_software(
                        &mut ctx,
                        "web_browser",
                        SoftwareKind::Application,
                        SoftwareType::WebBrowser,
                        &SoftwareOptions::default(),
                    )
                    .unwrap();
                net.add_node(client).unwrap();
            }

            let links = [
                (("client_1", 1), ("switch_1", 1)),
                (("client_2", 1), ("switch_1", 2)),
                (("switch_1", 4), ("router", 1)),
                (("router", 2), ("switch_2", 4)),
                (("switch_2", 1), ("server", 1)),
            ];
            for ((a, pa), (b, pb)) in links {
                net.connect(&mut ctx, LinkEndpoint::new(a, pa), LinkEndpoint::new(b, pb), bandwidth)
                    .unwrap();
            }
            let hostnames: Vec<String> = net.nodes().keys().cloned().collect();
            for hostname in hostnames {
                net.node_mut(&hostname).unwrap().power_on_now();
            }
            Office { ctx, net }
        }

        fn default() -> Self {
            Office::build(7, AclAction::Permit, NmneConfig::default(), 100.0, 100)
        }

        fn request(&mut self, s: &str) -> RequestResponse {
            self.net.apply_request(&tokens(s), &mut self.ctx)
        }

        fn step(&mut self) -> StepTallies {
            self.net.pre_timestep();
            self.net.apply_timestep(&mut self.ctx);
            self.net.recompute_aggregates()
        }

        fn health(&self, host: &str, software: &str) -> SoftwareHealth {
            self.net
                .node(host)
                .unwrap()
                .software_manager()
                .get(software)
                .unwrap()
                .health_actual()
        }
    }

    #[test]
    fn test_ping_across_router() {
        let mut office = Office::default();
        let response = office.request("node client_1 ping 192.168.10.10");
        assert!(response.is_success(), "{:?}", response);
        assert!(office.net.node("client_1").unwrap().arp_entry(Ipv4Addr::new(192, 168, 1, 1)).is_some());

        let response = office.request("node client_1 ping 192.168.10.99");
        assert_eq!(response.reason(), Some("no reply from 192.168.10.99"));
    }

    #[test]
    fn test_ping_without_route_fails_immediately() {
        let mut office = Office::default();
        let response = office.request("node server ping 10.9.9.9");
        assert_eq!(response.reason(), Some("no reply from 10.9.9.9"));
        let response = office.request("node switch_1 ping 192.168.1.1");
        assert_eq!(response.reason(), Some("no route to 192.168.1.1"));
    }

    #[test]
    fn test_router_implicit_deny_with_http_permit() {
        let mut office = Office::build(7, AclAction::Deny, NmneConfig::default(), 100.0, 100);
        assert!(office
            .request("node router acl add_rule PERMIT TCP ANY ANY ANY ANY ANY 80 0")
            .is_success());
        assert!(office
            .request("node router acl add_rule PERMIT TCP ANY ANY 80 ANY ANY ANY 1")
            .is_success());

        assert!(office.request("node client_1 application web_browser start").is_success());
        let response = office.request("node client_1 application web_browser execute http://192.168.10.10/");
        assert!(response.is_success(), "{:?}", response);
        assert_eq!(response.data["status"], 200);

        let response = office.request("node client_1 ping 192.168.10.10");
        assert!(!response.is_success());

        let router = office.net.node_mut("router").unwrap();
        let blocked_before = router.frames_blocked();
        let https = Frame::new(
            EthernetHeader::new(MacAddress([2, 0, 0, 0, 0, 1]), router.interface(1).unwrap().mac_address()),
            IpPacket::new(Ipv4Addr::new(192, 168, 1, 21), Ipv4Addr::new(192, 168, 10, 10), IpProtocol::Tcp),
            Transport::Tcp(TcpHeader::new(Port(49152), Port::HTTPS)),
            Payload::None,
        )
        .unwrap();
        router.receive_frame(1, https, &mut office.ctx);
        assert_eq!(router.frames_blocked(), blocked_before + 1);
        assert!(router.collect_egress().is_empty());
    }

    #[test]
    fn test_two_clients_overwhelm_single_session_database() {
        let mut office = Office::build(7, AclAction::Permit, NmneConfig::default(), 100.0, 1);
        for client in ["client_1", "client_2"] {
            assert!(office
                .request(&format!("node {} application database_client start", client))
                .is_success());
            let response = office.request(&format!("node {} application database_client connect", client));
            assert!(response.is_success(), "{:?}", response);
        }
        assert_eq!(office.health("server", "database"), SoftwareHealth::Overwhelmed);

        assert_eq!(
            office
                .request("node server service database remove_connection nobody")
                .reason(),
            Some("no such connection")
        );
    }

    #[test]
    fn test_shutdown_stops_services_and_traffic() {
        let mut office = Office::default();
        assert!(office.request("node server shutdown").is_success());
        assert_eq!(
            office.net.node("server").unwrap().operating_state(),
            NodeOperatingState::ShuttingDown
        );
        for _ in 0..3 {
            office.step();
        }
        let server = office.net.node("server").unwrap();
        assert_eq!(server.operating_state(), NodeOperatingState::Off);
        let db = server.software_manager().get("database").unwrap();
        assert_eq!(db.operating_state(), cybersim_software::OperatingState::Stopped);

        let response = office.request("node client_1 ping 192.168.10.10");
        assert!(!response.is_success());
        assert_eq!(
            office.request("node server service database stop").reason(),
            Some("server is OFF")
        );
    }

    #[test]
    fn test_nmne_counts_delete_queries() {
        let mut office = Office::default();
        office.net.pre_timestep();
        office.request("node client_1 application database_client start");
        let response = office.request("node client_1 application database_client execute DELETE");
        assert!(response.is_success(), "{:?}", response);
        let tallies = office.net.recompute_aggregates();
        assert!(tallies.nmne_outbound > 0);
        assert!(tallies.nmne_inbound > 0);

        let server_nic = office.net.node("server").unwrap().interface(1).unwrap();
        assert_eq!(server_nic.nmne().inbound, 1);
    }

    #[test]
    fn test_nmne_capture_can_be_disabled() {
        let mut office = Office::build(7, AclAction::Permit, NmneConfig::disabled(), 100.0, 100);
        office.net.pre_timestep();
        office.request("node client_1 application database_client start");
        office.request("node client_1 application database_client execute DELETE");
        let tallies = office.net.recompute_aggregates();
        assert_eq!(tallies.nmne_inbound + tallies.nmne_outbound, 0);
    }

    #[test]
    fn test_link_capacity_drops_frames() {
        let mut office = Office::build(7, AclAction::Permit, NmneConfig::default(), 0.000_5, 100);
        office.net.pre_timestep();
        let response = office.request("node client_1 ping 192.168.10.10");
        assert!(!response.is_success());
        let tallies = office.net.recompute_aggregates();
        assert!(tallies.frames_dropped > 0);
    }

    #[test]
    fn test_disabled_interface_drops_traffic() {
        let mut office = Office::default();
        assert!(office.request("node server network_interface 1 disable").is_success());
        assert!(!office.request("node client_1 ping 192.168.10.10").is_success());
        assert!(office.request("node server network_interface 1 enable").is_success());
        assert!(office.request("node client_1 ping 192.168.10.10").is_success());
    }

    #[test]
    fn test_unknown_node_and_bad_paths() {
        let mut office = Office::default();
        assert_eq!(
            office.request("node mainframe startup").reason(),
            Some("no such node: mainframe")
        );
        assert!(office.request("router startup").reason().unwrap().starts_with("unreachable"));
        assert!(office.request("node client_1 explode").reason().unwrap().starts_with("unreachable"));
    }

    #[test]
    fn test_topology_errors() {
        let mut ctx = SimContext::new(0);
        let mut net = Network::new(&mut ctx, NmneConfig::default());
        let mut pc = Node::new(&mut ctx, "pc", NodeType::Computer, NodeSettings::default());
        pc.add_interface(&mut ctx, 1, subnet([10, 0, 0, 1])).unwrap();
        assert!(matches!(
            pc.add_interface(&mut ctx, 1, None),
            Err(NetworkError::DuplicateInterface { .. })
        ));
        net.add_node(pc.clone()).unwrap();
        assert!(matches!(net.add_node(pc), Err(NetworkError::DuplicateHost(_))));

        let mut other = Node::new(&mut ctx, "other", NodeType::Computer, NodeSettings::default());
        other.add_interface(&mut ctx, 1, subnet([10, 0, 0, 2])).unwrap();
        net.add_node(other).unwrap();

        let a = LinkEndpoint::new("pc", 1);
        assert!(matches!(
            net.connect(&mut ctx, a.clone(), LinkEndpoint::new("ghost", 1), 100.0),
            Err(NetworkError::UnknownHost(_))
        ));
        assert!(matches!(
            net.connect(&mut ctx, a.clone(), LinkEndpoint::new("other", 2), 100.0),
            Err(NetworkError::UnknownInterface { .. })
        ));
        net.connect(&mut ctx, a.clone(), LinkEndpoint::new("other", 1), 100.0).unwrap();
        assert!(matches!(
            net.connect(&mut ctx, a, LinkEndpoint::new("other", 1), 100.0),
            Err(NetworkError::PortInUse { .. })
        ));
    }

    #[test]
    fn test_same_seed_same_snapshot() {
        let run = || {
            let mut office = Office::default();
            office.request("node client_1 application database_client start");
            office.request("node client_1 application database_client execute SELECT");
            office.request("node server shutdown");
            office.step();
            office.step();
            office.net.describe_state()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_idle_step_leaves_state_unchanged() {
        let mut office = Office::default();
        office.step();
        let before = office.net.describe_state();
        office.step();
        assert_eq!(before, office.net.describe_state());
    }
}
