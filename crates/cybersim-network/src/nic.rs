//! Network interfaces.

use crate::NmneConfig;
use cybersim_common::{Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext};
use cybersim_packet::{Frame, Ipv4Network, MacAddress};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Frames seen in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounts {
    /// Frames received.
    pub inbound: u64,
    /// Frames sent.
    pub outbound: u64,
}

/// Keyword hits in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmneCounts {
    /// Hits on received frames.
    pub inbound: u64,
    /// Hits on sent frames.
    pub outbound: u64,
}

impl NmneCounts {
    /// Sum of both directions.
    pub fn total(&self) -> u64 {
        self.inbound + self.outbound
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Inbound,
    Outbound,
}

/// Tally key for a frame: `PROTO/port`, or just `PROTO` without ports.
fn traffic_key(frame: &Frame) -> String {
    match frame.dst_port() {
        Some(port) => format!("{}/{}", frame.ip().protocol, port.number()),
        None => frame.ip().protocol.to_string(),
    }
}

/// A port on a node.
///
/// Switch ports carry no address. Counters are per step and are cleared by
/// [`NetworkInterface::pre_timestep`].
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    id: ComponentId,
    port: u16,
    mac_address: MacAddress,
    network: Option<Ipv4Network>,
    enabled: bool,
    /// Per-step tallies keyed by `PROTO/port` (BTreeMap for deterministic ordering).
    traffic: BTreeMap<String, TrafficCounts>,
    nmne: NmneCounts,
    nmne_total: NmneCounts,
}

impl NetworkInterface {
    /// Create a disabled interface.
    pub fn new(ctx: &mut SimContext, port: u16, network: Option<Ipv4Network>) -> Self {
        NetworkInterface {
            id: ctx.new_id(),
            port,
            mac_address: MacAddress::generate(ctx.rng()),
            network,
            enabled: false,
            traffic: BTreeMap::new(),
            nmne: NmneCounts::default(),
            nmne_total: NmneCounts::default(),
        }
    }

    /// Port number on the owning node.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hardware address.
    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    /// Address and mask, if configured.
    pub fn network(&self) -> Option<Ipv4Network> {
        self.network
    }

    /// Configured address.
    pub fn ip_address(&self) -> Option<std::net::Ipv4Addr> {
        self.network.map(|n| n.address)
    }

    /// Check whether the interface can pass traffic.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable the interface. Returns false if already enabled.
    pub fn enable(&mut self) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        debug!(port = self.port, "interface enabled");
        true
    }

    /// Disable the interface. Returns false if already disabled.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        debug!(port = self.port, "interface disabled");
        true
    }

    /// This step's traffic tallies.
    pub fn traffic(&self) -> &BTreeMap<String, TrafficCounts> {
        &self.traffic
    }

    /// This step's keyword hits.
    pub fn nmne(&self) -> NmneCounts {
        self.nmne
    }

    /// Keyword hits since the start of the episode.
    pub fn nmne_total(&self) -> NmneCounts {
        self.nmne_total
    }

    /// Count a received frame. Returns true if it was a keyword hit.
    pub fn record_inbound(&mut self, frame: &Frame, nmne: &NmneConfig) -> bool {
        self.record(frame, nmne, Direction::Inbound)
    }

    /// Count a sent frame. Returns true if it was a keyword hit.
    pub fn record_outbound(&mut self, frame: &Frame, nmne: &NmneConfig) -> bool {
        self.record(frame, nmne, Direction::Outbound)
    }

    fn record(&mut self, frame: &Frame, nmne: &NmneConfig, direction: Direction) -> bool {
        let counts = self.traffic.entry(traffic_key(frame)).or_default();
        match direction {
            Direction::Inbound => counts.inbound += 1,
            Direction::Outbound => counts.outbound += 1,
        }

        let hit = nmne.capture_nmne && nmne.keywords.iter().any(|kw| frame.contains_keyword(kw));
        if hit {
            let (step, total) = match direction {
                Direction::Inbound => (&mut self.nmne.inbound, &mut self.nmne_total.inbound),
                Direction::Outbound => (&mut self.nmne.outbound, &mut self.nmne_total.outbound),
            };
            *step += 1;
            *total += 1;
        }
        hit
    }

    /// Clear the per-step counters.
    pub fn pre_timestep(&mut self) {
        self.traffic.clear();
        self.nmne = NmneCounts::default();
    }
}

impl SimComponent for NetworkInterface {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        json!({
            "uuid": self.id,
            "port": self.port,
            "mac_address": self.mac_address,
            "ip_address": self.network.map(|n| n.address.to_string()),
            "subnet_mask": self.network.map(|n| n.mask.to_string()),
            "enabled": self.enabled,
            "traffic": self.traffic,
            "nmne": self.nmne,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        NIC_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn nic_enable(nic: &mut NetworkInterface, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(nic.enable(), "interface already enabled")
}

fn nic_disable(nic: &mut NetworkInterface, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(nic.disable(), "interface already disabled")
}

/// Requests accepted by a network interface.
pub const NIC_REQUESTS: &[RequestDef<NetworkInterface>] = &[
    RequestDef::new("enable", "Enable the interface", Arity::Exact(0), nic_enable),
    RequestDef::new("disable", "Disable the interface", Arity::Exact(0), nic_disable),
];

// ============================================================================
// Tests
// ============================================================================
