//! # cybersim-packet
//!
//! Frame, header and payload models for the CyberSim network simulation.
//!
//! These are modelling abstractions, not wire formats: a [`Frame`] carries an
//! Ethernet header, an IP packet, exactly one transport header and an
//! application [`Payload`]. Its size is the length of its JSON encoding,
//! which links use for bandwidth accounting.
//!
//! ## Example
//!
//! ```rust
//! use cybersim_packet::{EthernetHeader, Frame, IpPacket, IpProtocol, MacAddress, Payload, Port, Transport, TcpHeader};
//! use std::net::Ipv4Addr;
//!
//! let frame = Frame::new(
//!     EthernetHeader::new(MacAddress([2, 0, 0, 0, 0, 1]), MacAddress::BROADCAST),
//!     IpPacket::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), IpProtocol::Tcp),
//!     Transport::Tcp(TcpHeader::new(Port(49152), Port::HTTP)),
//!     Payload::None,
//! )
//! .unwrap();
//! assert_eq!(frame.dst_port(), Some(Port::HTTP));
//! ```

pub mod error;
pub mod payload;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub use error::PacketError;
pub use payload::{
    ArpOperation, ArpPacket, DatabasePacket, DnsPacket, HttpMethod, HttpPacket, HttpStatusCode,
    Payload,
};

// ============================================================================
// Constants
// ============================================================================

/// Default IP time-to-live.
pub const DEFAULT_TTL: u8 = 64;

/// First port handed out for client-side sessions.
pub const EPHEMERAL_PORT_START: u16 = 49152;

// ============================================================================
// MAC Addresses
// ============================================================================

/// 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Generate a locally administered unicast address.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes: [u8; 6] = rng.gen();
        bytes[0] = (bytes[0] & 0xfc) | 0x02;
        MacAddress(bytes)
    }

    /// Returns true for the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == MacAddress::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(PacketError::InvalidMacAddress(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| PacketError::InvalidMacAddress(s.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// IPv4 Networks
// ============================================================================

/// An IPv4 address together with its subnet mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Network {
    /// Interface (or network) address.
    pub address: Ipv4Addr,
    /// Subnet mask, e.g. `255.255.255.0`.
    pub mask: Ipv4Addr,
}

impl Ipv4Network {
    /// Create a new network from an address and mask.
    pub fn new(address: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Ipv4Network { address, mask }
    }

    /// Returns true if `ip` falls inside this network.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(ip) & mask == u32::from(self.address) & mask
    }

    /// Network address (host bits cleared).
    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.mask))
    }

    /// Directed broadcast address (host bits set).
    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !u32::from(self.mask))
    }

    /// Number of leading one bits in the mask.
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len())
    }
}

/// Parse an IPv4 address, mapping failures to [`PacketError`].
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, PacketError> {
    s.trim()
        .parse()
        .map_err(|_| PacketError::InvalidIpAddress(s.to_string()))
}

// ============================================================================
// Protocols and Ports
// ============================================================================

/// IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum IpProtocol {
    /// ICMP.
    Icmp = 1,
    /// TCP.
    Tcp = 6,
    /// UDP.
    Udp = 17,
}

impl IpProtocol {
    /// Protocol number.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Returns a lowercase label string suitable for use as a metric label value.
    pub fn as_label(&self) -> &'static str {
        match self {
            IpProtocol::Icmp => "icmp",
            IpProtocol::Tcp => "tcp",
            IpProtocol::Udp => "udp",
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for IpProtocol {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ICMP" | "1" => Ok(IpProtocol::Icmp),
            "TCP" | "6" => Ok(IpProtocol::Tcp),
            "UDP" | "17" => Ok(IpProtocol::Udp),
            _ => Err(PacketError::InvalidProtocol(s.to_string())),
        }
    }
}

/// Transport-layer port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(pub u16);

impl Port {
    /// File transfer.
    pub const FTP: Port = Port(21);
    /// Secure shell.
    pub const SSH: Port = Port(22);
    /// Mail transfer.
    pub const SMTP: Port = Port(25);
    /// Name resolution.
    pub const DNS: Port = Port(53);
    /// Web.
    pub const HTTP: Port = Port(80);
    /// Time sync.
    pub const NTP: Port = Port(123);
    /// Address resolution (carried over UDP in this model).
    pub const ARP: Port = Port(219);
    /// Secure web.
    pub const HTTPS: Port = Port(443);
    /// Database server.
    pub const POSTGRES_SERVER: Port = Port(5432);

    const NAMED: &'static [(&'static str, Port)] = &[
        ("FTP", Port::FTP),
        ("SSH", Port::SSH),
        ("SMTP", Port::SMTP),
        ("DNS", Port::DNS),
        ("HTTP", Port::HTTP),
        ("NTP", Port::NTP),
        ("ARP", Port::ARP),
        ("HTTPS", Port::HTTPS),
        ("POSTGRES_SERVER", Port::POSTGRES_SERVER),
    ];

    /// Well-known name of this port, if it has one.
    pub fn name(&self) -> Option<&'static str> {
        Port::NAMED
            .iter()
            .find(|(_, port)| port == self)
            .map(|(name, _)| *name)
    }

    /// Port number.
    pub fn number(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Port {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = s.parse::<u16>() {
            return Ok(Port(number));
        }
        let upper = s.to_ascii_uppercase();
        Port::NAMED
            .iter()
            .find(|(name, _)| *name == upper)
            .map(|(_, port)| *port)
            .ok_or_else(|| PacketError::InvalidPort(s.to_string()))
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Link-layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetHeader {
    /// Sender MAC.
    pub src_mac: MacAddress,
    /// Receiver MAC (or broadcast).
    pub dst_mac: MacAddress,
}

impl EthernetHeader {
    /// Create a new header.
    pub fn new(src_mac: MacAddress, dst_mac: MacAddress) -> Self {
        EthernetHeader { src_mac, dst_mac }
    }
}

/// Network-layer packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPacket {
    /// Source address.
    pub src_ip: Ipv4Addr,
    /// Destination address.
    pub dst_ip: Ipv4Addr,
    /// Transport protocol carried.
    pub protocol: IpProtocol,
    /// Remaining router hops.
    pub ttl: u8,
}

impl IpPacket {
    /// Create a new header with the default TTL.
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, protocol: IpProtocol) -> Self {
        IpPacket {
            src_ip,
            dst_ip,
            protocol,
            ttl: DEFAULT_TTL,
        }
    }
}

/// TCP control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TcpFlag {
    /// Synchronise.
    Syn,
    /// Acknowledge.
    Ack,
    /// Push data.
    Psh,
    /// Finish.
    Fin,
    /// Reset.
    Rst,
}

/// TCP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpHeader {
    /// Source port.
    pub src_port: Port,
    /// Destination port.
    pub dst_port: Port,
    /// Control flags.
    pub flags: Vec<TcpFlag>,
}

impl TcpHeader {
    /// Create a header carrying data (`PSH`, `ACK`).
    pub fn new(src_port: Port, dst_port: Port) -> Self {
        TcpHeader {
            src_port,
            dst_port,
            flags: vec![TcpFlag::Psh, TcpFlag::Ack],
        }
    }

    /// Replace the flags.
    pub fn with_flags(mut self, flags: Vec<TcpFlag>) -> Self {
        self.flags = flags;
        self
    }
}

/// UDP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpHeader {
    /// Source port.
    pub src_port: Port,
    /// Destination port.
    pub dst_port: Port,
}

impl UdpHeader {
    /// Create a new header.
    pub fn new(src_port: Port, dst_port: Port) -> Self {
        UdpHeader { src_port, dst_port }
    }
}

/// ICMP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum IcmpType {
    /// Echo reply.
    EchoReply = 0,
    /// Destination unreachable.
    DestinationUnreachable = 3,
    /// Echo request.
    EchoRequest = 8,
    /// TTL exceeded.
    TimeExceeded = 11,
}

/// ICMP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpHeader {
    /// Message type.
    pub icmp_type: IcmpType,
    /// Message code.
    pub icmp_code: u8,
    /// Identifier matching requests with replies.
    pub identifier: u16,
    /// Sequence number.
    pub sequence: u16,
}

impl IcmpHeader {
    /// Echo request with the given identifier and sequence.
    pub fn echo_request(identifier: u16, sequence: u16) -> Self {
        IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            icmp_code: 0,
            identifier,
            sequence,
        }
    }

    /// Reply to this echo request.
    pub fn echo_reply(&self) -> Self {
        IcmpHeader {
            icmp_type: IcmpType::EchoReply,
            ..*self
        }
    }
}

/// Exactly one transport header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transport {
    /// TCP segment.
    Tcp(TcpHeader),
    /// UDP datagram.
    Udp(UdpHeader),
    /// ICMP message.
    Icmp(IcmpHeader),
}

impl Transport {
    /// IP protocol this header belongs to.
    pub fn protocol(&self) -> IpProtocol {
        match self {
            Transport::Tcp(_) => IpProtocol::Tcp,
            Transport::Udp(_) => IpProtocol::Udp,
            Transport::Icmp(_) => IpProtocol::Icmp,
        }
    }

    /// Source port (none for ICMP).
    pub fn src_port(&self) -> Option<Port> {
        match self {
            Transport::Tcp(h) => Some(h.src_port),
            Transport::Udp(h) => Some(h.src_port),
            Transport::Icmp(_) => None,
        }
    }

    /// Destination port (none for ICMP).
    pub fn dst_port(&self) -> Option<Port> {
        match self {
            Transport::Tcp(h) => Some(h.dst_port),
            Transport::Udp(h) => Some(h.dst_port),
            Transport::Icmp(_) => None,
        }
    }

    /// Header for a segment/datagram on `protocol` between two ports.
    ///
    /// Returns `None` for ICMP, which has no ports.
    pub fn for_ports(protocol: IpProtocol, src_port: Port, dst_port: Port) -> Option<Self> {
        match protocol {
            IpProtocol::Tcp => Some(Transport::Tcp(TcpHeader::new(src_port, dst_port))),
            IpProtocol::Udp => Some(Transport::Udp(UdpHeader::new(src_port, dst_port))),
            IpProtocol::Icmp => None,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// An immutable link-layer frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    ethernet: EthernetHeader,
    ip: IpPacket,
    transport: Transport,
    payload: Payload,
}

impl Frame {
    /// Build a frame, checking that the transport header matches `ip.protocol`.
    pub fn new(
        ethernet: EthernetHeader,
        ip: IpPacket,
        transport: Transport,
        payload: Payload,
    ) -> Result<Self, PacketError> {
        if transport.protocol() != ip.protocol {
            return Err(PacketError::ProtocolMismatch {
                ip: ip.protocol,
                transport: transport.protocol(),
            });
        }
        Ok(Frame {
            ethernet,
            ip,
            transport,
            payload,
        })
    }

    /// Build a broadcast ARP frame or a unicast ARP reply.
    pub fn arp(src_mac: MacAddress, dst_mac: MacAddress, arp: ArpPacket) -> Self {
        Frame {
            ethernet: EthernetHeader::new(src_mac, dst_mac),
            ip: IpPacket::new(arp.sender_ip, arp.target_ip, IpProtocol::Udp),
            transport: Transport::Udp(UdpHeader::new(Port::ARP, Port::ARP)),
            payload: Payload::Arp(arp),
        }
    }

    /// Ethernet header.
    pub fn ethernet(&self) -> &EthernetHeader {
        &self.ethernet
    }

    /// IP header.
    pub fn ip(&self) -> &IpPacket {
        &self.ip
    }

    /// Transport header.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Application payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Source port, if the transport has one.
    pub fn src_port(&self) -> Option<Port> {
        self.transport.src_port()
    }

    /// Destination port, if the transport has one.
    pub fn dst_port(&self) -> Option<Port> {
        self.transport.dst_port()
    }

    /// Returns true for ARP traffic.
    pub fn is_arp(&self) -> bool {
        matches!(self.payload, Payload::Arp(_))
    }

    /// Copy of this frame re-addressed at the link layer for the next hop,
    /// with TTL decremented. Returns `None` when the TTL is exhausted.
    pub fn next_hop(&self, ethernet: EthernetHeader) -> Option<Frame> {
        let ttl = self.ip.ttl.checked_sub(1).filter(|ttl| *ttl > 0)?;
        Some(Frame {
            ethernet,
            ip: IpPacket { ttl, ..self.ip },
            transport: self.transport.clone(),
            payload: self.payload.clone(),
        })
    }

    /// Copy of this frame with a different link-layer header (switching).
    pub fn with_ethernet(&self, ethernet: EthernetHeader) -> Frame {
        Frame {
            ethernet,
            ..self.clone()
        }
    }

    /// Size in bytes (length of the JSON encoding).
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }

    /// Size in megabits, the unit of link bandwidth.
    pub fn size_mbits(&self) -> f64 {
        self.size_bytes() as f64 * 8.0 / 1_000_000.0
    }

    /// Case-insensitive search of the payload for a keyword.
    pub fn contains_keyword(&self, keyword: &str) -> bool {
        match self.payload.inspectable_text() {
            Some(text) => text
                .to_ascii_uppercase()
                .contains(&keyword.to_ascii_uppercase()),
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
