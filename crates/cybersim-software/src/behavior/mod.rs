//! Type-specific program behavior.
//!
//! A [`Behavior`] decides which inbound payloads a program accepts, what it
//! does with them, what `execute`/`connect` mean for it, and how it reacts
//! to its environment each timestep. Lifecycle state lives in
//! [`SoftwareCore`], which every hook receives.

mod database;
mod dns;
mod web;

pub use database::{
    AttackStage, DataManipulationBot, DatabaseClient, DatabaseService, DATABASE_FILE,
    DATABASE_FOLDER,
};
pub use dns::{DnsClient, DnsServer};
pub use web::{BrowserHistoryItem, WebBrowser, WebServer};

use crate::{InboundMessage, SoftwareCore, SoftwareError, SoftwareKind};
use cybersim_common::{RequestResponse, SimContext};
use cybersim_filesystem::FileSystem;
use cybersim_packet::{parse_ipv4, IpProtocol, Payload, Port};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

// ============================================================================
// Software Types
// ============================================================================

/// Installable program types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SoftwareType {
    /// A program with no protocol logic.
    Generic,
    /// Answers DNS queries from its record table.
    DnsServer,
    /// Resolves and caches domain names.
    DnsClient,
    /// Answers HTTP requests.
    WebServer,
    /// Fetches URLs and keeps a history.
    WebBrowser,
    /// Serves queries against `database/database.db`.
    DatabaseService,
    /// Opens sessions and runs queries against a database service.
    DatabaseClient,
    /// Attacker tool that wipes a database.
    DataManipulationBot,
}

impl SoftwareType {
    /// All types, for catalogues.
    pub const ALL: &'static [SoftwareType] = &[
        SoftwareType::Generic,
        SoftwareType::DnsServer,
        SoftwareType::DnsClient,
        SoftwareType::WebServer,
        SoftwareType::WebBrowser,
        SoftwareType::DatabaseService,
        SoftwareType::DatabaseClient,
        SoftwareType::DataManipulationBot,
    ];

    /// Name used in scenarios and requests.
    pub fn name(self) -> &'static str {
        match self {
            SoftwareType::Generic => "Generic",
            SoftwareType::DnsServer => "DNSServer",
            SoftwareType::DnsClient => "DNSClient",
            SoftwareType::WebServer => "WebServer",
            SoftwareType::WebBrowser => "WebBrowser",
            SoftwareType::DatabaseService => "DatabaseService",
            SoftwareType::DatabaseClient => "DatabaseClient",
            SoftwareType::DataManipulationBot => "DataManipulationBot",
        }
    }

    /// Check whether the type can be installed as `kind`.
    pub fn allows(self, kind: SoftwareKind) -> bool {
        match self {
            SoftwareType::Generic => true,
            SoftwareType::DnsServer
            | SoftwareType::DnsClient
            | SoftwareType::WebServer
            | SoftwareType::DatabaseService => kind == SoftwareKind::Service,
            SoftwareType::WebBrowser
            | SoftwareType::DatabaseClient
            | SoftwareType::DataManipulationBot => kind == SoftwareKind::Application,
        }
    }

    fn default_endpoint(self) -> (Port, IpProtocol) {
        match self {
            SoftwareType::Generic => (Port(0), IpProtocol::Tcp),
            SoftwareType::DnsServer | SoftwareType::DnsClient => (Port::DNS, IpProtocol::Udp),
            SoftwareType::WebServer | SoftwareType::WebBrowser => (Port::HTTP, IpProtocol::Tcp),
            SoftwareType::DatabaseService
            | SoftwareType::DatabaseClient
            | SoftwareType::DataManipulationBot => (Port::POSTGRES_SERVER, IpProtocol::Tcp),
        }
    }
}

impl fmt::Display for SoftwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SoftwareType {
    type Err = SoftwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SoftwareType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SoftwareError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-program configuration from the scenario file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoftwareOptions {
    /// Listening port (generic software).
    #[serde(default)]
    pub port: Option<u16>,
    /// Transport protocol (generic software).
    #[serde(default)]
    pub protocol: Option<String>,
    /// Server address for DNS and database clients.
    #[serde(default)]
    pub server_ip: Option<String>,
    /// Database password.
    #[serde(default)]
    pub password: Option<String>,
    /// Default URL of a web browser.
    #[serde(default)]
    pub target_url: Option<String>,
    /// DNS server records: domain -> address.
    #[serde(default)]
    pub domain_mapping: BTreeMap<String, String>,
    /// Query the data manipulation bot sends.
    #[serde(default)]
    pub payload: Option<String>,
    /// Probability the bot's port scan succeeds.
    #[serde(default)]
    pub port_scan_p: Option<f64>,
    /// Probability the bot's attack goes ahead.
    #[serde(default)]
    pub data_manipulation_p: Option<f64>,
}

impl SoftwareOptions {
    fn parse_ip(name: &str, value: Option<&str>) -> Result<Option<Ipv4Addr>, SoftwareError> {
        value
            .map(|raw| {
                parse_ipv4(raw).map_err(|e| SoftwareError::InvalidOption {
                    name: name.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn probability(name: &str, value: Option<f64>, default: f64) -> Result<f64, SoftwareError> {
        let p = value.unwrap_or(default);
        if (0.0..=1.0).contains(&p) {
            Ok(p)
        } else {
            Err(SoftwareError::InvalidOption {
                name: name.to_string(),
                message: format!("{} is not a probability", p),
            })
        }
    }
}

// ============================================================================
// Behavior
// ============================================================================

/// What a program does.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// No protocol logic; accepts text payloads on its port.
    Generic {
        /// Listening port.
        port: Port,
        /// Transport protocol.
        protocol: IpProtocol,
    },
    /// DNS server.
    DnsServer(DnsServer),
    /// DNS client.
    DnsClient(DnsClient),
    /// Web server.
    WebServer(WebServer),
    /// Web browser.
    WebBrowser(WebBrowser),
    /// Database service.
    DatabaseService(DatabaseService),
    /// Database client.
    DatabaseClient(DatabaseClient),
    /// Data manipulation bot.
    DataManipulationBot(DataManipulationBot),
}

impl Behavior {
    /// Build the behavior of a program type from its options.
    pub fn new(software_type: SoftwareType, options: &SoftwareOptions) -> Result<Self, SoftwareError> {
        let behavior = match software_type {
            SoftwareType::Generic => {
                let (default_port, default_protocol) = software_type.default_endpoint();
                let protocol = match &options.protocol {
                    Some(raw) => raw.parse::<IpProtocol>().map_err(|e| {
                        SoftwareError::InvalidOption {
                            name: "protocol".to_string(),
                            message: e.to_string(),
                        }
                    })?,
                    None => default_protocol,
                };
                Behavior::Generic {
                    port: options.port.map(Port).unwrap_or(default_port),
                    protocol,
                }
            }
            SoftwareType::DnsServer => {
                let mut records = BTreeMap::new();
                for (domain, raw) in &options.domain_mapping {
                    if let Some(ip) = SoftwareOptions::parse_ip("domain_mapping", Some(raw))? {
                        records.insert(domain.to_ascii_lowercase(), ip);
                    }
                }
                Behavior::DnsServer(DnsServer::new(records))
            }
            SoftwareType::DnsClient => {
                let server = SoftwareOptions::parse_ip("server_ip", options.server_ip.as_deref())?;
                Behavior::DnsClient(DnsClient::new(server))
            }
            SoftwareType::WebServer => Behavior::WebServer(WebServer::default()),
            SoftwareType::WebBrowser => {
                Behavior::WebBrowser(WebBrowser::new(options.target_url.clone()))
            }
            SoftwareType::DatabaseService => {
                Behavior::DatabaseService(DatabaseService::new(options.password.clone()))
            }
            SoftwareType::DatabaseClient => Behavior::DatabaseClient(DatabaseClient::new(
                SoftwareOptions::parse_ip("server_ip", options.server_ip.as_deref())?,
                options.password.clone(),
            )),
            SoftwareType::DataManipulationBot => {
                Behavior::DataManipulationBot(DataManipulationBot::new(
                    SoftwareOptions::parse_ip("server_ip", options.server_ip.as_deref())?,
                    options.password.clone(),
                    options.payload.clone().unwrap_or_else(|| "DELETE".to_string()),
                    SoftwareOptions::probability("port_scan_p", options.port_scan_p, 0.1)?,
                    SoftwareOptions::probability(
                        "data_manipulation_p",
                        options.data_manipulation_p,
                        0.1,
                    )?,
                ))
            }
        };
        Ok(behavior)
    }

    /// Program type this behavior implements.
    pub fn software_type(&self) -> SoftwareType {
        match self {
            Behavior::Generic { .. } => SoftwareType::Generic,
            Behavior::DnsServer(_) => SoftwareType::DnsServer,
            Behavior::DnsClient(_) => SoftwareType::DnsClient,
            Behavior::WebServer(_) => SoftwareType::WebServer,
            Behavior::WebBrowser(_) => SoftwareType::WebBrowser,
            Behavior::DatabaseService(_) => SoftwareType::DatabaseService,
            Behavior::DatabaseClient(_) => SoftwareType::DatabaseClient,
            Behavior::DataManipulationBot(_) => SoftwareType::DataManipulationBot,
        }
    }

    /// Port the program binds.
    pub fn port(&self) -> Port {
        match self {
            Behavior::Generic { port, .. } => *port,
            other => other.software_type().default_endpoint().0,
        }
    }

    /// Transport protocol the program uses.
    pub fn protocol(&self) -> IpProtocol {
        match self {
            Behavior::Generic { protocol, .. } => *protocol,
            other => other.software_type().default_endpoint().1,
        }
    }

    /// Check whether the program wants a payload arriving on its port.
    pub fn accepts(&self, payload: &Payload) -> bool {
        match self {
            Behavior::Generic { .. } => matches!(payload, Payload::Text { .. } | Payload::None),
            Behavior::DnsServer(_) => DnsServer::accepts(payload),
            Behavior::DnsClient(_) => DnsClient::accepts(payload),
            Behavior::WebServer(_) => WebServer::accepts(payload),
            Behavior::WebBrowser(b) => b.accepts(payload),
            Behavior::DatabaseService(_) => DatabaseService::accepts(payload),
            Behavior::DatabaseClient(c) => c.accepts(payload),
            Behavior::DataManipulationBot(b) => b.accepts(payload),
        }
    }

    /// Handle an inbound message.
    pub fn receive(
        &mut self,
        core: &mut SoftwareCore,
        msg: &InboundMessage,
        fs: &mut FileSystem,
        ctx: &mut SimContext,
    ) {
        match self {
            Behavior::Generic { .. } => {}
            Behavior::DnsServer(s) => s.receive(core, msg),
            Behavior::DnsClient(c) => c.receive(msg),
            Behavior::WebServer(s) => s.receive(core, msg),
            Behavior::WebBrowser(b) => b.receive(msg),
            Behavior::DatabaseService(s) => s.receive(core, msg, fs, ctx),
            Behavior::DatabaseClient(c) => c.receive(msg),
            Behavior::DataManipulationBot(b) => b.receive(msg),
        }
    }

    /// The `execute` request.
    pub fn execute(
        &mut self,
        core: &mut SoftwareCore,
        args: &[String],
        ctx: &mut SimContext,
    ) -> RequestResponse {
        match self {
            Behavior::Generic { .. } | Behavior::DnsServer(_) | Behavior::WebServer(_) => {
                RequestResponse::success()
            }
            Behavior::DatabaseService(s) => s.execute(core),
            Behavior::DnsClient(c) => c.execute(core, args),
            Behavior::WebBrowser(b) => b.execute(core, args),
            Behavior::DatabaseClient(c) => c.execute(core, args, ctx),
            Behavior::DataManipulationBot(b) => b.execute(core, ctx),
        }
    }

    /// The `connect` request.
    pub fn connect(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        match self {
            Behavior::DatabaseClient(c) => c.connect(core, ctx),
            Behavior::DataManipulationBot(b) => b.connect(core, ctx),
            _ => RequestResponse::failure("connect is not supported by this software"),
        }
    }

    /// Resolve an outstanding `execute` or `connect` after traffic has
    /// drained. Returns `pending` if the behavior sent more traffic.
    pub fn poll(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        match self {
            Behavior::DnsClient(c) => c.poll(),
            Behavior::WebBrowser(b) => b.poll(),
            Behavior::DatabaseClient(c) => c.poll(core, ctx),
            Behavior::DataManipulationBot(b) => b.poll(core, ctx),
            _ => RequestResponse::failure("nothing outstanding"),
        }
    }

    /// Create files the program depends on.
    pub fn provision(&mut self, fs: &mut FileSystem, ctx: &mut SimContext) {
        if let Behavior::DatabaseService(s) = self {
            s.provision(fs, ctx);
        }
    }

    /// React to the environment once per timestep.
    pub fn apply_timestep(
        &mut self,
        core: &mut SoftwareCore,
        fs: &mut FileSystem,
        ctx: &mut SimContext,
    ) {
        if let Behavior::DatabaseService(s) = self {
            s.apply_timestep(core, fs, ctx);
        }
    }

    // ------------------------------------------------------------------------
    // Name resolution hooks used by the software manager
    // ------------------------------------------------------------------------

    /// Domain a browser is waiting to resolve, and whether a query was sent.
    pub fn pending_domain(&self) -> Option<(String, bool)> {
        match self {
            Behavior::WebBrowser(b) => b.pending_domain(),
            _ => None,
        }
    }

    /// Cached address of a domain (DNS clients only).
    pub fn cached_address(&self, domain: &str) -> Option<Ipv4Addr> {
        match self {
            Behavior::DnsClient(c) => c.cached(domain),
            _ => None,
        }
    }

    /// Send a DNS query (DNS clients only). Returns false if none was sent.
    pub fn send_query(&mut self, core: &mut SoftwareCore, domain: &str) -> bool {
        match self {
            Behavior::DnsClient(c) => c.query(core, domain),
            _ => false,
        }
    }

    /// Hand a browser the outcome of its name resolution.
    pub fn resolved(
        &mut self,
        core: &mut SoftwareCore,
        address: Option<Ipv4Addr>,
        queried: bool,
    ) -> RequestResponse {
        match self {
            Behavior::WebBrowser(b) => b.resolved(core, address, queried),
            _ => RequestResponse::failure("nothing outstanding"),
        }
    }

    /// Type-specific part of the snapshot.
    pub fn describe_state(&self) -> Value {
        match self {
            Behavior::Generic { .. } => json!({}),
            Behavior::DnsServer(s) => s.describe_state(),
            Behavior::DnsClient(c) => c.describe_state(),
            Behavior::WebServer(s) => s.describe_state(),
            Behavior::WebBrowser(b) => b.describe_state(),
            Behavior::DatabaseService(s) => s.describe_state(),
            Behavior::DatabaseClient(c) => c.describe_state(),
            Behavior::DataManipulationBot(b) => b.describe_state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_parse_case_insensitively() {
        for t in SoftwareType::ALL {
            assert_eq!(t.name().to_lowercase().parse::<SoftwareType>().unwrap(), *t);
        }
        assert!(matches!(
            "Telnet".parse::<SoftwareType>(),
            Err(SoftwareError::UnknownType(_))
        ));
    }

    #[test]
    fn test_default_endpoints() {
        let opts = SoftwareOptions::default();
        let db = Behavior::new(SoftwareType::DatabaseService, &opts).unwrap();
        assert_eq!(db.port(), Port::POSTGRES_SERVER);
        assert_eq!(db.protocol(), IpProtocol::Tcp);
        let dns = Behavior::new(SoftwareType::DnsClient, &opts).unwrap();
        assert_eq!(dns.port(), Port::DNS);
        assert_eq!(dns.protocol(), IpProtocol::Udp);
    }

    #[test]
    fn test_generic_options() {
        let opts = SoftwareOptions {
            port: Some(8080),
            protocol: Some("udp".to_string()),
            ..SoftwareOptions::default()
        };
        let generic = Behavior::new(SoftwareType::Generic, &opts).unwrap();
        assert_eq!(generic.port(), Port(8080));
        assert_eq!(generic.protocol(), IpProtocol::Udp);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = SoftwareOptions {
            server_ip: Some("not-an-ip".to_string()),
            ..SoftwareOptions::default()
        };
        assert!(Behavior::new(SoftwareType::DatabaseClient, &opts).is_err());

        let opts = SoftwareOptions {
            port_scan_p: Some(1.5),
            ..SoftwareOptions::default()
        };
        assert!(Behavior::new(SoftwareType::DataManipulationBot, &opts).is_err());
    }

    #[test]
    fn test_kind_restrictions() {
        assert!(SoftwareType::DatabaseService.allows(SoftwareKind::Service));
        assert!(!SoftwareType::DatabaseService.allows(SoftwareKind::Application));
        assert!(SoftwareType::WebBrowser.allows(SoftwareKind::Application));
        assert!(SoftwareType::Generic.allows(SoftwareKind::Application));
    }
}
