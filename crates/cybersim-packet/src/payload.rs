//! Application-layer payloads carried inside frames.

use crate::MacAddress;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;

// ============================================================================
// Payload
// ============================================================================

/// Application payload of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// No payload (e.g. ICMP).
    #[default]
    None,
    /// Address resolution.
    Arp(ArpPacket),
    /// Name resolution.
    Dns(DnsPacket),
    /// Web traffic.
    Http(HttpPacket),
    /// Database session traffic.
    Database(DatabasePacket),
    /// Free-form text.
    Text {
        /// Text body.
        body: String,
    },
}

impl Payload {
    /// Text that intrusion-detection keyword matching looks at.
    pub fn inspectable_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Payload::Text { body } => Some(Cow::Borrowed(body)),
            Payload::Database(DatabasePacket::Query { query, .. }) => Some(Cow::Borrowed(query)),
            Payload::Http(HttpPacket::Request { url, .. }) => Some(Cow::Borrowed(url)),
            Payload::Dns(dns) => Some(Cow::Borrowed(&dns.domain_name)),
            _ => None,
        }
    }

    /// Returns a lowercase label for metrics and traces.
    pub fn as_label(&self) -> &'static str {
        match self {
            Payload::None => "none",
            Payload::Arp(_) => "arp",
            Payload::Dns(_) => "dns",
            Payload::Http(_) => "http",
            Payload::Database(_) => "database",
            Payload::Text { .. } => "text",
        }
    }
}

// ============================================================================
// ARP
// ============================================================================

/// ARP operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArpOperation {
    /// Who-has request (broadcast).
    Request,
    /// Is-at reply (unicast).
    Reply,
}

/// ARP packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpPacket {
    /// Request or reply.
    pub operation: ArpOperation,
    /// MAC of the sender.
    pub sender_mac: MacAddress,
    /// IP of the sender.
    pub sender_ip: Ipv4Addr,
    /// IP being resolved.
    pub target_ip: Ipv4Addr,
    /// MAC of the target, filled in on replies.
    pub target_mac: Option<MacAddress>,
}

impl ArpPacket {
    /// Build a who-has request.
    pub fn request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpPacket {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_ip,
            target_mac: None,
        }
    }

    /// Build the reply to this request, answering with `our_mac`.
    pub fn reply(&self, our_mac: MacAddress) -> Self {
        ArpPacket {
            operation: ArpOperation::Reply,
            sender_mac: our_mac,
            sender_ip: self.target_ip,
            target_ip: self.sender_ip,
            target_mac: Some(self.sender_mac),
        }
    }
}

// ============================================================================
// DNS
// ============================================================================

/// DNS query or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsPacket {
    /// Domain being resolved.
    pub domain_name: String,
    /// True for answers.
    pub is_reply: bool,
    /// Resolved address (answers only; `None` means NXDOMAIN).
    pub resolved: Option<Ipv4Addr>,
}

impl DnsPacket {
    /// Build a query.
    pub fn query(domain_name: impl Into<String>) -> Self {
        DnsPacket {
            domain_name: domain_name.into(),
            is_reply: false,
            resolved: None,
        }
    }

    /// Build the answer to this query.
    pub fn answer(&self, resolved: Option<Ipv4Addr>) -> Self {
        DnsPacket {
            domain_name: self.domain_name.clone(),
            is_reply: true,
            resolved,
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// HTTP status codes the simulation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum HttpStatusCode {
    /// 200.
    Ok = 200,
    /// 400.
    BadRequest = 400,
    /// 404.
    NotFound = 404,
    /// 405.
    MethodNotAllowed = 405,
    /// 500.
    InternalServerError = 500,
}

impl HttpStatusCode {
    /// Numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for HttpStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// HTTP request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpPacket {
    /// Client to server.
    Request {
        /// Method.
        method: HttpMethod,
        /// Full URL, e.g. `http://arcd.com/users/`.
        url: String,
    },
    /// Server to client.
    Response {
        /// Status code.
        status: HttpStatusCode,
        /// URL the response answers.
        url: String,
    },
}

// ============================================================================
// Database
// ============================================================================

/// Database session traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabasePacket {
    /// Open a session.
    Connect {
        /// Client-chosen session id.
        session_id: String,
        /// Password offered.
        password: Option<String>,
    },
    /// Close a session.
    Disconnect {
        /// Session to close.
        session_id: String,
    },
    /// Run a query inside a session.
    Query {
        /// Session the query belongs to.
        session_id: String,
        /// Query text (`SELECT`, `INSERT`, `DELETE`).
        query: String,
    },
    /// Server answer to any of the above.
    Response {
        /// Session the answer belongs to.
        session_id: String,
        /// Whether the server accepted the request.
        success: bool,
        /// Rejection reason.
        reason: Option<String>,
    },
}

impl DatabasePacket {
    /// Session id carried by the packet.
    pub fn session_id(&self) -> &str {
        match self {
            DatabasePacket::Connect { session_id, .. }
            | DatabasePacket::Disconnect { session_id }
            | DatabasePacket::Query { session_id, .. }
            | DatabasePacket::Response { session_id, .. } => session_id,
        }
    }
}
