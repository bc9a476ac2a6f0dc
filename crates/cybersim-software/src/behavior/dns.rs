//! DNS server and client.

use crate::{InboundMessage, SoftwareCore};
use cybersim_common::RequestResponse;
use cybersim_packet::{DnsPacket, Payload, Port};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::trace;

/// Answers queries from a static record table.
#[derive(Debug, Clone, Default)]
pub struct DnsServer {
    records: BTreeMap<String, Ipv4Addr>,
    queries_answered: u64,
}

impl DnsServer {
    pub(crate) fn new(records: BTreeMap<String, Ipv4Addr>) -> Self {
        DnsServer {
            records,
            queries_answered: 0,
        }
    }

    /// Look up a record.
    pub fn record(&self, domain: &str) -> Option<Ipv4Addr> {
        self.records.get(&domain.to_ascii_lowercase()).copied()
    }

    pub(crate) fn accepts(payload: &Payload) -> bool {
        matches!(payload, Payload::Dns(dns) if !dns.is_reply)
    }

    pub(crate) fn receive(&mut self, core: &mut SoftwareCore, msg: &InboundMessage) {
        let Payload::Dns(query) = &msg.payload else {
            return;
        };
        let answer = query.answer(self.record(&query.domain_name));
        trace!(domain = %query.domain_name, resolved = ?answer.resolved, "dns query answered");
        self.queries_answered += 1;
        core.send(msg.src_ip, msg.src_port, Payload::Dns(answer));
    }

    pub(crate) fn describe_state(&self) -> Value {
        json!({
            "records": self.records,
            "queries_answered": self.queries_answered,
        })
    }
}

/// Resolves names through a configured server and caches the answers.
#[derive(Debug, Clone, Default)]
pub struct DnsClient {
    server: Option<Ipv4Addr>,
    cache: BTreeMap<String, Ipv4Addr>,
    /// Domain an `execute` is waiting on.
    awaiting: Option<String>,
}

impl DnsClient {
    pub(crate) fn new(server: Option<Ipv4Addr>) -> Self {
        DnsClient {
            server,
            ..DnsClient::default()
        }
    }

    pub(crate) fn accepts(payload: &Payload) -> bool {
        matches!(payload, Payload::Dns(dns) if dns.is_reply)
    }

    pub(crate) fn receive(&mut self, msg: &InboundMessage) {
        if let Payload::Dns(DnsPacket {
            domain_name,
            resolved: Some(address),
            ..
        }) = &msg.payload
        {
            self.cache.insert(domain_name.to_ascii_lowercase(), *address);
        }
    }

    /// Cached address of a domain.
    pub fn cached(&self, domain: &str) -> Option<Ipv4Addr> {
        self.cache.get(&domain.to_ascii_lowercase()).copied()
    }

    /// Send a query to the configured server.
    pub(crate) fn query(&mut self, core: &mut SoftwareCore, domain: &str) -> bool {
        match self.server {
            Some(server) => {
                core.send(server, Port::DNS, Payload::Dns(DnsPacket::query(domain)));
                true
            }
            None => false,
        }
    }

    pub(crate) fn execute(&mut self, core: &mut SoftwareCore, args: &[String]) -> RequestResponse {
        let Some(domain) = args.first() else {
            return RequestResponse::failure("missing argument: domain");
        };
        if let Some(address) = self.cached(domain) {
            return RequestResponse::success().with_data("address", address.to_string());
        }
        if !self.query(core, domain) {
            return RequestResponse::failure("no DNS server configured");
        }
        self.awaiting = Some(domain.clone());
        RequestResponse::pending()
    }

    pub(crate) fn poll(&mut self) -> RequestResponse {
        let Some(domain) = self.awaiting.take() else {
            return RequestResponse::failure("nothing outstanding");
        };
        match self.cached(&domain) {
            Some(address) => RequestResponse::success().with_data("address", address.to_string()),
            None => RequestResponse::failure(format!("could not resolve {}", domain)),
        }
    }

    pub(crate) fn describe_state(&self) -> Value {
        json!({
            "server": self.server.map(|ip| ip.to_string()),
            "cache": self.cache,
        })
    }
}
