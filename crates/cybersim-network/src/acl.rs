//! Access control lists for routers and firewalls.
//!
//! An ACL has `max_rules - 1` explicit slots numbered from zero plus one
//! implicit rule at position `max_rules - 1`. Frames are checked against the
//! explicit slots in position order and the first matching rule decides;
//! the implicit rule catches everything else.

use cybersim_common::{
    parse_arg, Arity, ComponentId, FromArgs, RequestDef, RequestResponse, SimComponent, SimContext,
};
use cybersim_packet::{IpProtocol, Port};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, warn};

/// Default ACL size, including the implicit rule.
pub const DEFAULT_MAX_ACL_RULES: usize = 10;

const ANY: &str = "ANY";

fn is_any(s: &str) -> bool {
    s.eq_ignore_ascii_case(ANY)
}

// ============================================================================
// Rule Types
// ============================================================================

/// Permit or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclAction {
    /// Let the frame through.
    Permit,
    /// Drop the frame.
    Deny,
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclAction::Permit => write!(f, "PERMIT"),
            AclAction::Deny => write!(f, "DENY"),
        }
    }
}

impl FromStr for AclAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PERMIT" => Ok(AclAction::Permit),
            "DENY" => Ok(AclAction::Deny),
            _ => Err(format!("invalid permission: '{}'", s)),
        }
    }
}

/// Address side of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAddress {
    /// Matches every address.
    Any,
    /// Matches `address`, ignoring the bits set in the Cisco-style `wildcard`.
    Match {
        /// Address to compare against.
        address: Ipv4Addr,
        /// Don't-care bits; `None` means an exact match.
        wildcard: Option<Ipv4Addr>,
    },
}

impl AclAddress {
    /// Exact match on one address.
    pub fn exact(address: Ipv4Addr) -> Self {
        AclAddress::Match {
            address,
            wildcard: None,
        }
    }

    /// Wildcard match.
    pub fn wildcard(address: Ipv4Addr, wildcard: Ipv4Addr) -> Self {
        AclAddress::Match {
            address,
            wildcard: Some(wildcard),
        }
    }

    /// Check `ip` against this side of the rule.
    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        match *self {
            AclAddress::Any => true,
            AclAddress::Match {
                address,
                wildcard: None,
            } => ip == address,
            AclAddress::Match {
                address,
                wildcard: Some(wildcard),
            } => {
                let care = !u32::from(wildcard);
                u32::from(ip) & care == u32::from(address) & care
            }
        }
    }

    /// Parse an address token and a wildcard token (`ANY` for either).
    fn parse(address: &str, wildcard: &str) -> Result<Self, String> {
        if is_any(address) {
            return Ok(AclAddress::Any);
        }
        let address = address
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("invalid address: '{}'", address))?;
        if is_any(wildcard) || wildcard.eq_ignore_ascii_case("NONE") {
            return Ok(AclAddress::exact(address));
        }
        let wildcard = wildcard
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("invalid wildcard: '{}'", wildcard))?;
        Ok(AclAddress::wildcard(address, wildcard))
    }

    fn address_label(&self) -> String {
        match self {
            AclAddress::Any => ANY.to_string(),
            AclAddress::Match { address, .. } => address.to_string(),
        }
    }

    fn wildcard_label(&self) -> Option<String> {
        match self {
            AclAddress::Match {
                wildcard: Some(w), ..
            } => Some(w.to_string()),
            _ => None,
        }
    }
}

/// One ACL entry. `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    /// Decision when the rule matches.
    pub action: AclAction,
    /// Transport protocol.
    pub protocol: Option<IpProtocol>,
    /// Source address.
    pub src: AclAddress,
    /// Source port.
    pub src_port: Option<Port>,
    /// Destination address.
    pub dst: AclAddress,
    /// Destination port.
    pub dst_port: Option<Port>,
}

impl AclRule {
    /// Rule matching every frame.
    pub fn any(action: AclAction) -> Self {
        AclRule {
            action,
            protocol: None,
            src: AclAddress::Any,
            src_port: None,
            dst: AclAddress::Any,
            dst_port: None,
        }
    }

    /// Check a frame's addressing against this rule.
    ///
    /// Frames without ports (ICMP) only match rules whose ports are `ANY`.
    pub fn matches(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: IpProtocol,
        src_port: Option<Port>,
        dst_port: Option<Port>,
    ) -> bool {
        let port_ok = |rule: Option<Port>, port: Option<Port>| match rule {
            None => true,
            Some(want) => port == Some(want),
        };
        self.protocol.map_or(true, |p| p == protocol)
            && self.src.matches(src_ip)
            && self.dst.matches(dst_ip)
            && port_ok(self.src_port, src_port)
            && port_ok(self.dst_port, dst_port)
    }

    /// Structural fingerprint: hex SHA-256 of the rule's JSON encoding.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Snapshot in the flat form agents use to write rules.
    pub fn describe_state(&self) -> Value {
        let port_label = |port: Option<Port>| match port {
            Some(port) => Value::from(port.number()),
            None => Value::from(ANY),
        };
        json!({
            "action": self.action.to_string(),
            "protocol": self.protocol.map_or_else(|| ANY.to_string(), |p| p.to_string()),
            "src_ip_address": self.src.address_label(),
            "src_wildcard_mask": self.src.wildcard_label(),
            "src_port": port_label(self.src_port),
            "dst_ip_address": self.dst.address_label(),
            "dst_wildcard_mask": self.dst.wildcard_label(),
            "dst_port": port_label(self.dst_port),
        })
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = |p: Option<Port>| p.map_or_else(|| ANY.to_string(), |p| p.number().to_string());
        write!(
            f,
            "{} {} {}:{} -> {}:{}",
            self.action,
            self.protocol.map_or_else(|| ANY.to_string(), |p| p.to_string()),
            self.src.address_label(),
            port(self.src_port),
            self.dst.address_label(),
            port(self.dst_port),
        )
    }
}

/// Rule parsed from request arguments:
/// `<permission> <protocol> <src_ip> <src_wildcard> <src_port> <dst_ip> <dst_wildcard> <dst_port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRuleArgs {
    /// The parsed rule.
    pub rule: AclRule,
}

impl AclRuleArgs {
    /// Number of arguments a rule takes.
    pub const COUNT: usize = 8;
}

fn parse_port(token: &str, what: &str) -> Result<Option<Port>, String> {
    if is_any(token) {
        return Ok(None);
    }
    token
        .parse::<Port>()
        .map(Some)
        .map_err(|_| format!("invalid {}: '{}'", what, token))
}

impl FromArgs for AclRuleArgs {
    fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < Self::COUNT {
            return Err(format!("a rule needs {} arguments, got {}", Self::COUNT, args.len()));
        }
        let action = parse_arg::<AclAction>(args, 0, "permission")?;
        let protocol = if is_any(&args[1]) {
            None
        } else {
            Some(parse_arg::<IpProtocol>(args, 1, "protocol")?)
        };
        let rule = AclRule {
            action,
            protocol,
            src: AclAddress::parse(&args[2], &args[3])?,
            src_port: parse_port(&args[4], "source port")?,
            dst: AclAddress::parse(&args[5], &args[6])?,
            dst_port: parse_port(&args[7], "destination port")?,
        };
        Ok(AclRuleArgs { rule })
    }
}

// ============================================================================
// Access Control List
// ============================================================================

/// Ordered rule table with an implicit final rule.
#[derive(Debug, Clone)]
pub struct AccessControlList {
    id: ComponentId,
    max_rules: usize,
    /// Explicit slots `0..max_rules - 1`.
    rules: Vec<Option<AclRule>>,
    implicit_rule: AclRule,
}

impl AccessControlList {
    /// Create an empty ACL.
    ///
    /// `max_rules` counts the implicit rule; values below one are raised to one.
    pub fn new(ctx: &mut SimContext, implicit_action: AclAction, max_rules: usize) -> Self {
        let max_rules = max_rules.max(1);
        AccessControlList {
            id: ctx.new_id(),
            max_rules,
            rules: vec![None; max_rules - 1],
            implicit_rule: AclRule::any(implicit_action),
        }
    }

    /// Size including the implicit rule.
    pub fn max_rules(&self) -> usize {
        self.max_rules
    }

    /// Position of the implicit rule.
    pub fn implicit_position(&self) -> usize {
        self.max_rules - 1
    }

    /// Action of the implicit rule.
    pub fn implicit_action(&self) -> AclAction {
        self.implicit_rule.action
    }

    /// Rule at `position`, including the implicit rule.
    pub fn rule(&self, position: usize) -> Option<&AclRule> {
        if position == self.implicit_position() {
            return Some(&self.implicit_rule);
        }
        self.rules.get(position).and_then(Option::as_ref)
    }

    /// Number of explicit rules set.
    pub fn num_rules(&self) -> usize {
        self.rules.iter().flatten().count()
    }

    /// Put `rule` in an empty explicit slot.
    ///
    /// Returns false (and logs) if the position is out of range or taken.
    pub fn add_rule(&mut self, rule: AclRule, position: usize) -> bool {
        match self.rules.get_mut(position) {
            None => {
                warn!(
                    position,
                    max = self.max_rules - 1,
                    "ACL position out of range, rule not added"
                );
                false
            }
            Some(Some(existing)) => {
                warn!(position, existing = %existing, "ACL position occupied, rule not added");
                false
            }
            Some(slot) => {
                debug!(position, rule = %rule, "ACL rule added");
                *slot = Some(rule);
                true
            }
        }
    }

    /// Clear the first explicit rule structurally equal to `rule`.
    pub fn remove_rule(&mut self, rule: &AclRule) -> bool {
        let fingerprint = rule.fingerprint();
        let found = self
            .rules
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |r| r.fingerprint() == fingerprint));
        match found {
            Some(position) => {
                debug!(position, "ACL rule removed");
                self.rules[position] = None;
                true
            }
            None => {
                debug!(rule = %rule, "no matching ACL rule to remove");
                false
            }
        }
    }

    /// Clear the explicit rule at `position`.
    pub fn remove_rule_at(&mut self, position: usize) -> bool {
        match self.rules.get_mut(position) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                debug!(position, "ACL rule removed");
                true
            }
            _ => false,
        }
    }

    /// Clear every explicit rule.
    pub fn reset(&mut self) {
        self.rules.iter_mut().for_each(|slot| *slot = None);
        debug!("ACL reset");
    }

    /// Decide whether a frame with this addressing is dropped.
    ///
    /// First match in position order wins, then the implicit rule.
    pub fn is_blocked(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        protocol: IpProtocol,
        src_port: Option<Port>,
        dst_port: Option<Port>,
    ) -> bool {
        self.rules
            .iter()
            .flatten()
            .chain(std::iter::once(&self.implicit_rule))
            .find(|rule| rule.matches(src_ip, dst_ip, protocol, src_port, dst_port))
            .map_or(true, |rule| rule.action == AclAction::Deny)
    }
}

impl SimComponent for AccessControlList {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let mut rules = Map::new();
        for (position, rule) in self.rules.iter().enumerate() {
            if let Some(rule) = rule {
                rules.insert(position.to_string(), rule.describe_state());
            }
        }
        rules.insert(
            self.implicit_position().to_string(),
            self.implicit_rule.describe_state(),
        );
        json!({
            "uuid": self.id,
            "max_rules": self.max_rules,
            "implicit_action": self.implicit_rule.action.to_string(),
            "rules": rules,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        ACL_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn acl_add_rule(acl: &mut AccessControlList, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let parsed = AclRuleArgs::from_args(args).and_then(|parsed| {
        parse_arg::<usize>(args, AclRuleArgs::COUNT, "position").map(|position| (parsed.rule, position))
    });
    match parsed {
        Ok((rule, position)) => RequestResponse::from_bool(
            acl.add_rule(rule, position),
            format!("cannot add rule at position {}", position),
        ),
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn acl_remove_rule(acl: &mut AccessControlList, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match AclRuleArgs::from_args(args) {
        Ok(AclRuleArgs { rule }) => {
            RequestResponse::from_bool(acl.remove_rule(&rule), "no matching rule")
        }
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn acl_remove_rule_at(acl: &mut AccessControlList, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match parse_arg::<usize>(args, 0, "position") {
        Ok(position) => RequestResponse::from_bool(
            acl.remove_rule_at(position),
            format!("no rule at position {}", position),
        ),
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn acl_reset(acl: &mut AccessControlList, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    acl.reset();
    RequestResponse::success()
}

/// Requests accepted by an ACL.
pub const ACL_REQUESTS: &[RequestDef<AccessControlList>] = &[
    RequestDef::new(
        "add_rule",
        "<permission> <protocol> <src_ip> <src_wildcard> <src_port> <dst_ip> <dst_wildcard> <dst_port> <position> Add a rule",
        Arity::Exact(9),
        acl_add_rule,
    ),
    RequestDef::new(
        "remove_rule",
        "<permission> <protocol> <src_ip> <src_wildcard> <src_port> <dst_ip> <dst_wildcard> <dst_port> Remove a matching rule",
        Arity::Exact(8),
        acl_remove_rule,
    ),
    RequestDef::new("remove_rule_at", "<position> Clear one slot", Arity::Exact(1), acl_remove_rule_at),
    RequestDef::new("reset", "Clear every explicit rule", Arity::Exact(0), acl_reset),
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn tcp_rule(action: AclAction, dst_port: u16) -> AclRule {
        AclRule {
            action,
            protocol: Some(IpProtocol::Tcp),
            src: AclAddress::Any,
            src_port: None,
            dst: AclAddress::Any,
            dst_port: Some(Port(dst_port)),
        }
    }

    fn blocked(acl: &AccessControlList, protocol: IpProtocol, dst_port: Option<u16>) -> bool {
        acl.is_blocked(
            ip(192, 168, 1, 10),
            ip(192, 168, 10, 21),
            protocol,
            Some(Port(49152)),
            dst_port.map(Port),
        )
    }

    #[test]
    fn test_implicit_deny_with_permit_http() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Deny, 10);
        assert!(acl.add_rule(tcp_rule(AclAction::Permit, 80), 0));
        assert!(!blocked(&acl, IpProtocol::Tcp, Some(80)));
        assert!(blocked(&acl, IpProtocol::Tcp, Some(443)));
        assert!(blocked(&acl, IpProtocol::Icmp, None));
    }

    #[test]
    fn test_first_match_wins() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Permit, 10);
        assert!(acl.add_rule(tcp_rule(AclAction::Deny, 80), 3));
        assert!(acl.add_rule(tcp_rule(AclAction::Permit, 80), 5));
        assert!(blocked(&acl, IpProtocol::Tcp, Some(80)));

        assert!(acl.add_rule(tcp_rule(AclAction::Permit, 80), 1));
        assert!(!blocked(&acl, IpProtocol::Tcp, Some(80)));
    }

    #[test]
    fn test_add_rule_rejects_occupied_and_out_of_range() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Deny, 10);
        assert!(acl.add_rule(tcp_rule(AclAction::Permit, 80), 0));
        assert!(!acl.add_rule(tcp_rule(AclAction::Permit, 443), 0));
        assert!(!acl.add_rule(tcp_rule(AclAction::Permit, 443), 9));
        assert!(!acl.add_rule(tcp_rule(AclAction::Permit, 443), 42));
        assert!(acl.add_rule(tcp_rule(AclAction::Permit, 443), 8));
        assert_eq!(acl.num_rules(), 2);
        assert_eq!(acl.rule(9).unwrap().action, AclAction::Deny);
    }

    #[test]
    fn test_remove_rule_by_structure() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Deny, 10);
        acl.add_rule(tcp_rule(AclAction::Permit, 80), 2);
        acl.add_rule(tcp_rule(AclAction::Permit, 80), 4);
        assert!(!acl.remove_rule(&tcp_rule(AclAction::Deny, 80)));
        assert!(acl.remove_rule(&tcp_rule(AclAction::Permit, 80)));
        assert!(acl.rule(2).is_none());
        assert!(acl.rule(4).is_some());
    }

    #[test]
    fn test_wildcard_matching() {
        let subnet = AclAddress::wildcard(ip(192, 168, 10, 0), ip(0, 0, 0, 255));
        assert!(subnet.matches(ip(192, 168, 10, 77)));
        assert!(!subnet.matches(ip(192, 168, 11, 77)));
        assert!(AclAddress::exact(ip(10, 0, 0, 1)).matches(ip(10, 0, 0, 1)));
        assert!(!AclAddress::exact(ip(10, 0, 0, 1)).matches(ip(10, 0, 0, 2)));
        assert!(AclAddress::Any.matches(ip(1, 2, 3, 4)));
    }

    #[test]
    fn test_icmp_only_matches_any_port_rules() {
        let rule = tcp_rule(AclAction::Deny, 80);
        let icmp = AclRule {
            protocol: None,
            ..rule.clone()
        };
        assert!(!icmp.matches(ip(1, 1, 1, 1), ip(2, 2, 2, 2), IpProtocol::Icmp, None, None));
        assert!(AclRule::any(AclAction::Deny).matches(
            ip(1, 1, 1, 1),
            ip(2, 2, 2, 2),
            IpProtocol::Icmp,
            None,
            None
        ));
    }

    #[test]
    fn test_requests_round_trip_through_arguments() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Deny, 10);

        let add = tokens("add_rule PERMIT TCP ANY ANY ANY 192.168.10.0 0.0.0.255 HTTP 0");
        assert!(acl.apply_request(&add, &mut ctx).is_success());
        assert!(!acl.is_blocked(ip(1, 1, 1, 1), ip(192, 168, 10, 5), IpProtocol::Tcp, None, Some(Port::HTTP)));

        let remove = tokens("remove_rule PERMIT TCP ANY ANY ANY 192.168.10.0 0.0.0.255 80");
        assert!(acl.apply_request(&remove, &mut ctx).is_success());
        assert_eq!(acl.num_rules(), 0);

        let bad = tokens("add_rule ALLOW TCP ANY ANY ANY ANY ANY 80 0");
        let response = acl.apply_request(&bad, &mut ctx);
        assert_eq!(response.reason(), Some("invalid permission: 'ALLOW'"));

        let occupied = tokens("add_rule DENY ANY ANY ANY ANY ANY ANY ANY 9");
        assert!(!acl.apply_request(&occupied, &mut ctx).is_success());
    }

    #[test]
    fn test_reset_and_remove_at() {
        let mut ctx = SimContext::new(0);
        let mut acl = AccessControlList::new(&mut ctx, AclAction::Deny, 4);
        acl.add_rule(tcp_rule(AclAction::Permit, 80), 0);
        acl.add_rule(tcp_rule(AclAction::Permit, 22), 1);
        assert!(acl.remove_rule_at(1));
        assert!(!acl.remove_rule_at(1));
        acl.reset();
        assert_eq!(acl.num_rules(), 0);
        assert_eq!(acl.implicit_action(), AclAction::Deny);
    }
}
