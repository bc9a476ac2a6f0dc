//! Per-node software manager.

use crate::{
    Behavior, InboundMessage, OutboundMessage, Software, SoftwareError, SoftwareKind,
    SoftwareOptions, SoftwareTimings, SoftwareType,
};
use cybersim_common::{
    Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
};
use cybersim_filesystem::FileSystem;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// Owns the programs of one node.
///
/// Routes inbound traffic to the running program bound to the destination
/// port, collects outbound traffic, and finishes multi-step requests once
/// the network has drained (see [`SoftwareManager::settle`]).
#[derive(Debug, Clone)]
pub struct SoftwareManager {
    id: ComponentId,
    /// Programs by name (BTreeMap for deterministic ordering).
    software: BTreeMap<String, Software>,
    timings: SoftwareTimings,
    /// Program whose request returned `pending`.
    awaiting: Option<String>,
}

impl SoftwareManager {
    /// Create an empty manager.
    pub fn new(ctx: &mut SimContext, timings: SoftwareTimings) -> Self {
        SoftwareManager {
            id: ctx.new_id(),
            software: BTreeMap::new(),
            timings,
            awaiting: None,
        }
    }

    /// Timings given to newly installed programs.
    pub fn timings(&self) -> SoftwareTimings {
        self.timings
    }

    /// All programs.
    pub fn software(&self) -> &BTreeMap<String, Software> {
        &self.software
    }

    /// Look up a program.
    pub fn get(&self, name: &str) -> Option<&Software> {
        self.software.get(name)
    }

    /// Look up a program mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Software> {
        self.software.get_mut(name)
    }

    fn build(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
        kind: SoftwareKind,
        software_type: SoftwareType,
        options: &SoftwareOptions,
    ) -> Result<Software, SoftwareError> {
        if self.software.contains_key(name) {
            return Err(SoftwareError::AlreadyInstalled(name.to_string()));
        }
        if !software_type.allows(kind) {
            return Err(SoftwareError::KindMismatch {
                software_type: software_type.name().to_string(),
                kind,
            });
        }
        let behavior = Behavior::new(software_type, options)?;
        Ok(Software::new(ctx.new_id(), name, kind, behavior, self.timings))
    }

    /// Install a program immediately (scenario build). It starts STOPPED.
    pub fn install(
        &mut self,
        ctx: &mut SimContext,
        fs: &mut FileSystem,
        name: &str,
        kind: SoftwareKind,
        software_type: SoftwareType,
        options: &SoftwareOptions,
    ) -> Result<&mut Software, SoftwareError> {
        let mut software = self.build(ctx, name, kind, software_type, options)?;
        software.provision(fs, ctx);
        debug!(software = %name, %kind, "software installed");
        Ok(self.software.entry(name.to_string()).or_insert(software))
    }

    /// Start a timed installation (agent request).
    pub fn begin_install(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
        kind: SoftwareKind,
        software_type: SoftwareType,
    ) -> Result<(), SoftwareError> {
        let mut software = self.build(ctx, name, kind, software_type, &SoftwareOptions::default())?;
        software.core_mut().begin_install();
        debug!(software = %name, %kind, "software installing");
        self.software.insert(name.to_string(), software);
        Ok(())
    }

    /// Remove a program.
    pub fn uninstall(&mut self, name: &str) -> Result<Software, SoftwareError> {
        let software = self
            .software
            .remove(name)
            .ok_or_else(|| SoftwareError::NotInstalled(name.to_string()))?;
        if self.awaiting.as_deref() == Some(name) {
            self.awaiting = None;
        }
        debug!(software = %name, "software uninstalled");
        Ok(software)
    }

    /// Route `<name> <request...>` to a program of the given kind.
    pub fn request(
        &mut self,
        kind: SoftwareKind,
        args: &[String],
        ctx: &mut SimContext,
    ) -> RequestResponse {
        let Some((name, rest)) = args.split_first() else {
            return RequestResponse::failure(format!("missing argument: {} name", kind));
        };
        let Some(software) = self.software.get_mut(name).filter(|sw| sw.kind() == kind) else {
            return RequestResponse::failure(format!("{} not installed: {}", kind, name));
        };
        let response = software.apply_request(rest, ctx);
        if response.is_pending() {
            self.awaiting = Some(name.clone());
        }
        response
    }

    /// Check whether a request is waiting on network traffic.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting.is_some()
    }

    /// Continue the outstanding request after the network has drained.
    ///
    /// Returns `pending` again if the program sent more traffic (for example
    /// a browser that just resolved its host name).
    pub fn settle(&mut self, ctx: &mut SimContext) -> RequestResponse {
        let Some(name) = self.awaiting.take() else {
            return RequestResponse::failure("nothing outstanding");
        };
        let domain = match self.software.get(&name) {
            Some(software) => software.behavior().pending_domain(),
            None => return RequestResponse::failure(format!("software not installed: {}", name)),
        };

        let response = match domain {
            Some((domain, queried)) => {
                let cached = self.dns_lookup(&domain);
                let sent = cached.is_none() && !queried && self.dns_query(&domain);
                match self.software.get_mut(&name) {
                    Some(software) => {
                        let (core, behavior) = software.behavior_mut();
                        behavior.resolved(core, cached, sent)
                    }
                    None => RequestResponse::failure(format!("software not installed: {}", name)),
                }
            }
            None => match self.software.get_mut(&name) {
                Some(software) => software.poll(ctx),
                None => RequestResponse::failure(format!("software not installed: {}", name)),
            },
        };

        if response.is_pending() {
            self.awaiting = Some(name);
        }
        response
    }

    /// Abandon the outstanding request.
    pub fn cancel_pending(&mut self) {
        self.awaiting = None;
    }

    fn is_dns_client(software: &Software) -> bool {
        software.software_type() == SoftwareType::DnsClient && software.core().is_running()
    }

    fn dns_lookup(&self, domain: &str) -> Option<Ipv4Addr> {
        self.software
            .values()
            .filter(|sw| Self::is_dns_client(sw))
            .find_map(|sw| sw.behavior().cached_address(domain))
    }

    fn dns_query(&mut self, domain: &str) -> bool {
        match self.software.values_mut().find(|sw| Self::is_dns_client(sw)) {
            Some(software) => {
                let (core, behavior) = software.behavior_mut();
                behavior.send_query(core, domain)
            }
            None => false,
        }
    }

    /// Deliver an inbound message. Returns false if no running program
    /// wanted it.
    pub fn receive(
        &mut self,
        msg: &InboundMessage,
        fs: &mut FileSystem,
        ctx: &mut SimContext,
    ) -> bool {
        match self.software.values_mut().find(|sw| sw.wants(msg)) {
            Some(software) => {
                trace!(software = %software.name(), payload = msg.payload.as_label(), "message delivered");
                software.receive(msg, fs, ctx);
                true
            }
            None => {
                trace!(port = %msg.dst_port, protocol = %msg.protocol, "no software bound");
                false
            }
        }
    }

    /// Take every program's queued outgoing messages.
    pub fn take_outbox(&mut self) -> Vec<OutboundMessage> {
        self.software
            .values_mut()
            .flat_map(|sw| sw.core_mut().take_outbox())
            .collect()
    }

    /// Start services after the node boots.
    pub fn power_on(&mut self) {
        for software in self.software.values_mut() {
            software.core_mut().power_on();
        }
    }

    /// Stop everything when the node turns off.
    pub fn power_off(&mut self) {
        self.awaiting = None;
        for software in self.software.values_mut() {
            software.core_mut().power_off();
            software.core_mut().take_outbox();
        }
    }

    /// Reveal the actual health of every program.
    pub fn scan_all(&mut self) {
        for software in self.software.values_mut() {
            software.core_mut().scan();
        }
    }

    /// Advance every program.
    pub fn apply_timestep(&mut self, fs: &mut FileSystem, ctx: &mut SimContext) {
        for software in self.software.values_mut() {
            software.apply_timestep(fs, ctx);
        }
    }
}

impl SimComponent for SoftwareManager {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let mut services = Map::new();
        let mut applications = Map::new();
        for (name, software) in &self.software {
            let target = match software.kind() {
                SoftwareKind::Service => &mut services,
                SoftwareKind::Application => &mut applications,
            };
            target.insert(name.clone(), software.describe_state());
        }
        json!({
            "uuid": self.id,
            "services": services,
            "applications": applications,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        SOFTWARE_MANAGER_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn sm_install(sm: &mut SoftwareManager, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    let kind = match args[0].parse::<SoftwareKind>() {
        Ok(kind) => kind,
        Err(e) => return RequestResponse::failure(e.to_string()),
    };
    let software_type = match args[1].parse::<SoftwareType>() {
        Ok(t) => t,
        Err(e) => return RequestResponse::failure(e.to_string()),
    };
    let name = args.get(2).map(String::as_str).unwrap_or(software_type.name());
    match sm.begin_install(ctx, name, kind, software_type) {
        Ok(()) => RequestResponse::success(),
        Err(e) => RequestResponse::failure(e.to_string()),
    }
}

fn sm_uninstall(sm: &mut SoftwareManager, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match sm.uninstall(&args[0]) {
        Ok(_) => RequestResponse::success(),
        Err(e) => RequestResponse::failure(e.to_string()),
    }
}

/// Requests accepted by a software manager.
pub const SOFTWARE_MANAGER_REQUESTS: &[RequestDef<SoftwareManager>] = &[
    RequestDef::new("install", "<kind> <type> [name] Install software", Arity::Between(2, 3), sm_install),
    RequestDef::new("uninstall", "<name> Remove software", Arity::Exact(1), sm_uninstall),
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttackStage, OperatingState, SoftwareHealth, DATABASE_FILE, DATABASE_FOLDER};
    use cybersim_filesystem::{FileHealth, FileSystemLimits};

    /// Hosts that exchange messages directly, standing in for the network.
    struct Lan {
        ctx: SimContext,
        hosts: Vec<(Ipv4Addr, SoftwareManager, FileSystem)>,
    }

    impl Lan {
        fn new() -> Self {
            Lan {
                ctx: SimContext::new(3),
                hosts: Vec::new(),
            }
        }

        fn add_host(&mut self, ip: [u8; 4], timings: SoftwareTimings) -> usize {
            let sm = SoftwareManager::new(&mut self.ctx, timings);
            let fs = FileSystem::new(&mut self.ctx, FileSystemLimits::default());
            self.hosts.push((Ipv4Addr::from(ip), sm, fs));
            self.hosts.len() - 1
        }

        fn install(&mut self, host: usize, kind: SoftwareKind, t: SoftwareType, opts: SoftwareOptions) {
            let (_, sm, fs) = &mut self.hosts[host];
            let sw = sm.install(&mut self.ctx, fs, t.name(), kind, t, &opts).unwrap();
            sw.core_mut().start().unwrap();
        }

        fn drain(&mut self) {
            loop {
                let mut batch = Vec::new();
                for (ip, sm, _) in &mut self.hosts {
                    for msg in sm.take_outbox() {
                        batch.push((*ip, msg));
                    }
                }
                if batch.is_empty() {
                    return;
                }
                for (src_ip, msg) in batch {
                    let inbound = InboundMessage {
                        src_ip,
                        src_port: msg.src_port,
                        dst_port: msg.dst_port,
                        protocol: msg.protocol,
                        payload: msg.payload,
                    };
                    if let Some((_, sm, fs)) =
                        self.hosts.iter_mut().find(|(ip, _, _)| *ip == msg.dst_ip)
                    {
                        sm.receive(&inbound, fs, &mut self.ctx);
                    }
                }
            }
        }

        fn request(&mut self, host: usize, kind: SoftwareKind, tokens: &[&str]) -> RequestResponse {
            let path: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
            let mut response = self.hosts[host].1.request(kind, &path, &mut self.ctx);
            for _ in 0..8 {
                if !response.is_pending() {
                    break;
                }
                self.drain();
                response = self.hosts[host].1.settle(&mut self.ctx);
            }
            response
        }

        fn timestep(&mut self) {
            for (_, sm, fs) in &mut self.hosts {
                fs.apply_timestep();
                sm.apply_timestep(fs, &mut self.ctx);
            }
        }

        fn software(&self, host: usize, name: &str) -> &Software {
            self.hosts[host].1.get(name).unwrap()
        }
    }

    fn client_opts(server: &str) -> SoftwareOptions {
        SoftwareOptions {
            server_ip: Some(server.to_string()),
            ..SoftwareOptions::default()
        }
    }

    fn db_lan(timings: SoftwareTimings) -> Lan {
        let mut lan = Lan::new();
        let server = lan.add_host([10, 0, 0, 10], timings);
        lan.install(server, SoftwareKind::Service, SoftwareType::DatabaseService, SoftwareOptions::default());
        lan
    }

    #[test]
    fn test_database_client_connects_and_queries() {
        let mut lan = db_lan(SoftwareTimings::default());
        let client = lan.add_host([10, 0, 0, 20], SoftwareTimings::default());
        lan.install(client, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.10"));

        let resp = lan.request(client, SoftwareKind::Application, &["DatabaseClient", "execute"]);
        assert!(resp.is_success(), "{:?}", resp);
        assert_eq!(lan.software(0, "DatabaseService").core().connections().len(), 1);
        let fs = &lan.hosts[0].2;
        assert_eq!(fs.file(DATABASE_FOLDER, DATABASE_FILE).unwrap().num_access(), 1);
    }

    #[test]
    fn test_query_fails_on_corrupt_database() {
        let mut lan = db_lan(SoftwareTimings::default());
        let client = lan.add_host([10, 0, 0, 20], SoftwareTimings::default());
        lan.install(client, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.10"));
        lan.hosts[0].2.file_mut(DATABASE_FOLDER, DATABASE_FILE).unwrap().corrupt();

        let resp = lan.request(client, SoftwareKind::Application, &["DatabaseClient", "execute", "SELECT"]);
        assert_eq!(resp.reason(), Some("database file is CORRUPT"));
    }

    #[test]
    fn test_database_service_keeps_existing_file() {
        let mut lan = Lan::new();
        let server = lan.add_host([10, 0, 0, 10], SoftwareTimings::default());
        lan.hosts[server]
            .2
            .create_file(&mut lan.ctx, DATABASE_FOLDER, DATABASE_FILE, Some(5))
            .unwrap();
        lan.install(server, SoftwareKind::Service, SoftwareType::DatabaseService, SoftwareOptions::default());
        let fs = &lan.hosts[server].2;
        assert_eq!(fs.file(DATABASE_FOLDER, DATABASE_FILE).unwrap().size(), 5);
    }

    #[test]
    fn test_corrupt_database_waits_for_patch() {
        let mut lan = db_lan(SoftwareTimings::default());
        lan.hosts[0].2.file_mut(DATABASE_FOLDER, DATABASE_FILE).unwrap().corrupt();
        let sm = &mut lan.hosts[0].1;
        sm.get_mut("DatabaseService").unwrap().core_mut().patch().unwrap();

        lan.timestep();
        assert_eq!(lan.software(0, "DatabaseService").health_actual(), SoftwareHealth::Patching);
        lan.timestep();
        lan.timestep();
        assert_eq!(lan.software(0, "DatabaseService").health_actual(), SoftwareHealth::Compromised);
    }

    #[test]
    fn test_unreachable_server_fails() {
        let mut lan = Lan::new();
        let client = lan.add_host([10, 0, 0, 20], SoftwareTimings::default());
        lan.install(client, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.99"));
        let resp = lan.request(client, SoftwareKind::Application, &["DatabaseClient", "connect"]);
        assert_eq!(resp.reason(), Some("no response from database server"));
    }

    #[test]
    fn test_two_connections_overwhelm_single_session_server() {
        let timings = SoftwareTimings {
            max_sessions: 1,
            ..SoftwareTimings::default()
        };
        let mut lan = db_lan(timings);
        let a = lan.add_host([10, 0, 0, 21], SoftwareTimings::default());
        let b = lan.add_host([10, 0, 0, 22], SoftwareTimings::default());
        lan.install(a, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.10"));
        lan.install(b, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.10"));

        assert!(lan.request(a, SoftwareKind::Application, &["DatabaseClient", "connect"]).is_success());
        assert!(lan.request(b, SoftwareKind::Application, &["DatabaseClient", "connect"]).is_success());
        assert_eq!(
            lan.software(0, "DatabaseService").health_actual(),
            SoftwareHealth::Overwhelmed
        );
    }

    #[test]
    fn test_bot_corrupts_database_and_compromises_service() {
        let mut lan = db_lan(SoftwareTimings::default());
        let attacker = lan.add_host([10, 0, 0, 66], SoftwareTimings::default());
        let opts = SoftwareOptions {
            port_scan_p: Some(1.0),
            data_manipulation_p: Some(1.0),
            ..client_opts("10.0.0.10")
        };
        lan.install(attacker, SoftwareKind::Application, SoftwareType::DataManipulationBot, opts);

        let resp = lan.request(attacker, SoftwareKind::Application, &["DataManipulationBot", "execute"]);
        assert!(resp.is_success(), "{:?}", resp);
        assert_eq!(resp.data["stage"], "SUCCEEDED");
        match lan.software(attacker, "DataManipulationBot").behavior() {
            Behavior::DataManipulationBot(bot) => assert_eq!(bot.stage(), AttackStage::Succeeded),
            other => panic!("unexpected behavior {:?}", other),
        }
        let file = lan.hosts[0].2.file(DATABASE_FOLDER, DATABASE_FILE).unwrap();
        assert_eq!(file.health_status(), FileHealth::Corrupt);

        lan.timestep();
        assert_eq!(
            lan.software(0, "DatabaseService").health_actual(),
            SoftwareHealth::Compromised
        );
    }

    #[test]
    fn test_bot_with_zero_probability_fails_scan() {
        let mut lan = db_lan(SoftwareTimings::default());
        let attacker = lan.add_host([10, 0, 0, 66], SoftwareTimings::default());
        let opts = SoftwareOptions {
            port_scan_p: Some(0.0),
            ..client_opts("10.0.0.10")
        };
        lan.install(attacker, SoftwareKind::Application, SoftwareType::DataManipulationBot, opts);
        let resp = lan.request(attacker, SoftwareKind::Application, &["DataManipulationBot", "execute"]);
        assert_eq!(resp.reason(), Some("port scan failed"));
        assert_eq!(resp.data["stage"], "FAILED");
    }

    #[test]
    fn test_browser_resolves_then_fetches() {
        let mut lan = Lan::new();
        let dns = lan.add_host([10, 0, 0, 2], SoftwareTimings::default());
        let web = lan.add_host([10, 0, 0, 3], SoftwareTimings::default());
        let client = lan.add_host([10, 0, 0, 4], SoftwareTimings::default());
        let mut records = BTreeMap::new();
        records.insert("arcd.com".to_string(), "10.0.0.3".to_string());
        lan.install(
            dns,
            SoftwareKind::Service,
            SoftwareType::DnsServer,
            SoftwareOptions {
                domain_mapping: records,
                ..SoftwareOptions::default()
            },
        );
        lan.install(web, SoftwareKind::Service, SoftwareType::WebServer, SoftwareOptions::default());
        lan.install(client, SoftwareKind::Service, SoftwareType::DnsClient, client_opts("10.0.0.2"));
        lan.install(
            client,
            SoftwareKind::Application,
            SoftwareType::WebBrowser,
            SoftwareOptions {
                target_url: Some("http://arcd.com/users/".to_string()),
                ..SoftwareOptions::default()
            },
        );

        let resp = lan.request(client, SoftwareKind::Application, &["WebBrowser", "execute"]);
        assert!(resp.is_success(), "{:?}", resp);
        assert_eq!(resp.data["status"], 200);
        match lan.software(client, "WebBrowser").behavior() {
            Behavior::WebBrowser(browser) => {
                assert_eq!(browser.history().len(), 1);
                assert_eq!(browser.history()[0].status, Some(200));
            }
            other => panic!("unexpected behavior {:?}", other),
        }

        // Unknown domain fails after the query comes back empty.
        let resp = lan.request(client, SoftwareKind::Application, &["WebBrowser", "execute", "http://nowhere.org"]);
        assert_eq!(resp.reason(), Some("could not resolve nowhere.org"));
    }

    #[test]
    fn test_install_and_uninstall_requests() {
        let mut ctx = SimContext::new(0);
        let mut sm = SoftwareManager::new(&mut ctx, SoftwareTimings::default());
        let path = |tokens: &[&str]| tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>();

        let resp = sm.apply_request(&path(&["install", "service", "WebServer"]), &mut ctx);
        assert!(resp.is_success());
        assert_eq!(sm.get("WebServer").unwrap().operating_state(), OperatingState::Installing);

        let resp = sm.apply_request(&path(&["install", "application", "WebServer", "web2"]), &mut ctx);
        assert!(!resp.is_success());

        let resp = sm.apply_request(&path(&["install", "service", "WebServer"]), &mut ctx);
        assert_eq!(resp.reason(), Some("Software already installed: WebServer"));

        assert!(sm.apply_request(&path(&["uninstall", "WebServer"]), &mut ctx).is_success());
        assert!(!sm.apply_request(&path(&["uninstall", "WebServer"]), &mut ctx).is_success());
    }

    #[test]
    fn test_request_checks_kind() {
        let mut lan = db_lan(SoftwareTimings::default());
        let resp = lan.request(0, SoftwareKind::Application, &["DatabaseService", "scan"]);
        assert_eq!(resp.reason(), Some("application not installed: DatabaseService"));
        let resp = lan.request(0, SoftwareKind::Service, &["DatabaseService", "scan"]);
        assert!(resp.is_success());
    }

    #[test]
    fn test_stopped_software_receives_nothing() {
        let mut lan = db_lan(SoftwareTimings::default());
        let client = lan.add_host([10, 0, 0, 20], SoftwareTimings::default());
        lan.install(client, SoftwareKind::Application, SoftwareType::DatabaseClient, client_opts("10.0.0.10"));
        lan.hosts[0].1.power_off();

        let resp = lan.request(client, SoftwareKind::Application, &["DatabaseClient", "connect"]);
        assert!(!resp.is_success());
        assert_eq!(
            lan.software(0, "DatabaseService").operating_state(),
            OperatingState::Stopped
        );
        lan.hosts[0].1.power_on();
        assert!(lan.request(client, SoftwareKind::Application, &["DatabaseClient", "connect"]).is_success());
    }
}
