//! Lifecycle and health state shared by every program.

use crate::{
    Behavior, InboundMessage, OperatingState, OutboundMessage, SoftwareHealth, SoftwareKind,
    SoftwareTimings, SoftwareType,
};
use cybersim_common::{
    Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext, Timestep,
};
use cybersim_filesystem::FileSystem;
use cybersim_packet::{IpProtocol, Payload, Port};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

// ============================================================================
// Core State
// ============================================================================

/// State machines, timers, connections and outbox of a program.
///
/// Kept apart from [`Behavior`] so behaviors can mutate it while their own
/// state is borrowed.
#[derive(Debug, Clone)]
pub struct SoftwareCore {
    kind: SoftwareKind,
    port: Port,
    protocol: IpProtocol,
    operating_state: OperatingState,
    health_actual: SoftwareHealth,
    health_visible: SoftwareHealth,
    patching_count: Option<u32>,
    restart_count: Option<u32>,
    install_count: Option<u32>,
    /// Open connections: id -> timestep opened.
    connections: BTreeMap<String, Timestep>,
    timings: SoftwareTimings,
    outbox: Vec<OutboundMessage>,
}

impl SoftwareCore {
    fn new(kind: SoftwareKind, port: Port, protocol: IpProtocol, timings: SoftwareTimings) -> Self {
        SoftwareCore {
            kind,
            port,
            protocol,
            operating_state: OperatingState::Stopped,
            health_actual: SoftwareHealth::Good,
            health_visible: SoftwareHealth::Unused,
            patching_count: None,
            restart_count: None,
            install_count: None,
            connections: BTreeMap::new(),
            timings,
            outbox: Vec::new(),
        }
    }

    /// Service or application.
    pub fn kind(&self) -> SoftwareKind {
        self.kind
    }

    /// Port the program listens and sends on.
    pub fn port(&self) -> Port {
        self.port
    }

    /// Transport protocol the program uses.
    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    /// Current operating state.
    pub fn operating_state(&self) -> OperatingState {
        self.operating_state
    }

    /// Ground-truth health.
    pub fn health_actual(&self) -> SoftwareHealth {
        self.health_actual
    }

    /// Health as last revealed by a scan.
    pub fn health_visible(&self) -> SoftwareHealth {
        self.health_visible
    }

    /// Open connections.
    pub fn connections(&self) -> &BTreeMap<String, Timestep> {
        &self.connections
    }

    /// Timings in force.
    pub fn timings(&self) -> SoftwareTimings {
        self.timings
    }

    /// Check whether the program is running.
    pub fn is_running(&self) -> bool {
        self.operating_state == OperatingState::Running
    }

    /// A patch countdown is in progress.
    pub fn is_patching(&self) -> bool {
        self.patching_count.is_some()
    }

    /// Queue a message from this program's port.
    pub fn send(&mut self, dst_ip: Ipv4Addr, dst_port: Port, payload: Payload) {
        self.outbox.push(OutboundMessage {
            dst_ip,
            dst_port,
            src_port: self.port,
            protocol: self.protocol,
            payload,
        });
    }

    /// Take every queued outgoing message.
    pub fn take_outbox(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbox)
    }

    fn set_operating_state(&mut self, state: OperatingState) {
        if self.operating_state != state {
            debug!(from = %self.operating_state, to = %state, "operating state change");
            self.operating_state = state;
        }
    }

    fn require_service(&self) -> Result<(), &'static str> {
        match self.kind {
            SoftwareKind::Service => Ok(()),
            SoftwareKind::Application => Err("not supported by applications"),
        }
    }

    /// STOPPED -> RUNNING.
    pub fn start(&mut self) -> Result<(), &'static str> {
        match self.operating_state {
            OperatingState::Stopped => {
                self.set_operating_state(OperatingState::Running);
                Ok(())
            }
            OperatingState::Running => Err("already running"),
            OperatingState::Disabled => Err("software is disabled"),
            OperatingState::Installing => Err("software is installing"),
            _ => Err("software must be stopped to start"),
        }
    }

    /// Any active state -> STOPPED. Connections are closed.
    pub fn stop(&mut self) -> Result<(), &'static str> {
        match self.operating_state {
            OperatingState::Running | OperatingState::Paused | OperatingState::Restarting => {
                self.restart_count = None;
                self.connections.clear();
                self.set_operating_state(OperatingState::Stopped);
                Ok(())
            }
            _ => Err("software is not running"),
        }
    }

    /// RUNNING -> PAUSED.
    pub fn pause(&mut self) -> Result<(), &'static str> {
        self.require_service()?;
        if self.operating_state != OperatingState::Running {
            return Err("software is not running");
        }
        self.set_operating_state(OperatingState::Paused);
        Ok(())
    }

    /// PAUSED -> RUNNING.
    pub fn resume(&mut self) -> Result<(), &'static str> {
        self.require_service()?;
        if self.operating_state != OperatingState::Paused {
            return Err("software is not paused");
        }
        self.set_operating_state(OperatingState::Running);
        Ok(())
    }

    /// RUNNING or PAUSED -> RESTARTING -> RUNNING after `restart_duration`.
    pub fn restart(&mut self) -> Result<(), &'static str> {
        self.require_service()?;
        match self.operating_state {
            OperatingState::Running | OperatingState::Paused => {
                if self.timings.restart_duration == 0 {
                    self.finish_restart();
                } else {
                    self.restart_count = Some(self.timings.restart_duration);
                    self.set_operating_state(OperatingState::Restarting);
                }
                Ok(())
            }
            _ => Err("software must be running or paused to restart"),
        }
    }

    /// Any -> DISABLED.
    pub fn disable(&mut self) -> Result<(), &'static str> {
        self.require_service()?;
        self.restart_count = None;
        self.install_count = None;
        self.connections.clear();
        self.set_operating_state(OperatingState::Disabled);
        Ok(())
    }

    /// DISABLED -> STOPPED.
    pub fn enable(&mut self) -> Result<(), &'static str> {
        self.require_service()?;
        if self.operating_state != OperatingState::Disabled {
            return Err("software is not disabled");
        }
        self.set_operating_state(OperatingState::Stopped);
        Ok(())
    }

    /// Start a patch; health is repaired after `patching_duration`.
    ///
    /// A COMPROMISED program stays COMPROMISED until the countdown ends.
    pub fn patch(&mut self) -> Result<(), &'static str> {
        if matches!(
            self.operating_state,
            OperatingState::Disabled | OperatingState::Installing
        ) {
            return Err("software cannot be patched in its current state");
        }
        if self.timings.patching_duration == 0 {
            self.finish_patch();
        } else {
            self.patching_count = Some(self.timings.patching_duration);
            if self.health_actual != SoftwareHealth::Compromised {
                self.health_actual = SoftwareHealth::Patching;
            }
        }
        Ok(())
    }

    /// Mark the program compromised. Refused while patching.
    pub fn compromise(&mut self) -> Result<(), &'static str> {
        if self.is_patching() {
            return Err("software is being patched");
        }
        if self.operating_state == OperatingState::Installing {
            return Err("software is installing");
        }
        if self.health_actual != SoftwareHealth::Compromised {
            debug!("software compromised");
        }
        self.health_actual = SoftwareHealth::Compromised;
        Ok(())
    }

    /// Copy actual health to visible health.
    pub fn scan(&mut self) {
        self.health_visible = self.health_actual;
    }

    /// Open a connection. Exceeding `max_sessions` overwhelms the program.
    pub fn add_connection(&mut self, id: &str, opened: Timestep) -> Result<(), &'static str> {
        if !self.is_running() {
            return Err("software is not running");
        }
        if self.connections.contains_key(id) {
            return Err("connection already exists");
        }
        self.connections.insert(id.to_string(), opened);
        if self.connections.len() > self.timings.max_sessions && !self.is_patching() {
            debug!(connections = self.connections.len(), "software overwhelmed");
            self.health_actual = SoftwareHealth::Overwhelmed;
        }
        Ok(())
    }

    /// Close a connection. Does not clear OVERWHELMED.
    pub fn remove_connection(&mut self, id: &str) -> Result<(), &'static str> {
        match self.connections.remove(id) {
            Some(_) => Ok(()),
            None => Err("no such connection"),
        }
    }

    /// Begin a timed installation.
    pub(crate) fn begin_install(&mut self) {
        if self.timings.install_duration == 0 {
            self.finish_install();
        } else {
            self.install_count = Some(self.timings.install_duration);
            self.set_operating_state(OperatingState::Installing);
        }
    }

    /// The node lost power. An unfinished installation ends with the
    /// program installed but stopped.
    pub(crate) fn power_off(&mut self) {
        self.restart_count = None;
        self.install_count = None;
        self.connections.clear();
        if self.operating_state != OperatingState::Disabled {
            self.set_operating_state(OperatingState::Stopped);
        }
    }

    /// The node finished booting.
    pub(crate) fn power_on(&mut self) {
        if self.kind == SoftwareKind::Service && self.operating_state == OperatingState::Stopped {
            self.set_operating_state(OperatingState::Running);
        }
    }

    /// Advance the patch, restart and install countdowns.
    pub(crate) fn tick(&mut self) {
        if let Some(remaining) = self.patching_count {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.finish_patch();
            } else {
                self.patching_count = Some(remaining);
            }
        }

        if let Some(remaining) = self.restart_count {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.finish_restart();
            } else {
                self.restart_count = Some(remaining);
            }
        }

        if let Some(remaining) = self.install_count {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.finish_install();
            } else {
                self.install_count = Some(remaining);
            }
        }
    }

    fn finish_patch(&mut self) {
        self.patching_count = None;
        self.health_actual = if self.connections.len() > self.timings.max_sessions {
            SoftwareHealth::Overwhelmed
        } else {
            SoftwareHealth::Good
        };
        debug!(health = %self.health_actual, "patch complete");
    }

    fn finish_restart(&mut self) {
        self.restart_count = None;
        self.connections.clear();
        if self.health_actual == SoftwareHealth::Overwhelmed {
            self.health_actual = SoftwareHealth::Good;
        }
        self.set_operating_state(OperatingState::Running);
    }

    fn finish_install(&mut self) {
        self.install_count = None;
        let state = match self.kind {
            SoftwareKind::Service => OperatingState::Running,
            SoftwareKind::Application => OperatingState::Stopped,
        };
        self.set_operating_state(state);
    }

    fn describe_state(&self) -> Value {
        json!({
            "kind": self.kind,
            "port": self.port.number(),
            "protocol": self.protocol.as_label(),
            "operating_state": self.operating_state,
            "health_state_actual": self.health_actual,
            "health_state_visible": self.health_visible,
            "patching_count": self.patching_count,
            "restart_count": self.restart_count,
            "install_count": self.install_count,
            "num_connections": self.connections.len(),
            "connections": self.connections.keys().collect::<Vec<_>>(),
            "max_sessions": self.timings.max_sessions,
        })
    }
}

// ============================================================================
// Software
// ============================================================================

/// A service or application installed on a node.
#[derive(Debug, Clone)]
pub struct Software {
    id: ComponentId,
    name: String,
    software_type: SoftwareType,
    core: SoftwareCore,
    behavior: Behavior,
}

impl Software {
    /// Create a stopped program with the given behavior.
    pub fn new(
        id: ComponentId,
        name: impl Into<String>,
        kind: SoftwareKind,
        behavior: Behavior,
        timings: SoftwareTimings,
    ) -> Self {
        let core = SoftwareCore::new(kind, behavior.port(), behavior.protocol(), timings);
        Software {
            id,
            name: name.into(),
            software_type: behavior.software_type(),
            core,
            behavior,
        }
    }

    /// Program name (unique per node).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program type.
    pub fn software_type(&self) -> SoftwareType {
        self.software_type
    }

    /// Service or application.
    pub fn kind(&self) -> SoftwareKind {
        self.core.kind
    }

    /// Lifecycle state.
    pub fn core(&self) -> &SoftwareCore {
        &self.core
    }

    /// Lifecycle state, mutably.
    pub fn core_mut(&mut self) -> &mut SoftwareCore {
        &mut self.core
    }

    /// Type-specific behavior.
    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Current operating state.
    pub fn operating_state(&self) -> OperatingState {
        self.core.operating_state
    }

    /// Ground-truth health.
    pub fn health_actual(&self) -> SoftwareHealth {
        self.core.health_actual
    }

    /// Health as last revealed by a scan.
    pub fn health_visible(&self) -> SoftwareHealth {
        self.core.health_visible
    }

    /// Check whether this program should get an inbound message.
    pub fn wants(&self, msg: &InboundMessage) -> bool {
        self.core.is_running()
            && self.core.port == msg.dst_port
            && self.core.protocol == msg.protocol
            && self.behavior.accepts(&msg.payload)
    }

    /// Handle an inbound message.
    pub fn receive(&mut self, msg: &InboundMessage, fs: &mut FileSystem, ctx: &mut SimContext) {
        self.behavior.receive(&mut self.core, msg, fs, ctx);
    }

    /// Resolve an outstanding request after the network has drained.
    pub fn poll(&mut self, ctx: &mut SimContext) -> RequestResponse {
        self.behavior.poll(&mut self.core, ctx)
    }

    /// Create any files the behavior depends on.
    pub fn provision(&mut self, fs: &mut FileSystem, ctx: &mut SimContext) {
        self.behavior.provision(fs, ctx);
    }

    pub(crate) fn behavior_mut(&mut self) -> (&mut SoftwareCore, &mut Behavior) {
        (&mut self.core, &mut self.behavior)
    }

    /// Advance timers, then let the behavior react to its environment.
    pub fn apply_timestep(&mut self, fs: &mut FileSystem, ctx: &mut SimContext) {
        self.core.tick();
        self.behavior.apply_timestep(&mut self.core, fs, ctx);
    }
}

impl SimComponent for Software {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let mut state = self.core.describe_state();
        if let Some(map) = state.as_object_mut() {
            map.insert("uuid".to_string(), json!(self.id));
            map.insert("name".to_string(), json!(self.name));
            map.insert("type".to_string(), json!(self.software_type.name()));
            map.insert("behavior".to_string(), self.behavior.describe_state());
        }
        state
    }

    fn requests() -> &'static [RequestDef<Self>] {
        SOFTWARE_REQUESTS
    }
}

// ============================================================================
// Request Handlers
// ============================================================================

fn respond(name: &str, action: &str, result: Result<(), &'static str>) -> RequestResponse {
    match result {
        Ok(()) => RequestResponse::success(),
        Err(reason) => {
            debug!(software = %name, action, reason, "software request rejected");
            RequestResponse::failure(reason)
        }
    }
}

fn sw_scan(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    sw.core.scan();
    RequestResponse::success()
}

fn sw_patch(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.patch();
    respond(&sw.name, "patch", result)
}

fn sw_compromise(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.compromise();
    respond(&sw.name, "compromise", result)
}

fn sw_start(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.start();
    respond(&sw.name, "start", result)
}

fn sw_stop(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.stop();
    respond(&sw.name, "stop", result)
}

fn sw_pause(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.pause();
    respond(&sw.name, "pause", result)
}

fn sw_resume(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.resume();
    respond(&sw.name, "resume", result)
}

fn sw_restart(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.restart();
    respond(&sw.name, "restart", result)
}

fn sw_enable(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.enable();
    respond(&sw.name, "enable", result)
}

fn sw_disable(sw: &mut Software, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.disable();
    respond(&sw.name, "disable", result)
}

fn sw_execute(sw: &mut Software, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !sw.core.is_running() {
        return RequestResponse::failure("software is not running");
    }
    sw.behavior.execute(&mut sw.core, args, ctx)
}

fn sw_connect(sw: &mut Software, _args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if !sw.core.is_running() {
        return RequestResponse::failure("software is not running");
    }
    sw.behavior.connect(&mut sw.core, ctx)
}

fn sw_add_connection(sw: &mut Software, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    let result = sw.core.add_connection(&args[0], ctx.timestep());
    respond(&sw.name, "add_connection", result)
}

fn sw_remove_connection(
    sw: &mut Software,
    args: &[String],
    _ctx: &mut SimContext,
) -> RequestResponse {
    let result = sw.core.remove_connection(&args[0]);
    respond(&sw.name, "remove_connection", result)
}

/// Requests accepted by a program.
pub const SOFTWARE_REQUESTS: &[RequestDef<Software>] = &[
    RequestDef::new("scan", "Reveal actual health", Arity::Exact(0), sw_scan),
    RequestDef::new("patch", "Patch; health returns to GOOD after patching_duration", Arity::Exact(0), sw_patch),
    RequestDef::new("compromise", "Mark compromised (refused while patching)", Arity::Exact(0), sw_compromise),
    RequestDef::new("start", "Start (applications: run)", Arity::Exact(0), sw_start),
    RequestDef::new("stop", "Stop (applications: close)", Arity::Exact(0), sw_stop),
    RequestDef::new("pause", "Pause a running service", Arity::Exact(0), sw_pause),
    RequestDef::new("resume", "Resume a paused service", Arity::Exact(0), sw_resume),
    RequestDef::new("restart", "Restart a service", Arity::Exact(0), sw_restart),
    RequestDef::new("enable", "Enable a disabled service", Arity::Exact(0), sw_enable),
    RequestDef::new("disable", "Disable a service", Arity::Exact(0), sw_disable),
    RequestDef::new("execute", "Run the program's action [args...]", Arity::AtLeast(0), sw_execute),
    RequestDef::new("connect", "Open a session with the configured server", Arity::Exact(0), sw_connect),
    RequestDef::new("add_connection", "<id> Open a connection", Arity::Exact(1), sw_add_connection),
    RequestDef::new("remove_connection", "<id> Close a connection", Arity::Exact(1), sw_remove_connection),
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoftwareOptions;

    fn service(timings: SoftwareTimings) -> Software {
        let behavior = Behavior::new(SoftwareType::Generic, &SoftwareOptions::default()).unwrap();
        Software::new(ComponentId::from_u128(1), "svc", SoftwareKind::Service, behavior, timings)
    }

    fn application() -> Software {
        let behavior = Behavior::new(SoftwareType::Generic, &SoftwareOptions::default()).unwrap();
        Software::new(
            ComponentId::from_u128(2),
            "app",
            SoftwareKind::Application,
            behavior,
            SoftwareTimings::default(),
        )
    }

    fn running_service(timings: SoftwareTimings) -> Software {
        let mut sw = service(timings);
        sw.core.start().unwrap();
        sw
    }

    fn req(sw: &mut Software, tokens: &[&str]) -> RequestResponse {
        let path: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let mut ctx = SimContext::new(0);
        sw.apply_request(&path, &mut ctx)
    }

    fn tick(sw: &mut Software) {
        sw.core.tick();
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut sw = service(SoftwareTimings::default());
        assert_eq!(sw.operating_state(), OperatingState::Stopped);
        assert!(req(&mut sw, &["start"]).is_success());
        assert!(req(&mut sw, &["pause"]).is_success());
        assert_eq!(sw.operating_state(), OperatingState::Paused);
        assert!(!req(&mut sw, &["pause"]).is_success());
        assert!(req(&mut sw, &["resume"]).is_success());
        assert!(req(&mut sw, &["disable"]).is_success());
        assert!(!req(&mut sw, &["start"]).is_success());
        assert!(req(&mut sw, &["enable"]).is_success());
        assert_eq!(sw.operating_state(), OperatingState::Stopped);
    }

    #[test]
    fn test_restart_is_timed() {
        let mut sw = running_service(SoftwareTimings::default());
        assert!(req(&mut sw, &["restart"]).is_success());
        assert_eq!(sw.operating_state(), OperatingState::Restarting);
        tick(&mut sw);
        tick(&mut sw);
        assert_eq!(sw.operating_state(), OperatingState::Restarting);
        tick(&mut sw);
        assert_eq!(sw.operating_state(), OperatingState::Running);
    }

    #[test]
    fn test_application_rejects_service_actions() {
        let mut app = application();
        assert!(req(&mut app, &["start"]).is_success());
        for action in ["pause", "restart", "disable"] {
            let resp = req(&mut app, &[action]);
            assert_eq!(resp.reason(), Some("not supported by applications"));
        }
        assert!(req(&mut app, &["stop"]).is_success());
    }

    #[test]
    fn test_patching_blocks_compromise() {
        let mut sw = running_service(SoftwareTimings::default());
        assert!(req(&mut sw, &["patch"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Patching);
        let resp = req(&mut sw, &["compromise"]);
        assert!(!resp.is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Patching);

        tick(&mut sw);
        tick(&mut sw);
        assert_eq!(sw.health_actual(), SoftwareHealth::Good);
        assert!(req(&mut sw, &["compromise"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Compromised);
    }

    #[test]
    fn test_patch_does_not_clear_compromise_until_complete() {
        let mut sw = running_service(SoftwareTimings::default());
        assert!(req(&mut sw, &["compromise"]).is_success());
        assert!(req(&mut sw, &["patch"]).is_success());
        assert!(sw.core().is_patching());
        assert_eq!(sw.health_actual(), SoftwareHealth::Compromised);

        tick(&mut sw);
        assert_eq!(sw.health_actual(), SoftwareHealth::Compromised);
        tick(&mut sw);
        assert!(!sw.core().is_patching());
        assert_eq!(sw.health_actual(), SoftwareHealth::Good);
    }

    #[test]
    fn test_patch_completion_rechecks_capacity() {
        let timings = SoftwareTimings {
            max_sessions: 0,
            ..SoftwareTimings::default()
        };
        let mut sw = running_service(timings);
        assert!(req(&mut sw, &["patch"]).is_success());
        assert!(req(&mut sw, &["add_connection", "a"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Patching);

        tick(&mut sw);
        tick(&mut sw);
        assert_eq!(sw.health_actual(), SoftwareHealth::Overwhelmed);
    }

    #[test]
    fn test_power_off_ends_install_stopped() {
        let mut sw = service(SoftwareTimings::default());
        sw.core.begin_install();
        sw.core.power_off();
        for _ in 0..3 {
            tick(&mut sw);
        }
        assert_eq!(sw.operating_state(), OperatingState::Stopped);
    }

    #[test]
    fn test_overwhelm_at_capacity_plus_one() {
        let timings = SoftwareTimings {
            max_sessions: 2,
            ..SoftwareTimings::default()
        };
        let mut sw = running_service(timings);
        assert!(req(&mut sw, &["add_connection", "a"]).is_success());
        assert!(req(&mut sw, &["add_connection", "b"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Good);
        assert!(!req(&mut sw, &["add_connection", "b"]).is_success());
        assert!(req(&mut sw, &["add_connection", "c"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Overwhelmed);

        // Removing a connection does not recover.
        assert!(req(&mut sw, &["remove_connection", "c"]).is_success());
        assert_eq!(sw.health_actual(), SoftwareHealth::Overwhelmed);
        assert!(!req(&mut sw, &["remove_connection", "c"]).is_success());
    }

    #[test]
    fn test_restart_clears_overwhelmed() {
        let timings = SoftwareTimings {
            max_sessions: 0,
            restart_duration: 1,
            ..SoftwareTimings::default()
        };
        let mut sw = running_service(timings);
        req(&mut sw, &["add_connection", "a"]);
        assert_eq!(sw.health_actual(), SoftwareHealth::Overwhelmed);
        req(&mut sw, &["restart"]);
        tick(&mut sw);
        assert_eq!(sw.health_actual(), SoftwareHealth::Good);
        assert!(sw.core().connections().is_empty());
    }

    #[test]
    fn test_scan_is_instant() {
        let mut sw = running_service(SoftwareTimings::default());
        assert_eq!(sw.health_visible(), SoftwareHealth::Unused);
        req(&mut sw, &["compromise"]);
        assert_eq!(sw.health_visible(), SoftwareHealth::Unused);
        req(&mut sw, &["scan"]);
        assert_eq!(sw.health_visible(), SoftwareHealth::Compromised);
    }

    #[test]
    fn test_tick_without_timers_is_idempotent() {
        let mut sw = running_service(SoftwareTimings::default());
        let before = sw.describe_state();
        tick(&mut sw);
        tick(&mut sw);
        assert_eq!(sw.describe_state(), before);
    }

    #[test]
    fn test_power_off_stops_and_power_on_starts_services() {
        let mut sw = running_service(SoftwareTimings::default());
        req(&mut sw, &["add_connection", "a"]);
        sw.core.power_off();
        assert_eq!(sw.operating_state(), OperatingState::Stopped);
        assert!(sw.core().connections().is_empty());
        sw.core.power_on();
        assert_eq!(sw.operating_state(), OperatingState::Running);

        let mut app = application();
        app.core.power_on();
        assert_eq!(app.operating_state(), OperatingState::Stopped);
    }

    #[test]
    fn test_install_countdown() {
        let mut sw = service(SoftwareTimings {
            install_duration: 2,
            ..SoftwareTimings::default()
        });
        sw.core.begin_install();
        assert_eq!(sw.operating_state(), OperatingState::Installing);
        assert!(!req(&mut sw, &["start"]).is_success());
        tick(&mut sw);
        tick(&mut sw);
        assert_eq!(sw.operating_state(), OperatingState::Running);
    }
}
