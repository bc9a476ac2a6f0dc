//! Database service, database client and the data manipulation bot.

use crate::{InboundMessage, OperatingState, SoftwareCore, SoftwareHealth};
use cybersim_common::{RequestResponse, SimContext};
use cybersim_filesystem::{FileHealth, FileSystem};
use cybersim_packet::{DatabasePacket, Payload, Port};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Folder holding the database file.
pub const DATABASE_FOLDER: &str = "database";

/// Database file name.
pub const DATABASE_FILE: &str = "database.db";

// ============================================================================
// Service
// ============================================================================

/// Serves queries against `database/database.db` on its node.
///
/// `SELECT` and `INSERT` succeed only while the file is GOOD. `DELETE`
/// corrupts it. Each timestep a database file that is not GOOD (or missing)
/// leaves the service COMPROMISED.
#[derive(Debug, Clone)]
pub struct DatabaseService {
    password: Option<String>,
    provisioned: bool,
    queries: u64,
}

impl DatabaseService {
    pub(crate) fn new(password: Option<String>) -> Self {
        DatabaseService {
            password,
            provisioned: false,
            queries: 0,
        }
    }

    pub(crate) fn accepts(payload: &Payload) -> bool {
        matches!(
            payload,
            Payload::Database(
                DatabasePacket::Connect { .. }
                    | DatabasePacket::Disconnect { .. }
                    | DatabasePacket::Query { .. }
            )
        )
    }

    pub(crate) fn provision(&mut self, fs: &mut FileSystem, ctx: &mut SimContext) {
        if self.provisioned {
            return;
        }
        if fs.file(DATABASE_FOLDER, DATABASE_FILE).is_none() {
            if let Err(e) = fs.create_file(ctx, DATABASE_FOLDER, DATABASE_FILE, None) {
                debug!(error = %e, "database file not created");
            }
        }
        self.provisioned = true;
    }

    pub(crate) fn receive(
        &mut self,
        core: &mut SoftwareCore,
        msg: &InboundMessage,
        fs: &mut FileSystem,
        ctx: &SimContext,
    ) {
        let Payload::Database(packet) = &msg.payload else {
            return;
        };
        let session_id = packet.session_id().to_string();
        let outcome = match packet {
            DatabasePacket::Connect { password, .. } => {
                if self.password.is_some() && *password != self.password {
                    Err("invalid password".to_string())
                } else {
                    core.add_connection(&session_id, ctx.timestep())
                        .map_err(str::to_string)
                }
            }
            DatabasePacket::Disconnect { .. } => {
                let _ = core.remove_connection(&session_id);
                return;
            }
            DatabasePacket::Query { query, .. } => {
                if core.connections().contains_key(&session_id) {
                    self.run_query(query, fs)
                } else {
                    Err("no such session".to_string())
                }
            }
            DatabasePacket::Response { .. } => return,
        };
        let response = DatabasePacket::Response {
            session_id,
            success: outcome.is_ok(),
            reason: outcome.err(),
        };
        core.send(msg.src_ip, msg.src_port, Payload::Database(response));
    }

    fn run_query(&mut self, query: &str, fs: &mut FileSystem) -> Result<(), String> {
        self.queries += 1;
        let verb = query
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let Some(file) = fs.file_mut(DATABASE_FOLDER, DATABASE_FILE) else {
            return Err("database file missing".to_string());
        };
        match verb.as_str() {
            "SELECT" | "INSERT" => {
                if file.health_status() == FileHealth::Good && file.access() {
                    Ok(())
                } else {
                    Err(format!("database file is {}", file.health_status()))
                }
            }
            "DELETE" => {
                if file.corrupt() {
                    info!("database contents deleted");
                    Ok(())
                } else {
                    Err("database file is destroyed".to_string())
                }
            }
            _ => Err(format!("unsupported query: {}", query)),
        }
    }

    pub(crate) fn execute(&mut self, core: &mut SoftwareCore) -> RequestResponse {
        RequestResponse::success().with_data("connections", core.connections().len())
    }

    pub(crate) fn apply_timestep(
        &mut self,
        core: &mut SoftwareCore,
        fs: &mut FileSystem,
        ctx: &mut SimContext,
    ) {
        self.provision(fs, ctx);
        if core.operating_state() == OperatingState::Installing || core.is_patching() {
            return;
        }
        let healthy = fs
            .file(DATABASE_FOLDER, DATABASE_FILE)
            .map(|f| f.health_status() == FileHealth::Good)
            .unwrap_or(false);
        if !healthy && core.health_actual() != SoftwareHealth::Compromised {
            debug!("database file unhealthy, service compromised");
            let _ = core.compromise();
        }
    }

    pub(crate) fn describe_state(&self) -> Value {
        json!({
            "db_file": format!("{}/{}", DATABASE_FOLDER, DATABASE_FILE),
            "password_protected": self.password.is_some(),
            "queries": self.queries,
        })
    }
}

// ============================================================================
// Client Session
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Awaiting {
    Connect(String),
    Query(String),
}

/// Outcome of the last exchange with the server.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Accepted,
    Rejected(String),
}

/// Client side of a database session.
#[derive(Debug, Clone)]
struct DbSession {
    server: Option<Ipv4Addr>,
    password: Option<String>,
    session_id: Option<String>,
    awaiting: Option<Awaiting>,
    reply: Option<Reply>,
}

impl DbSession {
    fn new(server: Option<Ipv4Addr>, password: Option<String>) -> Self {
        DbSession {
            server,
            password,
            session_id: None,
            awaiting: None,
            reply: None,
        }
    }

    fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    fn awaited_session(&self) -> Option<&str> {
        match &self.awaiting {
            Some(Awaiting::Connect(id)) | Some(Awaiting::Query(id)) => Some(id),
            None => None,
        }
    }

    fn accepts(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Database(DatabasePacket::Response { session_id, .. }) => {
                self.awaited_session() == Some(session_id.as_str())
            }
            _ => false,
        }
    }

    fn receive(&mut self, msg: &InboundMessage) {
        if let Payload::Database(DatabasePacket::Response {
            success, reason, ..
        }) = &msg.payload
        {
            self.reply = Some(if *success {
                Reply::Accepted
            } else {
                Reply::Rejected(reason.clone().unwrap_or_else(|| "rejected".to_string()))
            });
        }
    }

    fn connect(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        if self.is_connected() {
            return RequestResponse::success();
        }
        let Some(server) = self.server else {
            return RequestResponse::failure("no database server configured");
        };
        let session_id = ctx.new_id().to_string();
        core.send(
            server,
            Port::POSTGRES_SERVER,
            Payload::Database(DatabasePacket::Connect {
                session_id: session_id.clone(),
                password: self.password.clone(),
            }),
        );
        self.reply = None;
        self.awaiting = Some(Awaiting::Connect(session_id));
        RequestResponse::pending()
    }

    fn query(&mut self, core: &mut SoftwareCore, query: &str) -> RequestResponse {
        let (Some(server), Some(session_id)) = (self.server, self.session_id.clone()) else {
            return RequestResponse::failure("not connected");
        };
        core.send(
            server,
            Port::POSTGRES_SERVER,
            Payload::Database(DatabasePacket::Query {
                session_id: session_id.clone(),
                query: query.to_string(),
            }),
        );
        self.reply = None;
        self.awaiting = Some(Awaiting::Query(session_id));
        RequestResponse::pending()
    }

    /// Finish the outstanding exchange, if any.
    fn poll(&mut self, core: &mut SoftwareCore, ctx: &SimContext) -> Option<RequestResponse> {
        let awaiting = self.awaiting.take()?;
        let reply = self.reply.take();
        let response = match (awaiting, reply) {
            (Awaiting::Connect(id), Some(Reply::Accepted)) => {
                let _ = core.add_connection(&id, ctx.timestep());
                self.session_id = Some(id);
                RequestResponse::success()
            }
            (Awaiting::Query(_), Some(Reply::Accepted)) => RequestResponse::success(),
            (Awaiting::Query(_), Some(Reply::Rejected(reason))) if reason == "no such session" => {
                // The server forgot us (restart or power cycle).
                if let Some(id) = self.session_id.take() {
                    let _ = core.remove_connection(&id);
                }
                RequestResponse::failure(reason)
            }
            (_, Some(Reply::Rejected(reason))) => RequestResponse::failure(reason),
            (_, None) => RequestResponse::failure("no response from database server"),
        };
        Some(response)
    }

    fn describe_state(&self) -> Value {
        json!({
            "server_ip": self.server.map(|ip| ip.to_string()),
            "connected": self.is_connected(),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Runs queries against a database service, connecting on first use.
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    session: DbSession,
    /// Query to send once the connection opens.
    queued: Option<String>,
    last_query_success: Option<bool>,
}

impl DatabaseClient {
    pub(crate) fn new(server: Option<Ipv4Addr>, password: Option<String>) -> Self {
        DatabaseClient {
            session: DbSession::new(server, password),
            queued: None,
            last_query_success: None,
        }
    }

    /// Check whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub(crate) fn accepts(&self, payload: &Payload) -> bool {
        self.session.accepts(payload)
    }

    pub(crate) fn receive(&mut self, msg: &InboundMessage) {
        self.session.receive(msg);
    }

    pub(crate) fn connect(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        self.queued = None;
        self.session.connect(core, ctx)
    }

    pub(crate) fn execute(
        &mut self,
        core: &mut SoftwareCore,
        args: &[String],
        ctx: &mut SimContext,
    ) -> RequestResponse {
        let query = if args.is_empty() {
            "SELECT".to_string()
        } else {
            args.join(" ")
        };
        if self.session.is_connected() {
            self.session.query(core, &query)
        } else {
            let response = self.session.connect(core, ctx);
            if response.is_pending() {
                self.queued = Some(query);
            }
            response
        }
    }

    pub(crate) fn poll(&mut self, core: &mut SoftwareCore, ctx: &SimContext) -> RequestResponse {
        let was_query = matches!(self.session.awaiting, Some(Awaiting::Query(_)));
        let Some(response) = self.session.poll(core, ctx) else {
            return RequestResponse::failure("nothing outstanding");
        };
        if was_query {
            self.last_query_success = Some(response.is_success());
            return response;
        }
        match self.queued.take() {
            Some(query) if response.is_success() => self.session.query(core, &query),
            Some(_) => {
                self.last_query_success = Some(false);
                response
            }
            None => response,
        }
    }

    pub(crate) fn describe_state(&self) -> Value {
        let mut state = self.session.describe_state();
        state["last_query_success"] = json!(self.last_query_success);
        state
    }
}

// ============================================================================
// Data Manipulation Bot
// ============================================================================

/// Progress of the bot's attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackStage {
    /// Never run.
    NotStarted,
    /// Logging on to the database server.
    Logon,
    /// Scanning for the database port.
    PortScan,
    /// Sending the payload.
    Attacking,
    /// Payload accepted by the server.
    Succeeded,
    /// A roll or the server refused.
    Failed,
}

/// Attacker tool: log on, scan, then send a destructive query.
///
/// The scan and attack each succeed with a configured probability drawn
/// from the simulation RNG.
#[derive(Debug, Clone)]
pub struct DataManipulationBot {
    session: DbSession,
    payload: String,
    port_scan_p: f64,
    data_manipulation_p: f64,
    stage: AttackStage,
}

impl DataManipulationBot {
    pub(crate) fn new(
        server: Option<Ipv4Addr>,
        password: Option<String>,
        payload: String,
        port_scan_p: f64,
        data_manipulation_p: f64,
    ) -> Self {
        DataManipulationBot {
            session: DbSession::new(server, password),
            payload,
            port_scan_p,
            data_manipulation_p,
            stage: AttackStage::NotStarted,
        }
    }

    /// Current attack stage.
    pub fn stage(&self) -> AttackStage {
        self.stage
    }

    pub(crate) fn accepts(&self, payload: &Payload) -> bool {
        self.session.accepts(payload)
    }

    pub(crate) fn receive(&mut self, msg: &InboundMessage) {
        self.session.receive(msg);
    }

    fn with_stage(&self, response: RequestResponse) -> RequestResponse {
        response.with_data("stage", json!(self.stage))
    }

    pub(crate) fn connect(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        self.stage = AttackStage::Logon;
        self.session.connect(core, ctx)
    }

    pub(crate) fn execute(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        if !self.session.is_connected() {
            self.stage = AttackStage::Logon;
            let response = self.session.connect(core, ctx);
            if !response.is_pending() {
                self.stage = AttackStage::Failed;
            }
            return self.with_stage(response);
        }
        let response = self.attack(core, ctx);
        self.with_stage(response)
    }

    fn attack(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        self.stage = AttackStage::PortScan;
        if ctx.rng().gen::<f64>() >= self.port_scan_p {
            self.stage = AttackStage::Failed;
            return RequestResponse::failure("port scan failed");
        }
        self.stage = AttackStage::Attacking;
        if ctx.rng().gen::<f64>() >= self.data_manipulation_p {
            self.stage = AttackStage::Failed;
            return RequestResponse::failure("attack failed");
        }
        let payload = self.payload.clone();
        self.session.query(core, &payload)
    }

    pub(crate) fn poll(&mut self, core: &mut SoftwareCore, ctx: &mut SimContext) -> RequestResponse {
        let Some(response) = self.session.poll(core, ctx) else {
            return RequestResponse::failure("nothing outstanding");
        };
        let response = match self.stage {
            AttackStage::Logon if response.is_success() => self.attack(core, ctx),
            AttackStage::Attacking if response.is_success() => {
                info!(payload = %self.payload, "data manipulation succeeded");
                self.stage = AttackStage::Succeeded;
                response
            }
            _ => {
                self.stage = AttackStage::Failed;
                response
            }
        };
        self.with_stage(response)
    }

    pub(crate) fn describe_state(&self) -> Value {
        let mut state = self.session.describe_state();
        state["stage"] = json!(self.stage);
        state["payload"] = json!(self.payload);
        state["port_scan_p"] = json!(self.port_scan_p);
        state["data_manipulation_p"] = json!(self.data_manipulation_p);
        state
    }
}
