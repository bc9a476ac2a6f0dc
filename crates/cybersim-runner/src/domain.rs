//! User accounts on the simulation's domain controller.
//!
//! Accounts live outside the network: they are not tied to a node and are
//! addressed as `domain account ...`.

use cybersim_common::{
    dispatch, Arity, ComponentId, RequestDef, RequestResponse, SimComponent, SimContext,
};
use cybersim_model::AccountConfig;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// Account
// ============================================================================

/// One user account.
#[derive(Debug, Clone)]
pub struct Account {
    id: ComponentId,
    username: String,
    password: String,
    admin: bool,
    enabled: bool,
    logged_on: bool,
    num_logons: u64,
    num_logoffs: u64,
    num_password_changes: u64,
}

impl Account {
    /// Create an enabled, logged-off account.
    pub fn new(ctx: &mut SimContext, username: &str, password: &str, admin: bool) -> Self {
        Account {
            id: ctx.new_id(),
            username: username.to_string(),
            password: password.to_string(),
            admin,
            enabled: true,
            logged_on: false,
            num_logons: 0,
            num_logoffs: 0,
            num_password_changes: 0,
        }
    }

    /// Login name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Administrator account.
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Whether logons are allowed.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a session is open.
    pub fn is_logged_on(&self) -> bool {
        self.logged_on
    }

    /// Successful logons so far.
    pub fn num_logons(&self) -> u64 {
        self.num_logons
    }

    /// Logoffs so far, including forced ones.
    pub fn num_logoffs(&self) -> u64 {
        self.num_logoffs
    }

    /// Disable the account. An open session is closed.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        if self.logged_on {
            self.logged_on = false;
            self.num_logoffs += 1;
        }
        true
    }

    /// Re-enable the account.
    pub fn enable(&mut self) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        true
    }

    /// Open a session.
    pub fn logon(&mut self, password: &str) -> Result<(), &'static str> {
        if !self.enabled {
            return Err("account is disabled");
        }
        if self.password != password {
            return Err("wrong password");
        }
        if self.logged_on {
            return Err("already logged on");
        }
        self.logged_on = true;
        self.num_logons += 1;
        Ok(())
    }

    /// Close the session.
    pub fn logoff(&mut self) -> bool {
        if !self.logged_on {
            return false;
        }
        self.logged_on = false;
        self.num_logoffs += 1;
        true
    }

    /// Replace the password after checking the current one.
    pub fn change_password(&mut self, old: &str, new: &str) -> Result<(), &'static str> {
        if self.password != old {
            return Err("wrong password");
        }
        self.password = new.to_string();
        self.num_password_changes += 1;
        Ok(())
    }
}

impl SimComponent for Account {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        json!({
            "uuid": self.id,
            "admin": self.admin,
            "enabled": self.enabled,
            "logged_on": self.logged_on,
            "num_logons": self.num_logons,
            "num_logoffs": self.num_logoffs,
            "num_password_changes": self.num_password_changes,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        ACCOUNT_REQUESTS
    }
}

fn account_disable(account: &mut Account, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(account.disable(), "account already disabled")
}

fn account_enable(account: &mut Account, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(account.enable(), "account already enabled")
}

fn account_logon(account: &mut Account, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match account.logon(&args[0]) {
        Ok(()) => RequestResponse::success(),
        Err(reason) => RequestResponse::failure(reason),
    }
}

fn account_logoff(account: &mut Account, _args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    RequestResponse::from_bool(account.logoff(), "not logged on")
}

fn account_change_password(account: &mut Account, args: &[String], _ctx: &mut SimContext) -> RequestResponse {
    match account.change_password(&args[0], &args[1]) {
        Ok(()) => RequestResponse::success(),
        Err(reason) => RequestResponse::failure(reason),
    }
}

/// Requests accepted by an account.
pub const ACCOUNT_REQUESTS: &[RequestDef<Account>] = &[
    RequestDef::new("disable", "Disable the account and close its session", Arity::Exact(0), account_disable),
    RequestDef::new("enable", "Enable the account", Arity::Exact(0), account_enable),
    RequestDef::new("logon", "<password> Open a session", Arity::Exact(1), account_logon),
    RequestDef::new("logoff", "Close the session", Arity::Exact(0), account_logoff),
    RequestDef::new(
        "change_password",
        "<old> <new> Replace the password",
        Arity::Exact(2),
        account_change_password,
    ),
];

// ============================================================================
// Domain Controller
// ============================================================================

/// The set of accounts, keyed by username.
#[derive(Debug, Clone)]
pub struct DomainController {
    id: ComponentId,
    accounts: BTreeMap<String, Account>,
}

impl DomainController {
    /// Create a controller holding `accounts`. A repeated username replaces
    /// the earlier account.
    pub fn new(ctx: &mut SimContext, accounts: &[AccountConfig]) -> Self {
        let mut controller = DomainController {
            id: ctx.new_id(),
            accounts: BTreeMap::new(),
        };
        for config in accounts {
            let account = Account::new(ctx, &config.username, &config.password, config.admin);
            controller.accounts.insert(config.username.clone(), account);
        }
        controller
    }

    /// Accounts by username.
    pub fn accounts(&self) -> &BTreeMap<String, Account> {
        &self.accounts
    }

    /// Find an account.
    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.get(username)
    }

    /// Add an account. Returns false if the username is taken.
    pub fn add_account(&mut self, ctx: &mut SimContext, username: &str, password: &str, admin: bool) -> bool {
        if self.accounts.contains_key(username) {
            return false;
        }
        debug!(username, admin, "account added");
        self.accounts
            .insert(username.to_string(), Account::new(ctx, username, password, admin));
        true
    }
}

impl SimComponent for DomainController {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn describe_state(&self) -> Value {
        let accounts: Map<String, Value> = self
            .accounts
            .iter()
            .map(|(name, account)| (name.clone(), account.describe_state()))
            .collect();
        json!({
            "uuid": self.id,
            "accounts": accounts,
        })
    }

    fn requests() -> &'static [RequestDef<Self>] {
        DOMAIN_REQUESTS
    }
}

fn domain_account(dc: &mut DomainController, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    if args[0] == "add" {
        return dispatch(ACCOUNT_ADMIN_REQUESTS, dc, args, ctx);
    }
    match dc.accounts.get_mut(&args[0]) {
        Some(account) => account.apply_request(&args[1..], ctx),
        None => RequestResponse::failure(format!("no such account: {}", args[0])),
    }
}

fn domain_add_account(dc: &mut DomainController, args: &[String], ctx: &mut SimContext) -> RequestResponse {
    let admin = match args.get(2).map(String::as_str) {
        None => false,
        Some("admin") => true,
        Some(other) => return RequestResponse::failure(format!("invalid account type: '{}'", other)),
    };
    let added = dc.add_account(ctx, &args[0], &args[1], admin);
    RequestResponse::from_bool(added, format!("account exists: {}", args[0]))
}

const ACCOUNT_ADMIN_REQUESTS: &[RequestDef<DomainController>] = &[RequestDef::new(
    "add",
    "<username> <password> [admin] Create an account",
    Arity::Between(2, 3),
    domain_add_account,
)];

/// Requests accepted by the domain controller.
pub const DOMAIN_REQUESTS: &[RequestDef<DomainController>] = &[RequestDef::new(
    "account",
    "add <username> <password> [admin] | <username> <request...> Manage accounts",
    Arity::AtLeast(2),
    domain_account,
)];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn controller(ctx: &mut SimContext) -> DomainController {
        DomainController::new(
            ctx,
            &[AccountConfig {
                username: "alice".to_string(),
                password: "pw".to_string(),
                admin: false,
            }],
        )
    }

    #[test]
    fn test_logon_logoff_counters() {
        let mut ctx = SimContext::new(0);
        let mut dc = controller(&mut ctx);

        let wrong = dc.apply_request(&path("account alice logon nope"), &mut ctx);
        assert_eq!(wrong.reason(), Some("wrong password"));

        assert!(dc.apply_request(&path("account alice logon pw"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("account alice logon pw"), &mut ctx).is_success());
        assert!(dc.apply_request(&path("account alice logoff"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("account alice logoff"), &mut ctx).is_success());

        let alice = dc.account("alice").unwrap();
        assert_eq!(alice.num_logons(), 1);
        assert_eq!(alice.num_logoffs(), 1);
    }

    #[test]
    fn test_disable_blocks_logon_and_closes_session() {
        let mut ctx = SimContext::new(0);
        let mut dc = controller(&mut ctx);
        assert!(dc.apply_request(&path("account alice logon pw"), &mut ctx).is_success());
        assert!(dc.apply_request(&path("account alice disable"), &mut ctx).is_success());
        assert!(!dc.account("alice").unwrap().is_logged_on());

        let refused = dc.apply_request(&path("account alice logon pw"), &mut ctx);
        assert_eq!(refused.reason(), Some("account is disabled"));

        assert!(dc.apply_request(&path("account alice enable"), &mut ctx).is_success());
        assert!(dc.apply_request(&path("account alice logon pw"), &mut ctx).is_success());
    }

    #[test]
    fn test_change_password() {
        let mut ctx = SimContext::new(0);
        let mut dc = controller(&mut ctx);
        assert!(!dc.apply_request(&path("account alice change_password x y"), &mut ctx).is_success());
        assert!(dc.apply_request(&path("account alice change_password pw new"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("account alice logon pw"), &mut ctx).is_success());
        assert!(dc.apply_request(&path("account alice logon new"), &mut ctx).is_success());
        assert_eq!(dc.describe_state()["accounts"]["alice"]["num_password_changes"], 1);
    }

    #[test]
    fn test_add_account() {
        let mut ctx = SimContext::new(0);
        let mut dc = controller(&mut ctx);
        assert!(dc.apply_request(&path("account add bob secret admin"), &mut ctx).is_success());
        assert!(dc.account("bob").unwrap().is_admin());
        assert!(!dc.apply_request(&path("account add bob other"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("account add carol pw root"), &mut ctx).is_success());
        assert_eq!(dc.accounts().len(), 2);
    }

    #[test]
    fn test_bad_paths_fail() {
        let mut ctx = SimContext::new(0);
        let mut dc = controller(&mut ctx);
        let unknown = dc.apply_request(&path("account mallory logoff"), &mut ctx);
        assert_eq!(unknown.reason(), Some("no such account: mallory"));
        assert!(!dc.apply_request(&path("account alice fly"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("account alice"), &mut ctx).is_success());
        assert!(!dc.apply_request(&path("group admins"), &mut ctx).is_success());
        assert!(dc.account("alice").unwrap().is_enabled());
    }
}
