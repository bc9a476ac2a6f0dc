//! Request dispatch.
//!
//! Every component publishes a const table of [`RequestDef`]s. A request is a
//! path of string tokens; [`dispatch`] matches the first token against the
//! table, checks the argument count, and hands the remaining tokens to the
//! handler. Handlers that own children delegate by calling `dispatch` again
//! on the child's table.
//!
//! Agent mistakes (unknown names, wrong argument counts, unparsable values)
//! always come back as a `failure` response, never as a panic or `Err`.

use crate::SimContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

// ============================================================================
// Responses
// ============================================================================

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// The request was applied.
    Success,
    /// The request was rejected; state is unchanged.
    Failure,
    /// The request sent traffic whose outcome is known only after the
    /// network has drained. Never returned to the outer driver.
    Pending,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Success => write!(f, "success"),
            RequestStatus::Failure => write!(f, "failure"),
            RequestStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Structured response to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponse {
    /// Outcome.
    pub status: RequestStatus,
    /// Extra data (failure reason, query results, ...).
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RequestResponse {
    /// A successful response with no data.
    pub fn success() -> Self {
        RequestResponse {
            status: RequestStatus::Success,
            data: Map::new(),
        }
    }

    /// A failed response carrying a reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("reason".to_string(), Value::String(reason.into()));
        RequestResponse {
            status: RequestStatus::Failure,
            data,
        }
    }

    /// A response whose outcome is not yet known.
    pub fn pending() -> Self {
        RequestResponse {
            status: RequestStatus::Pending,
            data: Map::new(),
        }
    }

    /// Failure for a path that names nothing.
    pub fn unreachable(path: &[String]) -> Self {
        RequestResponse::failure(format!("unreachable request: {}", path.join(" ")))
    }

    /// Success when `ok`, otherwise failure with `reason`.
    pub fn from_bool(ok: bool, reason: impl Into<String>) -> Self {
        if ok {
            RequestResponse::success()
        } else {
            RequestResponse::failure(reason)
        }
    }

    /// Attach a data entry.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Check whether the request succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RequestStatus::Success
    }

    /// Check whether the request is awaiting network traffic.
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Failure reason, if one was given.
    pub fn reason(&self) -> Option<&str> {
        self.data.get("reason").and_then(Value::as_str)
    }
}

// ============================================================================
// Handler Tables
// ============================================================================

/// Number of arguments a request accepts after its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments.
    Exact(usize),
    /// At least this many arguments.
    AtLeast(usize),
    /// Inclusive range of argument counts.
    Between(usize, usize),
}

impl Arity {
    /// Check whether `count` arguments are acceptable.
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => count >= lo && count <= hi,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "{}+", n),
            Arity::Between(lo, hi) => write!(f, "{}-{}", lo, hi),
        }
    }
}

/// Handler signature: target, arguments after the request name, context.
pub type RequestHandler<T> = fn(&mut T, &[String], &mut SimContext) -> RequestResponse;

/// A named request a component type accepts.
pub struct RequestDef<T: 'static> {
    /// Token that selects this request.
    pub name: &'static str,
    /// Human-readable description (shown by `cybersim requests`).
    pub description: &'static str,
    /// Accepted argument count.
    pub arity: Arity,
    /// Function applying the request.
    pub handler: RequestHandler<T>,
}

impl<T: 'static> RequestDef<T> {
    /// Create a new request definition.
    pub const fn new(
        name: &'static str,
        description: &'static str,
        arity: Arity,
        handler: RequestHandler<T>,
    ) -> Self {
        RequestDef {
            name,
            description,
            arity,
            handler,
        }
    }
}

/// Route `path` through `table` to a handler on `target`.
pub fn dispatch<T: 'static>(
    table: &'static [RequestDef<T>],
    target: &mut T,
    path: &[String],
    ctx: &mut SimContext,
) -> RequestResponse {
    let Some((head, args)) = path.split_first() else {
        return RequestResponse::failure("empty request");
    };

    let Some(def) = table.iter().find(|def| def.name == head.as_str()) else {
        trace!(request = %head, "no handler for request");
        return RequestResponse::unreachable(path);
    };

    if !def.arity.accepts(args.len()) {
        return RequestResponse::failure(format!(
            "'{}' expects {} arguments, got {}",
            def.name,
            def.arity,
            args.len()
        ));
    }

    (def.handler)(target, args, ctx)
}

// ============================================================================
// Argument Parsing
// ============================================================================

/// Typed parameters parsed from request arguments.
pub trait FromArgs: Sized {
    /// Parse from the arguments that follow the request name.
    fn from_args(args: &[String]) -> Result<Self, String>;
}

/// Parse argument `index` as `T`, naming it `what` in the error.
pub fn parse_arg<T: FromStr>(args: &[String], index: usize, what: &str) -> Result<T, String> {
    let raw = args
        .get(index)
        .ok_or_else(|| format!("missing argument: {}", what))?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {}: '{}'", what, raw))
}

// ============================================================================
// Tests
// ============================================================================
