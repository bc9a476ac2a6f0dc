//! Point-to-point links.

use cybersim_common::{ComponentId, SimContext};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::trace;

/// Default link bandwidth in megabits per step.
pub const DEFAULT_BANDWIDTH_MBPS: f64 = 100.0;

/// One end of a link: a hostname and an interface port on that node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkEndpoint {
    /// Node hostname.
    pub hostname: String,
    /// Interface port number.
    pub port: u16,
}

impl LinkEndpoint {
    /// Create a new endpoint.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        LinkEndpoint {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// A cable between two interfaces.
///
/// Endpoints are lookups by hostname and port, not references; the
/// [`Network`](crate::Network) owns both the link and the nodes. Load
/// accumulates over a step and frames that would push it past the
/// bandwidth are dropped.
#[derive(Debug, Clone)]
pub struct Link {
    id: ComponentId,
    endpoint_a: LinkEndpoint,
    endpoint_b: LinkEndpoint,
    bandwidth: f64,
    current_load: f64,
    frames_dropped: u64,
}

impl Link {
    /// Create a link with the given bandwidth in megabits per step.
    pub fn new(
        ctx: &mut SimContext,
        endpoint_a: LinkEndpoint,
        endpoint_b: LinkEndpoint,
        bandwidth: f64,
    ) -> Self {
        Link {
            id: ctx.new_id(),
            endpoint_a,
            endpoint_b,
            bandwidth,
            current_load: 0.0,
            frames_dropped: 0,
        }
    }

    /// Stable name, `a:port<->b:port`.
    pub fn name(&self) -> String {
        format!("{}<->{}", self.endpoint_a, self.endpoint_b)
    }

    /// Component id.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// First endpoint.
    pub fn endpoint_a(&self) -> &LinkEndpoint {
        &self.endpoint_a
    }

    /// Second endpoint.
    pub fn endpoint_b(&self) -> &LinkEndpoint {
        &self.endpoint_b
    }

    /// Bandwidth in megabits per step.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Megabits carried so far this step.
    pub fn current_load(&self) -> f64 {
        self.current_load
    }

    /// Frames dropped for capacity this step.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Load as a fraction of bandwidth.
    pub fn utilisation(&self) -> f64 {
        if self.bandwidth > 0.0 {
            self.current_load / self.bandwidth
        } else {
            0.0
        }
    }

    /// The endpoint opposite `from`, if `from` is one of this link's ends.
    pub fn other_end(&self, from: &LinkEndpoint) -> Option<&LinkEndpoint> {
        if *from == self.endpoint_a {
            Some(&self.endpoint_b)
        } else if *from == self.endpoint_b {
            Some(&self.endpoint_a)
        } else {
            None
        }
    }

    /// Charge the link for a frame of `size_mbits`.
    ///
    /// Returns false, leaving the load unchanged, if the frame does not fit.
    pub fn try_carry(&mut self, size_mbits: f64) -> bool {
        if self.current_load + size_mbits > self.bandwidth {
            self.frames_dropped += 1;
            trace!(link = %self.name(), load = self.current_load, size_mbits, "link at capacity");
            return false;
        }
        self.current_load += size_mbits;
        true
    }

    /// Clear the per-step load.
    pub fn pre_timestep(&mut self) {
        self.current_load = 0.0;
        self.frames_dropped = 0;
    }

    /// Snapshot of the link.
    pub fn describe_state(&self) -> Value {
        json!({
            "uuid": self.id,
            "endpoint_a": self.endpoint_a.to_string(),
            "endpoint_b": self.endpoint_b.to_string(),
            "bandwidth": self.bandwidth,
            "current_load": self.current_load,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
