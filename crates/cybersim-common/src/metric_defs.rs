//! Metric definitions.
//!
//! Metrics are emitted through the `metrics` facade using the names below.
//! Without an installed recorder they are no-ops.

use std::fmt;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

/// Static description of a metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Metric name.
    pub name: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Labels attached when the metric is recorded.
    pub labels: &'static [&'static str],
}

/// Frames delivered to a receiving interface.
pub const FRAMES_DELIVERED: MetricDef = MetricDef {
    name: "cybersim.network.frames_delivered",
    kind: MetricKind::Counter,
    description: "Frames handed from a link to a receiving interface",
    labels: &["node"],
};

/// Frames dropped anywhere in the data plane.
pub const FRAMES_DROPPED: MetricDef = MetricDef {
    name: "cybersim.network.frames_dropped",
    kind: MetricKind::Counter,
    description: "Frames dropped by links or interfaces",
    labels: &["reason"],
};

/// Frames discarded by an ACL.
pub const ACL_BLOCKED: MetricDef = MetricDef {
    name: "cybersim.acl.blocked",
    kind: MetricKind::Counter,
    description: "Frames denied by a router or firewall access control list",
    labels: &["node"],
};

/// Malicious network events captured by interfaces.
pub const NMNE_DETECTED: MetricDef = MetricDef {
    name: "cybersim.nmne.detected",
    kind: MetricKind::Counter,
    description: "Payload keyword hits captured by network interfaces",
    labels: &["node", "direction"],
};

/// Requests applied by agents.
pub const REQUESTS: MetricDef = MetricDef {
    name: "cybersim.requests",
    kind: MetricKind::Counter,
    description: "Agent requests applied to the simulation, by outcome",
    labels: &["status"],
};

/// Nodes currently powered on.
pub const NODES_ON: MetricDef = MetricDef {
    name: "cybersim.nodes.on",
    kind: MetricKind::Gauge,
    description: "Number of nodes in the ON operating state after the last timestep",
    labels: &[],
};

/// All metric definitions.
pub const ALL: &[&MetricDef] = &[
    &FRAMES_DELIVERED,
    &FRAMES_DROPPED,
    &ACL_BLOCKED,
    &NMNE_DETECTED,
    &REQUESTS,
    &NODES_ON,
];
