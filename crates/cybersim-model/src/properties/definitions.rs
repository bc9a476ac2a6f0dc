//! Property constant definitions.
//!
//! The description string is what `cybersim properties` prints, so it must
//! stand on its own: what the property controls, valid values and special
//! values. Doc comments are for developers.
//!
//! ## Categories
//!
//! - **node** - power and scan durations
//! - **software** - patch, restart and install durations, session capacity
//! - **file_system** - scan, repair and restore durations
//! - **acl** - router and firewall rule tables
//! - **link** - bandwidth
//! - **simulation** - seed and episode length
//! - **nmne** - malicious network event capture

use super::types::{
    LinkScope, NodeScope, Property, PropertyBaseType, PropertyDefault, PropertyType,
    SimulationScope,
};

// ============================================================================
// Node Properties (Node scope)
// ============================================================================

/// Steps from `startup` to ON.
pub const NODE_START_UP_DURATION: Property<u32, NodeScope> = Property::new(
    "node/start_up_duration",
    "Timesteps a node spends BOOTING after a startup request (0 = immediate)",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Steps from `shutdown` to OFF.
pub const NODE_SHUT_DOWN_DURATION: Property<u32, NodeScope> = Property::new(
    "node/shut_down_duration",
    "Timesteps a node spends SHUTTING_DOWN after a shutdown request (0 = immediate)",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Steps a node scan takes.
pub const NODE_SCAN_DURATION: Property<u32, NodeScope> = Property::new(
    "node/scan_duration",
    "Timesteps before a node scan reveals the health of its software and files",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

// ============================================================================
// Software Properties (Node scope)
// ============================================================================

/// Steps in PATCHING.
pub const SOFTWARE_PATCHING_DURATION: Property<u32, NodeScope> = Property::new(
    "software/patching_duration",
    "Timesteps a patch takes; health returns to GOOD when it completes",
    PropertyDefault::Integer(2),
)
.with_unit("steps");

/// Steps in RESTARTING.
pub const SOFTWARE_RESTART_DURATION: Property<u32, NodeScope> = Property::new(
    "software/restart_duration",
    "Timesteps a service restart takes",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Steps in INSTALLING.
pub const SOFTWARE_INSTALL_DURATION: Property<u32, NodeScope> = Property::new(
    "software/install_duration",
    "Timesteps a software_manager install request takes",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Connection capacity of each program on the node.
pub const SOFTWARE_MAX_SESSIONS: Property<usize, NodeScope> = Property::new(
    "software/max_sessions",
    "Connections a program accepts before it becomes OVERWHELMED",
    PropertyDefault::Integer(100),
)
.with_unit("connections");

// ============================================================================
// File System Properties (Node scope)
// ============================================================================

/// Scan duration for files and folders.
pub const FILE_SYSTEM_SCANNING_LIMIT: Property<u32, NodeScope> = Property::new(
    "file_system/scanning_limit",
    "Timesteps before a file or folder scan reveals actual health",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Repair duration for files and folders.
pub const FILE_SYSTEM_REPAIRING_LIMIT: Property<u32, NodeScope> = Property::new(
    "file_system/repairing_limit",
    "Timesteps a repair takes (CORRUPT to GOOD; cannot fix DESTROYED)",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

/// Restore duration for files and folders.
pub const FILE_SYSTEM_RESTORING_LIMIT: Property<u32, NodeScope> = Property::new(
    "file_system/restoring_limit",
    "Timesteps a restore takes (any state to GOOD)",
    PropertyDefault::Integer(3),
)
.with_unit("steps");

// ============================================================================
// ACL Properties (Node scope)
// ============================================================================

/// Rule table size. Only routers and firewalls read it.
pub const ACL_MAX_RULES: Property<usize, NodeScope> = Property::new(
    "acl/max_rules",
    "ACL size including the implicit rule; explicit positions are 0 to max_rules - 2 (routers and firewalls)",
    PropertyDefault::Integer(10),
)
.with_unit("rules");

/// Implicit rule action. Null means the node type decides.
pub const ACL_IMPLICIT_ACTION: Property<Option<String>, NodeScope> = Property::new(
    "acl/implicit_action",
    "Action of the implicit last rule, PERMIT or DENY; null = PERMIT for routers, DENY for firewalls",
    PropertyDefault::Null,
)
.with_type(PropertyType::new(PropertyBaseType::String).nullable());

// ============================================================================
// Link Properties (Link scope)
// ============================================================================

/// Link capacity per step.
pub const LINK_BANDWIDTH_MBPS: Property<f64, LinkScope> = Property::new(
    "link/bandwidth_mbps",
    "Megabits a link carries per timestep; frames beyond it are dropped",
    PropertyDefault::Float(100.0),
)
.with_unit("Mbit/step");

// ============================================================================
// Simulation Properties (Simulation scope)
// ============================================================================

/// RNG seed. The `--seed` command-line option takes precedence.
pub const SIMULATION_SEED: Property<u64, SimulationScope> = Property::new(
    "simulation/seed",
    "Seed of the simulation random number generator; same seed and actions give the same run",
    PropertyDefault::Integer(0),
);

/// Episode length for the scripted runner.
pub const SIMULATION_STEPS: Property<u64, SimulationScope> = Property::new(
    "simulation/steps",
    "Timesteps the scripted runner executes unless --steps is given",
    PropertyDefault::Integer(128),
)
.with_unit("steps");

/// NMNE capture switch.
pub const NMNE_CAPTURE: Property<bool, SimulationScope> = Property::new(
    "nmne/capture_nmne",
    "Whether network interfaces count payload keyword hits (malicious network events)",
    PropertyDefault::Bool(true),
);

/// NMNE keywords.
pub const NMNE_KEYWORDS: Property<Vec<String>, SimulationScope> = Property::new(
    "nmne/keywords",
    "Payload keywords counted as malicious network events (case-insensitive)",
    PropertyDefault::Strings(&["DELETE"]),
);
