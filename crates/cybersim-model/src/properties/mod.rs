//! # Properties
//!
//! A type-safe registry of the timing and capacity parameters of a scenario.
//! Properties apply to a node, a link, or the simulation as a whole.
//!
//! - [`value`] - property values and conversions
//! - [`types`] - scopes, value types and definitions
//! - [`definitions`] - every property constant, in one place
//! - [`registry`] - lookup and property sets
//!
//! ## Names
//!
//! Names are `namespace/key`, e.g. `node/start_up_duration` or
//! `link/bandwidth_mbps`. In YAML the namespace is a nested map:
//!
//! ```yaml
//! defaults:
//!   node:
//!     software:
//!       max_sessions: 1
//!   link:
//!     link:
//!       bandwidth_mbps: 10
//! ```
//!
//! ## Resolution
//!
//! Later sources override earlier ones:
//! 1. Built-in defaults
//! 2. `defaults:` sections (in file order)
//! 3. Values on a node or link (in file order)

pub mod definitions;
pub mod registry;
pub mod types;
pub mod value;

pub use value::{FromPropertyValue, PropertyValue, ToPropertyValue};

pub use types::{
    LinkScope, NodeScope, Property, PropertyBaseType, PropertyDef, PropertyDefault, PropertyScope,
    PropertyType, ScopeMarker, SimulationScope,
};

pub use definitions::{
    // ACL
    ACL_IMPLICIT_ACTION,
    ACL_MAX_RULES,
    // File system
    FILE_SYSTEM_REPAIRING_LIMIT,
    FILE_SYSTEM_RESTORING_LIMIT,
    FILE_SYSTEM_SCANNING_LIMIT,
    // Link
    LINK_BANDWIDTH_MBPS,
    // NMNE
    NMNE_CAPTURE,
    NMNE_KEYWORDS,
    // Node
    NODE_SCAN_DURATION,
    NODE_SHUT_DOWN_DURATION,
    NODE_START_UP_DURATION,
    // Simulation
    SIMULATION_SEED,
    SIMULATION_STEPS,
    // Software
    SOFTWARE_INSTALL_DURATION,
    SOFTWARE_MAX_SESSIONS,
    SOFTWARE_PATCHING_DURATION,
    SOFTWARE_RESTART_DURATION,
};

pub use registry::{
    default_value, get_property_def, is_known_property, known_namespaces, properties_by_scope,
    PropertySetError, ResolvedProperties, UnresolvedProperties, ALL_PROPERTIES,
};
