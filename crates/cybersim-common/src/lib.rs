//! # cybersim-common
//!
//! Common types and traits for the CyberSim network simulation.
//!
//! This crate provides core simulation primitives including:
//! - Discrete time representation ([`Timestep`])
//! - Component identification ([`ComponentId`])
//! - Simulation context with the seeded RNG ([`SimContext`])
//! - Request dispatch ([`request`]): responses, handler tables, argument parsing
//! - The component trait ([`SimComponent`])
//! - Metric definitions ([`metric_defs`])

pub mod metric_defs;
pub mod request;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use request::{
    dispatch, parse_arg, Arity, FromArgs, RequestDef, RequestHandler, RequestResponse,
    RequestStatus,
};

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
///
/// These represent misuse of the simulation API by calling code. Agent
/// requests never produce a `SimError`; they fail through
/// [`RequestResponse::failure`].
#[derive(Debug, Error)]
pub enum SimError {
    /// Component not found.
    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    /// Invalid address string.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Component is in a state that does not allow the operation.
    #[error("Invalid state for {component}: {message}")]
    InvalidState {
        /// Component that rejected the operation.
        component: String,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// A discrete simulation tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestep(pub u64);

impl Timestep {
    /// The first timestep of an episode.
    pub const ZERO: Timestep = Timestep(0);

    /// Get the raw step number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The following timestep.
    pub fn next(&self) -> Timestep {
        Timestep(self.0 + 1)
    }
}

impl std::fmt::Display for Timestep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ============================================================================
// Component Identity
// ============================================================================

/// Unique identifier for a simulated component.
///
/// Ids are drawn from the simulation RNG rather than the OS so that two runs
/// with the same seed produce identical snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    /// Generate a new id from the given random source.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let bytes: [u8; 16] = rng.gen();
        ComponentId(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Create an id from a fixed integer (useful for tests and fixtures).
    pub fn from_u128(value: u128) -> Self {
        ComponentId(Uuid::from_u128(value))
    }

    /// Get the underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to components while requests and timesteps are applied.
///
/// The context owns the single RNG of the simulation. Every probabilistic
/// branch must draw from it for runs to be reproducible.
#[derive(Debug, Clone)]
pub struct SimContext {
    timestep: Timestep,
    rng: ChaCha8Rng,
    agent: Option<String>,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            timestep: Timestep::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            agent: None,
        }
    }

    /// Get the current timestep.
    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    /// Set the current timestep (used by the step loop).
    pub fn set_timestep(&mut self, timestep: Timestep) {
        self.timestep = timestep;
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Draw a fresh component id from the RNG.
    pub fn new_id(&mut self) -> ComponentId {
        ComponentId::generate(&mut self.rng)
    }

    /// Name of the agent whose request is being applied, if any.
    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    /// Set the acting agent (used by the step loop).
    pub fn set_agent(&mut self, agent: Option<String>) {
        self.agent = agent;
    }
}

// ============================================================================
// Component Trait
// ============================================================================

/// Base trait for all simulated components.
///
/// Components expose their actions as a const table of [`RequestDef`]s and
/// their observable state as a JSON tree.
pub trait SimComponent: Sized + 'static {
    /// Get the component's unique id.
    fn component_id(&self) -> ComponentId;

    /// Snapshot of the component and everything it owns.
    fn describe_state(&self) -> serde_json::Value;

    /// Request table for this component type.
    fn requests() -> &'static [RequestDef<Self>];

    /// Apply a request addressed to this component.
    fn apply_request(&mut self, path: &[String], ctx: &mut SimContext) -> RequestResponse {
        dispatch(Self::requests(), self, path, ctx)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestep_next_and_order() {
        let t = Timestep::ZERO;
        assert_eq!(t.next(), Timestep(1));
        assert!(Timestep(3) > Timestep(2));
        assert_eq!(Timestep(7).to_string(), "t7");
    }

    #[test]
    fn test_component_ids_are_seed_deterministic() {
        let mut a = SimContext::new(42);
        let mut b = SimContext::new(42);
        let ids_a: Vec<ComponentId> = (0..4).map(|_| a.new_id()).collect();
        let ids_b: Vec<ComponentId> = (0..4).map(|_| b.new_id()).collect();
        assert_eq!(ids_a, ids_b);
        assert_ne!(ids_a[0], ids_a[1]);
    }

    #[test]
    fn test_component_ids_differ_between_seeds() {
        let mut a = SimContext::new(1);
        let mut b = SimContext::new(2);
        assert_ne!(a.new_id(), b.new_id());
    }

    #[test]
    fn test_component_id_is_v4_shaped() {
        let mut ctx = SimContext::new(0);
        let id = ctx.new_id();
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn test_context_agent_roundtrip() {
        let mut ctx = SimContext::new(0);
        assert!(ctx.agent().is_none());
        ctx.set_agent(Some("blue".to_string()));
        assert_eq!(ctx.agent(), Some("blue"));
    }
}
