//! Context builders of one build pass.
//!
//! Each builder expands reference objects through the symmetry engine and canonicalizes
//! the result into the arena types of [`crate::engine::context`]. Builders run in
//! dependency order: structure, energy, transition, then one simulation context per
//! active simulation. A builder that finds its upstream context missing fails with
//! [`crate::engine::error::EngineError::MissingContext`].

pub mod energy;
pub mod simulation;
pub mod structure;
pub mod transition;
