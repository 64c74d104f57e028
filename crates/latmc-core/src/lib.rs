//! # latmc Core Library
//!
//! Compiles a symbolic crystal model (particles, sites, interactions, transitions and
//! simulations) into the symmetry-resolved context and fixed-layout binary input of a
//! lattice Monte Carlo simulator.
//!
//! ## Architectural Philosophy
//!
//! The library keeps a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless numerics, space group symmetry, path and rule
//!   analysis, the reference data model and the binary interop records, blobs and sinks.
//!
//! - **[`engine`]: The Logic Core.** Builds the structure, energy, transition and
//!   simulation contexts of one pass, resolves reference conflicts and translates finished
//!   simulations into binary blobs.
//!
//! - **[`workflows`]: The Public API.** Runs complete build passes and reports either the
//!   full result or the tier a pass failed in.

pub mod core;
pub mod engine;
pub mod workflows;
