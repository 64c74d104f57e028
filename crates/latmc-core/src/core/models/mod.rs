//! # Reference Models Module
//!
//! The user-authored, symbolic description of a material: particle species, unit cell
//! sites, the space group, energy interactions, transition definitions and simulations.
//!
//! ## Overview
//!
//! Reference objects carry a stable integer index equal to their position in the owning
//! list and a lifecycle [`particle::ModelState`]. They are immutable during a build pass;
//! everything derived from them lives in the engine's context arena.
//!
//! ## Key Components
//!
//! - [`particle`] - Particle species, particle sets and the shared lifecycle state
//! - [`structure`] - Unit cell sites and the authored space group
//! - [`energy`] - Pair and group interactions with their energy entries
//! - [`transition`] - State exchanges, abstract transitions, kinetic and Metropolis transitions
//! - [`simulation`] - Simulation definitions
//! - [`reference`] - The [`reference::ReferenceData`] snapshot and its TOML loader
//! - [`ports`] - Per-domain query traits combined into [`ports::ReferencePort`]
//!
//! ## Usage
//!
//! ```ignore
//! use latmc::core::models::reference::ReferenceData;
//! use latmc::core::models::ports::StructureQueries;
//!
//! let data = ReferenceData::load(Path::new("model.toml"))?;
//! println!("{} sites", data.sites().len());
//! ```

pub mod energy;
pub mod particle;
pub mod ports;
pub mod reference;
pub mod simulation;
pub mod structure;
pub mod transition;
