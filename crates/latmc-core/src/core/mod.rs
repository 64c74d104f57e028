//! # Core Module
//!
//! Stateless foundations of the model compiler: numeric geometry, space group symmetry,
//! path analysis, the reference data model and the binary interop contract.
//!
//! ## Overview
//!
//! Nothing in this module owns build state. Every function takes its inputs explicitly
//! and returns fresh values, which lets the engine run independent builders in parallel
//! over one frozen reference snapshot.
//!
//! ## Architecture
//!
//! - **Numerics and geometry** ([`utils`]) - Tolerance comparison, fractional/cartesian
//!   conversion and 4D crystal vector encoding
//! - **Symmetry** ([`symmetry`]) - Operation parsing, space groups and the symmetry engine
//! - **Path analysis** ([`analysis`]) - Ring detection, intermediate positions and rule generation
//! - **Reference data** ([`models`]) - The user-authored model and its query ports
//! - **Binary interop** ([`interop`]) - Fixed-layout records, blobs and data sinks

pub mod analysis;
pub mod interop;
pub mod models;
pub mod symmetry;
pub mod utils;
