//! # Symmetry Engine
//!
//! Space group handling for fractional crystal coordinates.
//!
//! - [`operation`] parses and applies individual affine operations (`"-x+1/2,y,z"`).
//! - [`space_group`] validates a group and derives equivalent positions, Wyckoff
//!   dictionaries, site-symmetry projections and symmetry-expanded paths.

pub mod operation;
pub mod space_group;

pub use operation::{SymmetryError, SymmetryOperation};
pub use space_group::{SpaceGroup, SymmetryEngine, WyckoffDictionary, WyckoffEntry};
