//! # Analysis Module
//!
//! Pure functions over transition paths and their occupation states.
//!
//! - [`transition`] - Ring detection and intermediate position equivalence
//! - [`rules`] - Rule enumeration, movement codes, tracker orders and movement flags

pub mod rules;
pub mod transition;
