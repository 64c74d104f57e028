//! # Workflows Module
//!
//! End-to-end build passes over a reference model.
//!
//! ## Overview
//!
//! A workflow validates the reference data, builds the structure, energy, transition and
//! simulation contexts in dependency order, encodes every active simulation into binary
//! blobs and optionally hands them to a [`DataSink`](crate::core::interop::sink::DataSink).
//! A pass either returns the complete context with all blobs, or a
//! [`BuildReport`](crate::engine::error::BuildReport) naming the failed tier. Nothing is
//! persisted from a failed pass.
//!
//! ## Architecture
//!
//! - **Compile Workflow** ([`compile`]) - build, translate and persist

pub mod compile;
